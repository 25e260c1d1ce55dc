//! Tailer cursor, partial-line, and truncation behavior.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use logsentry::matcher::match_lines;
use logsentry::tailer::{ConfigError, TailPoll, Tailer};
use tempfile::TempDir;

fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open for append");
    file.write_all(text.as_bytes()).expect("append");
}

fn patterns(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

fn expect_lines(poll: TailPoll) -> Vec<String> {
    match poll {
        TailPoll::Lines { lines, .. } => lines,
        other => panic!("expected lines, got {other:?}"),
    }
}

#[test]
fn empty_pattern_list_is_a_config_error() {
    let dir = TempDir::new().expect("tempdir");
    let err = Tailer::configure(dir.path().join("app.log"), vec![]).expect_err("must fail");
    assert!(matches!(err, ConfigError::EmptyPatterns));
}

#[test]
fn content_before_configure_is_never_replayed() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("app.log");
    append(&path, "old line before configure\n");

    let mut tailer = Tailer::configure(&path, patterns(&["error"])).expect("configure");
    assert_eq!(tailer.poll(), TailPoll::Unchanged);

    append(&path, "ERROR new line\n");
    let lines = expect_lines(tailer.poll());
    assert_eq!(lines, vec!["ERROR new line"]);
}

#[test]
fn poll_is_idempotent_when_unchanged() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("app.log");
    append(&path, "seed\n");

    let mut tailer = Tailer::configure(&path, patterns(&["x"])).expect("configure");
    let cursor = tailer.cursor();
    assert_eq!(tailer.poll(), TailPoll::Unchanged);
    assert_eq!(tailer.poll(), TailPoll::Unchanged);
    assert_eq!(tailer.cursor(), cursor);
}

#[test]
fn no_byte_is_read_twice_across_appends() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("app.log");
    let mut tailer = Tailer::configure(&path, patterns(&["x"])).expect("configure");

    append(&path, "first\n");
    assert_eq!(expect_lines(tailer.poll()), vec!["first"]);

    append(&path, "second\nthird\n");
    assert_eq!(expect_lines(tailer.poll()), vec!["second", "third"]);

    // Cursor sits at file size; nothing left to re-read.
    assert_eq!(tailer.cursor(), fs::metadata(&path).expect("meta").len());
    assert_eq!(tailer.poll(), TailPoll::Unchanged);
}

#[test]
fn partial_line_is_held_until_its_terminator_arrives() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("app.log");
    let mut tailer = Tailer::configure(&path, patterns(&["error"])).expect("configure");

    append(&path, "ERR");
    let lines = expect_lines(tailer.poll());
    assert!(lines.is_empty(), "incomplete line must not be emitted");

    append(&path, "OR split across polls\n");
    let lines = expect_lines(tailer.poll());
    assert_eq!(lines, vec!["ERROR split across polls"]);

    // The reassembled line matches exactly once.
    let events = match_lines(&lines, tailer.patterns());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].line, "ERROR split across polls");
}

#[test]
fn crlf_terminators_are_stripped() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("app.log");
    let mut tailer = Tailer::configure(&path, patterns(&["x"])).expect("configure");

    append(&path, "windows line\r\n");
    assert_eq!(expect_lines(tailer.poll()), vec!["windows line"]);
}

#[test]
fn truncation_resets_cursor_and_rescans() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("app.log");
    let mut tailer = Tailer::configure(&path, patterns(&["x"])).expect("configure");

    append(&path, "a".repeat(500).as_str());
    append(&path, "\n");
    tailer.poll();
    assert!(tailer.cursor() > 0);

    // Rotate: shrink to zero, then grow again.
    fs::write(&path, "").expect("truncate");
    match tailer.poll() {
        TailPoll::Lines { lines, truncated } => {
            assert!(truncated);
            assert!(lines.is_empty());
        }
        other => panic!("expected truncation report, got {other:?}"),
    }
    assert_eq!(tailer.cursor(), 0);

    fs::write(&path, "fresh content after rotation\n").expect("write");
    match tailer.poll() {
        TailPoll::Lines { lines, .. } => {
            assert_eq!(lines, vec!["fresh content after rotation"]);
        }
        other => panic!("expected lines, got {other:?}"),
    }
}

#[test]
fn stale_partial_is_dropped_on_truncation() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("app.log");
    let mut tailer = Tailer::configure(&path, patterns(&["x"])).expect("configure");

    append(&path, "half a li");
    tailer.poll();

    fs::write(&path, "new\n").expect("rewrite");
    let lines = expect_lines(tailer.poll());
    assert_eq!(lines, vec!["new"], "held partial must not leak into new content");
}

#[test]
fn missing_file_is_transient_not_fatal() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("not-yet.log");
    let mut tailer = Tailer::configure(&path, patterns(&["error"])).expect("configure");

    assert_eq!(tailer.poll(), TailPoll::Missing);
    assert_eq!(tailer.poll(), TailPoll::Missing);

    append(&path, "ERROR appeared\n");
    assert_eq!(expect_lines(tailer.poll()), vec!["ERROR appeared"]);
}

#[test]
fn malformed_utf8_bytes_are_dropped() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("app.log");
    let mut tailer = Tailer::configure(&path, patterns(&["x"])).expect("configure");

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .expect("open");
    file.write_all(b"ok \xff\xfe bytes\n").expect("write");

    assert_eq!(expect_lines(tailer.poll()), vec!["ok  bytes"]);
}

#[test]
fn grows_from_empty_and_matches_once() {
    // File grows from "" to two lines; pattern ["error"] yields exactly one
    // event for the ERROR line.
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("app.log");
    fs::write(&path, "").expect("create");

    let mut tailer = Tailer::configure(&path, patterns(&["error"])).expect("configure");
    append(&path, "INFO ok\nERROR disk full\n");

    let lines = expect_lines(tailer.poll());
    let events = match_lines(&lines, tailer.patterns());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].pattern, "error");
    assert_eq!(events[0].line, "ERROR disk full");
}
