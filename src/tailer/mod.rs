//! Incremental file tailing.
//!
//! A [`Tailer`] tracks a byte cursor into a growing text file and, on each
//! poll, reads only the appended range. A trailing line without its
//! terminator is held back and prefixed onto the next read, so a pattern
//! split across poll boundaries is never missed. Truncation (size shrinks
//! below the cursor) resets the cursor and re-reads the whole file as new
//! content: at-least-once, re-alerting on already-seen content is the
//! documented behavior.
//!
//! [`run_tail_loop`] is the periodic driver: poll, match, dispatch.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::events::{CoreEvent, EventBus};
use crate::matcher;
use crate::providers::ProviderKind;

/// Configuration errors surfaced at watch setup. Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The pattern list was empty; a watch that can never match is a
    /// misconfiguration, not a quiet success.
    #[error("pattern list is empty")]
    EmptyPatterns,
    /// The file path was empty.
    #[error("watch path is empty")]
    EmptyPath,
}

/// Outcome of a single [`Tailer::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailPoll {
    /// The file does not exist. Transient; retried on the next tick.
    Missing,
    /// No growth since the last poll. No I/O beyond the size check.
    Unchanged,
    /// Newly completed lines, in file order.
    Lines {
        /// Complete lines read from the appended range.
        lines: Vec<String>,
        /// Whether the cursor was reset by a shrink before reading.
        truncated: bool,
    },
    /// A read failed mid-poll. Transient; retried on the next tick.
    Transient(String),
}

/// Cursor-tracking reader over one watched file.
#[derive(Debug)]
pub struct Tailer {
    path: PathBuf,
    patterns: Vec<String>,
    cursor: u64,
    partial: String,
}

impl Tailer {
    /// Configure a watch over `path` for `patterns`.
    ///
    /// The cursor starts at the file's current size, so content appended
    /// before configuration is never replayed. A missing file starts the
    /// cursor at zero and is reported as [`TailPoll::Missing`] until it
    /// appears.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `patterns` is empty or `path` is empty.
    pub fn configure(
        path: impl Into<PathBuf>,
        patterns: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath);
        }
        if patterns.iter().all(String::is_empty) {
            return Err(ConfigError::EmptyPatterns);
        }

        let cursor = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        info!(path = %path.display(), cursor, "tailer configured");

        Ok(Self {
            path,
            patterns,
            cursor,
            partial: String::new(),
        })
    }

    /// The watched file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The configured patterns, in match-priority order.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Current byte offset of consumed content.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Check the file for growth and return newly completed lines.
    ///
    /// Idempotent while the file is unchanged: a size check and nothing
    /// else. Bytes in `[cursor, size)` are read exactly once; malformed
    /// UTF-8 bytes are dropped.
    pub fn poll(&mut self) -> TailPoll {
        let size = match std::fs::metadata(&self.path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return TailPoll::Missing,
            Err(e) => return TailPoll::Transient(e.to_string()),
        };

        let truncated = size < self.cursor;
        if truncated {
            warn!(
                path = %self.path.display(),
                old_cursor = self.cursor,
                size,
                "file shrank; treating current content as new"
            );
            self.cursor = 0;
            self.partial.clear();
        }

        if size == self.cursor {
            if truncated {
                // Shrunk to exactly zero (or to the reset cursor): report
                // the reset even though there is nothing to read yet.
                return TailPoll::Lines {
                    lines: Vec::new(),
                    truncated: true,
                };
            }
            return TailPoll::Unchanged;
        }

        let text = match self.read_range(self.cursor, size) {
            Ok(t) => t,
            Err(e) => return TailPoll::Transient(e.to_string()),
        };
        self.cursor = size;

        TailPoll::Lines {
            lines: self.complete_lines(&text),
            truncated,
        }
    }

    /// Read bytes `[from, to)` as text, dropping malformed UTF-8.
    fn read_range(&self, from: u64, to: u64) -> std::io::Result<String> {
        let mut file = std::fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(from))?;

        let len = to.saturating_sub(from);
        let mut bytes = Vec::new();
        file.take(len).read_to_end(&mut bytes)?;

        let text: String = String::from_utf8_lossy(&bytes)
            .chars()
            .filter(|c| *c != char::REPLACEMENT_CHARACTER)
            .collect();
        Ok(text)
    }

    /// Join held-back partial content with `text` and split off complete
    /// lines; whatever lacks a terminator stays held for the next poll.
    fn complete_lines(&mut self, text: &str) -> Vec<String> {
        let mut buf = std::mem::take(&mut self.partial);
        buf.push_str(text);

        let mut lines = Vec::new();
        while let Some(pos) = buf.find('\n') {
            let mut line: String = buf.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        self.partial = buf;
        lines
    }
}

// ---------------------------------------------------------------------------
// Background loop
// ---------------------------------------------------------------------------

/// Dependencies for the tail loop.
pub struct TailLoopDeps {
    /// Configured tailer, owned by the loop.
    pub tailer: Tailer,
    /// Dispatcher invoked on every pattern match.
    pub dispatcher: Arc<Dispatcher>,
    /// Bus for watch-status and match notifications.
    pub bus: EventBus,
    /// Tick interval between polls.
    pub interval: Duration,
    /// Text prepended to the matched line in the alert body.
    pub alert_prefix: String,
    /// Application user ids to alert on each match.
    pub recipients: Vec<String>,
    /// Providers to fan each alert out to.
    pub providers: Vec<ProviderKind>,
}

/// Run the tail loop until the stop flag flips.
///
/// Each tick polls the tailer, runs the matcher over any new lines, and
/// dispatches one alert per match event. Transient conditions (missing
/// file, failed read) are reported on the bus and retried next tick.
pub async fn run_tail_loop(mut deps: TailLoopDeps, mut stop_rx: watch::Receiver<bool>) {
    info!(
        path = %deps.tailer.path().display(),
        interval_ms = u64::try_from(deps.interval.as_millis()).unwrap_or(u64::MAX),
        "tail loop started"
    );

    let mut interval = tokio::time::interval(deps.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut was_missing = false;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_tick(&mut deps, &mut was_missing).await;
            }
            result = stop_rx.changed() => {
                if result.is_err() || *stop_rx.borrow() {
                    info!("tail loop shutting down");
                    break;
                }
            }
        }
    }

    info!("tail loop stopped");
}

/// Execute a single tail tick.
async fn run_tick(deps: &mut TailLoopDeps, was_missing: &mut bool) {
    match deps.tailer.poll() {
        TailPoll::Unchanged => {}
        TailPoll::Missing => {
            // Report the transition once, not every tick.
            if !*was_missing {
                warn!(path = %deps.tailer.path().display(), "watched file missing");
                deps.bus.status(format!(
                    "waiting for {} to appear",
                    deps.tailer.path().display()
                ));
                *was_missing = true;
            }
            return;
        }
        TailPoll::Transient(cause) => {
            warn!(error = %cause, "tail poll failed; will retry");
            deps.bus.status(format!("read failed, retrying: {cause}"));
            return;
        }
        TailPoll::Lines { lines, truncated } => {
            if truncated {
                deps.bus
                    .status("file truncated; rescanning current content as new");
            }
            if !lines.is_empty() {
                debug!(count = lines.len(), "new lines read");
            }

            let events = matcher::match_lines(&lines, deps.tailer.patterns());
            for event in events {
                info!(pattern = %event.pattern, line = %event.line, "pattern matched");
                deps.bus.emit(CoreEvent::MatchFound {
                    pattern: event.pattern.clone(),
                    line: event.line.clone(),
                });

                let body = format!("{}{}", deps.alert_prefix, event.line);
                for recipient in &deps.recipients {
                    deps.dispatcher
                        .dispatch(&body, recipient, &deps.providers)
                        .await;
                }
            }
        }
    }
    *was_missing = false;
}
