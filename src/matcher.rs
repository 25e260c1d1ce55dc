//! Pattern matching over newly appended lines.
//!
//! Matching is case-insensitive substring containment, independent per
//! pattern: a line may match zero, one, or many patterns, and each match
//! yields its own [`MatchEvent`]. Pure function, no state.

use chrono::{DateTime, Utc};

/// One pattern occurrence in one line.
///
/// Produced once per (pattern, line) pair; a line matching several patterns
/// produces several events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEvent {
    /// The configured pattern that matched.
    pub pattern: String,
    /// The complete line it matched in.
    pub line: String,
    /// When the match was detected.
    pub timestamp: DateTime<Utc>,
}

/// Scan `lines` for `patterns`, yielding events in line order and, within a
/// line, in pattern-list order.
pub fn match_lines(lines: &[String], patterns: &[String]) -> Vec<MatchEvent> {
    let mut events = Vec::new();
    for line in lines {
        let line_lower = line.to_lowercase();
        for pattern in patterns {
            if pattern.is_empty() {
                continue;
            }
            if line_lower.contains(&pattern.to_lowercase()) {
                events.push(MatchEvent {
                    pattern: pattern.clone(),
                    line: line.clone(),
                    timestamp: Utc::now(),
                });
            }
        }
    }
    events
}
