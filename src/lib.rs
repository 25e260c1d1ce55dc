//! Logsentry — pattern-triggered log alerting.
//!
//! Watches a growing text file, matches configured patterns in newly
//! appended lines, and dispatches alerts over SMS or chat direct message,
//! tracking each outbound message through its delivery lifecycle.
//!
//! See `DESIGN.md` for architecture documentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod events;
pub mod tasks;

pub mod dispatch;
pub mod matcher;
pub mod providers;
pub mod tailer;
pub mod tracker;
