//! Cancellable background task handle.
//!
//! Both periodic loops (file tailing, delivery sweeps) run as Tokio tasks
//! watching a shared stop flag. [`LoopHandle::stop`] flips the flag and
//! joins the task with a bounded timeout, so a stuck loop is reported
//! instead of silently abandoned.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Failure modes when stopping a background loop.
#[derive(Debug, Error)]
pub enum StopError {
    /// The loop did not observe the stop flag and exit within the timeout.
    #[error("background loop did not exit within {0:?}")]
    Timeout(Duration),
    /// The task panicked or was aborted before joining.
    #[error("background loop join failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Handle to a spawned background loop.
///
/// The loop receives a `watch::Receiver<bool>` and must exit promptly once
/// the value turns `true` (or the sender side is dropped).
pub struct LoopHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    /// Spawn a loop body, handing it the stop-flag receiver.
    pub fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(body(stop_rx));
        Self { stop_tx, join }
    }

    /// Signal the loop to stop and wait for it to exit.
    ///
    /// Returns only after the loop has observed the flag and exited, or the
    /// timeout elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`StopError::Timeout`] if the loop does not exit within
    /// `timeout`, or [`StopError::Join`] if the task panicked.
    pub async fn stop(self, timeout: Duration) -> Result<(), StopError> {
        let _ = self.stop_tx.send(true);
        match tokio::time::timeout(timeout, self.join).await {
            Ok(join_result) => {
                join_result?;
                Ok(())
            }
            Err(_) => Err(StopError::Timeout(timeout)),
        }
    }

    /// Whether the loop has already exited on its own.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
