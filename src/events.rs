//! Outward-facing event bus.
//!
//! The core emits discrete notifications — watch status text, pattern
//! matches, message state transitions — that a frontend subscribes to.
//! Delivery is best-effort: a subscriber that lags past the channel
//! capacity loses the oldest events rather than blocking the core.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::tracker::MessageState;

/// Capacity of the broadcast channel backing the bus.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A notification emitted by the core. Carries no response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// Human-readable status text from the watch pipeline.
    WatchStatus(String),
    /// A configured pattern matched a newly appended line.
    MatchFound {
        /// The pattern that matched.
        pattern: String,
        /// The full line it matched in.
        line: String,
    },
    /// An outbound message moved to a new delivery state.
    MessageStateChanged {
        /// Tracker-assigned message id.
        id: Uuid,
        /// State before the transition.
        old: MessageState,
        /// State after the transition.
        new: MessageState,
    },
}

/// Publish/subscribe fan-out for [`CoreEvent`]s.
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Create a new bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all current subscribers.
    ///
    /// A send with no subscribers is not an error; the event is dropped.
    pub fn emit(&self, event: CoreEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit a [`CoreEvent::WatchStatus`] with the given text.
    pub fn status(&self, text: impl Into<String>) {
        self.emit(CoreEvent::WatchStatus(text.into()));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
