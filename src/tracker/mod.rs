//! Delivery lifecycle tracking.
//!
//! Every outbound message is recorded here before dispatch returns and is
//! owned by the tracker from then on. Messages move through a forward-only
//! state machine:
//!
//! ```text
//! Pending → Sent → Delivered | Failed | Unknown
//! Pending → Rejected
//! ```
//!
//! `Rejected`, `Delivered`, `Failed`, and `Unknown` are terminal.
//! `Unknown` marks a message whose provider never confirmed a terminal
//! status within the poll horizon; it is deliberately distinct from
//! `Failed`, which asserts a failure the provider actually reported.
//!
//! Only `Sent` messages on status-capable providers are poll-eligible.
//! Checks run on demand ([`DeliveryTracker::check_one`]) or as a batch
//! sweep ([`DeliveryTracker::sweep`]) with a small inter-call delay for
//! provider rate limits. Re-checking a terminal message is a cached no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TrackerSection;
use crate::events::{CoreEvent, EventBus};
use crate::providers::{NotificationProvider, ProviderKind, SendOutcome, StatusCheck};

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Delivery state of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    /// Created, not yet offered to the provider.
    Pending,
    /// Accepted by the provider; awaiting delivery confirmation.
    Sent,
    /// Declined locally or by the provider. Terminal.
    Rejected,
    /// Provider confirmed delivery. Terminal.
    Delivered,
    /// Provider confirmed a delivery failure. Terminal.
    Failed,
    /// Poll horizon elapsed without provider confirmation. Terminal.
    Unknown,
}

impl MessageState {
    /// Whether no further transition can occur from this state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Delivered | Self::Failed | Self::Unknown
        )
    }

    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Sent)
                | (Self::Pending, Self::Rejected)
                | (Self::Sent, Self::Delivered)
                | (Self::Sent, Self::Failed)
                | (Self::Sent, Self::Unknown)
        )
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Rejected => "rejected",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// One outbound message and its tracking metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Tracker-assigned id; the store key.
    pub id: Uuid,
    /// Provider-assigned id, set once the provider accepts the message.
    pub provider_id: Option<String>,
    /// Delivery address (or the unresolved application user id on a local
    /// rejection).
    pub recipient: String,
    /// Message text.
    pub body: String,
    /// Channel the message went out on.
    pub provider: ProviderKind,
    /// Creation time; the poll-horizon anchor.
    pub created_at: DateTime<Utc>,
    /// Current delivery state.
    pub state: MessageState,
    /// Most recent error or decline reason, if any.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Records outbound messages and drives their delivery state.
///
/// The store is an id-keyed map behind an async `RwLock`; transitions
/// re-validate the current state under the write lock, so a slow status
/// check can never overwrite a terminal state.
pub struct DeliveryTracker {
    store: RwLock<HashMap<Uuid, OutboundMessage>>,
    providers: HashMap<ProviderKind, Arc<dyn NotificationProvider>>,
    bus: EventBus,
    poll_horizon: chrono::Duration,
    status_call_delay: Duration,
}

impl DeliveryTracker {
    /// Create a tracker over the given provider set.
    pub fn new(
        providers: HashMap<ProviderKind, Arc<dyn NotificationProvider>>,
        bus: EventBus,
        config: &TrackerSection,
    ) -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
            providers,
            bus,
            // Clamped well below chrono's Duration bounds.
            poll_horizon: chrono::Duration::hours(
                i64::try_from(config.poll_horizon_hours.min(1_000_000)).unwrap_or(1_000_000),
            ),
            status_call_delay: Duration::from_millis(config.status_call_delay_ms),
        }
    }

    /// Record a new `Pending` message and return its id.
    pub async fn record(
        &self,
        recipient: impl Into<String>,
        body: impl Into<String>,
        provider: ProviderKind,
    ) -> Uuid {
        let message = OutboundMessage {
            id: Uuid::new_v4(),
            provider_id: None,
            recipient: recipient.into(),
            body: body.into(),
            provider,
            created_at: Utc::now(),
            state: MessageState::Pending,
            error: None,
        };
        let id = message.id;
        self.store.write().await.insert(id, message);
        debug!(%id, %provider, "message recorded");
        id
    }

    /// Apply a provider send outcome to a `Pending` message.
    ///
    /// Accepted messages move to `Sent`; on a provider with no status
    /// capability they continue straight on to `Delivered`, since acceptance
    /// is the only confirmation such a provider will ever give. Declined
    /// messages move to `Rejected`. Returns the resulting state.
    pub async fn apply_send_outcome(
        &self,
        id: Uuid,
        outcome: &SendOutcome,
        status_capable: bool,
    ) -> MessageState {
        if !outcome.accepted {
            self.transition(id, MessageState::Rejected, outcome.error.clone())
                .await;
            return MessageState::Rejected;
        }

        if let Some(provider_id) = &outcome.provider_message_id {
            let mut store = self.store.write().await;
            if let Some(message) = store.get_mut(&id) {
                message.provider_id = Some(provider_id.clone());
            }
        }

        self.transition(id, MessageState::Sent, None).await;
        if status_capable {
            return MessageState::Sent;
        }

        // Acceptance is the only confirmation a status-less provider will
        // ever give; resolve immediately rather than waiting out the horizon.
        self.transition(id, MessageState::Delivered, None).await;
        MessageState::Delivered
    }

    /// Mark a `Pending` message `Rejected` without a provider call (missing
    /// binding, unavailable provider, transport error).
    pub async fn reject(&self, id: Uuid, cause: impl Into<String>) {
        self.transition(id, MessageState::Rejected, Some(cause.into()))
            .await;
    }

    /// Fetch a snapshot of one message.
    pub async fn get(&self, id: Uuid) -> Option<OutboundMessage> {
        self.store.read().await.get(&id).cloned()
    }

    /// Snapshot of all recorded messages, oldest first.
    pub async fn history(&self) -> Vec<OutboundMessage> {
        let mut messages: Vec<OutboundMessage> =
            self.store.read().await.values().cloned().collect();
        messages.sort_by_key(|m| m.created_at);
        messages
    }

    /// Drop all recorded messages.
    pub async fn clear_history(&self) {
        self.store.write().await.clear();
        info!("message history cleared");
    }

    /// Check delivery status for one message.
    ///
    /// Terminal messages return their cached state with no network call.
    /// `Sent` messages past the poll horizon become `Unknown`. Otherwise a
    /// status-capable provider is queried: a terminal provider status
    /// transitions the message, an unknown id or transient failure leaves
    /// it `Sent` for a later sweep. Returns the (possibly updated) state,
    /// or `None` for an unrecorded id.
    pub async fn check_one(&self, id: Uuid) -> Option<MessageState> {
        let message = self.get(id).await?;

        if message.state.is_terminal() {
            return Some(message.state);
        }
        if message.state != MessageState::Sent {
            return Some(message.state);
        }

        if Utc::now().signed_duration_since(message.created_at) > self.poll_horizon {
            self.transition(
                id,
                MessageState::Unknown,
                Some("poll horizon elapsed without provider confirmation".to_owned()),
            )
            .await;
            return self.get(id).await.map(|m| m.state);
        }

        let Some(provider) = self.providers.get(&message.provider) else {
            warn!(%id, provider = %message.provider, "no provider registered for status check");
            return Some(MessageState::Sent);
        };
        let Some(poller) = provider.status_poll() else {
            // Statically status-less providers never reach Sent, but a
            // registered provider set can change across restarts.
            return Some(MessageState::Sent);
        };
        let Some(provider_id) = message.provider_id.as_deref() else {
            // Accepted without an id: nothing to poll, ages into Unknown.
            return Some(MessageState::Sent);
        };

        // Network call runs without the store lock held.
        match poller.check_status(provider_id).await {
            Ok(StatusCheck::Status(status)) => {
                debug!(%id, provider_id, status = %status, "status check result");
                match status.to_uppercase().as_str() {
                    "DELIVERED" => {
                        self.transition(id, MessageState::Delivered, None).await;
                    }
                    "FAILED" => {
                        self.transition(id, MessageState::Failed, Some(status)).await;
                    }
                    // Non-terminal provider status; stay Sent.
                    _ => {}
                }
            }
            Ok(StatusCheck::NotFound) => {
                info!(%id, provider_id, "status id unknown or expired at provider");
            }
            Err(e) => {
                // Transient; the next sweep retries.
                warn!(%id, provider_id, error = %e, "status check failed");
            }
        }

        self.get(id).await.map(|m| m.state)
    }

    /// Batch status check over every poll-eligible message.
    ///
    /// One message's bad response never aborts the sweep; calls are spaced
    /// by the configured delay to respect provider rate limits.
    pub async fn sweep(&self) {
        let eligible: Vec<Uuid> = {
            let store = self.store.read().await;
            store
                .values()
                .filter(|m| m.state == MessageState::Sent)
                .map(|m| m.id)
                .collect()
        };

        if eligible.is_empty() {
            return;
        }
        debug!(count = eligible.len(), "sweeping sent messages");

        for (i, id) in eligible.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.status_call_delay).await;
            }
            self.check_one(*id).await;
        }
    }

    /// Apply a state transition if the state machine permits it.
    ///
    /// The current state is re-read under the write lock, so concurrent
    /// checkers cannot move a message out of a terminal state. Emits
    /// [`CoreEvent::MessageStateChanged`] on success.
    async fn transition(&self, id: Uuid, to: MessageState, error: Option<String>) {
        let mut store = self.store.write().await;
        let Some(message) = store.get_mut(&id) else {
            warn!(%id, "transition for unrecorded message ignored");
            return;
        };

        let from = message.state;
        if !from.can_transition_to(to) {
            if from != to {
                debug!(%id, %from, %to, "transition not permitted, ignoring");
            }
            return;
        }

        message.state = to;
        if error.is_some() {
            message.error = error;
        }
        drop(store);

        info!(%id, %from, %to, "message state changed");
        self.bus.emit(CoreEvent::MessageStateChanged {
            id,
            old: from,
            new: to,
        });
    }
}

// ---------------------------------------------------------------------------
// Background loop
// ---------------------------------------------------------------------------

/// Run the periodic sweep loop until the stop flag flips.
pub async fn run_sweep_loop(
    tracker: Arc<DeliveryTracker>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "sweep loop started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the immediate first tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tracker.sweep().await;
            }
            result = stop_rx.changed() => {
                if result.is_err() || *stop_rx.borrow() {
                    info!("sweep loop shutting down");
                    break;
                }
            }
        }
    }

    info!("sweep loop stopped");
}
