//! Alert dispatch: recipient resolution and provider fan-out.
//!
//! The [`Dispatcher`] routes one alert to a set of providers. Each
//! provider's attempt is independent: a missing binding or a transport
//! error on one channel is recorded as a rejected message and never
//! blocks, rolls back, or hides another channel's outcome. Every attempted
//! message is handed to the [`DeliveryTracker`] before `dispatch` returns.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::events::EventBus;
use crate::providers::{NotificationProvider, ProviderKind};
use crate::tracker::{DeliveryTracker, MessageState};

// ---------------------------------------------------------------------------
// Recipient bindings
// ---------------------------------------------------------------------------

/// Maps application user ids to provider-specific delivery addresses.
///
/// At most one address per (user, provider); registering again overwrites
/// (last write wins). Bindings come from explicit registration only, never
/// inference.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    inner: RwLock<HashMap<(String, ProviderKind), String>>,
}

impl BindingRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the address for a user on one provider.
    pub async fn register(
        &self,
        user_id: impl Into<String>,
        provider: ProviderKind,
        address: impl Into<String>,
    ) {
        let user_id = user_id.into();
        let previous = self
            .inner
            .write()
            .await
            .insert((user_id.clone(), provider), address.into());
        if previous.is_some() {
            info!(user = %user_id, %provider, "recipient binding replaced");
        } else {
            info!(user = %user_id, %provider, "recipient binding registered");
        }
    }

    /// Look up the address bound to a user on one provider.
    pub async fn resolve(&self, user_id: &str, provider: ProviderKind) -> Option<String> {
        self.inner
            .read()
            .await
            .get(&(user_id.to_owned(), provider))
            .cloned()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Per-provider result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Tracker id of the recorded message.
    pub message_id: Uuid,
    /// State the message ended the dispatch in.
    pub state: MessageState,
    /// Decline reason or transport error, if any.
    pub error: Option<String>,
}

/// Routes alerts to providers and records every attempt with the tracker.
pub struct Dispatcher {
    providers: HashMap<ProviderKind, Arc<dyn NotificationProvider>>,
    bindings: Arc<BindingRegistry>,
    tracker: Arc<DeliveryTracker>,
    bus: EventBus,
}

impl Dispatcher {
    /// Create a dispatcher over the given provider set.
    pub fn new(
        providers: HashMap<ProviderKind, Arc<dyn NotificationProvider>>,
        bindings: Arc<BindingRegistry>,
        tracker: Arc<DeliveryTracker>,
        bus: EventBus,
    ) -> Self {
        Self {
            providers,
            bindings,
            tracker,
            bus,
        }
    }

    /// The binding registry this dispatcher resolves recipients through.
    pub fn bindings(&self) -> &Arc<BindingRegistry> {
        &self.bindings
    }

    /// Send `body` to `recipient` (an application user id) over each
    /// requested provider, sequentially. Returns one outcome per requested
    /// provider; partial results are never dropped.
    pub async fn dispatch(
        &self,
        body: &str,
        recipient: &str,
        kinds: &[ProviderKind],
    ) -> BTreeMap<ProviderKind, DispatchOutcome> {
        let mut outcomes = BTreeMap::new();
        for kind in kinds {
            let outcome = self.dispatch_one(body, recipient, *kind).await;
            outcomes.insert(*kind, outcome);
        }
        outcomes
    }

    /// Attempt delivery on a single provider.
    async fn dispatch_one(
        &self,
        body: &str,
        recipient: &str,
        kind: ProviderKind,
    ) -> DispatchOutcome {
        let Some(provider) = self.providers.get(&kind) else {
            let cause = format!("provider {kind} not available");
            warn!(user = %recipient, %kind, "dispatch to unavailable provider");
            let id = self.tracker.record(recipient, body, kind).await;
            self.tracker.reject(id, cause.clone()).await;
            return DispatchOutcome {
                message_id: id,
                state: MessageState::Rejected,
                error: Some(cause),
            };
        };

        // No binding: reject locally, no network call.
        let Some(address) = self.bindings.resolve(recipient, kind).await else {
            let cause = format!("no {kind} binding for user {recipient:?}");
            warn!(user = %recipient, %kind, "dispatch without recipient binding");
            let id = self.tracker.record(recipient, body, kind).await;
            self.tracker.reject(id, cause.clone()).await;
            return DispatchOutcome {
                message_id: id,
                state: MessageState::Rejected,
                error: Some(cause),
            };
        };

        let id = self.tracker.record(&address, body, kind).await;

        match provider.send(&address, body).await {
            Ok(outcome) => {
                if let Some(quota) = outcome.quota_remaining {
                    self.bus.status(format!("{kind} quota remaining: {quota}"));
                }
                let status_capable = provider.status_poll().is_some();
                let state = self
                    .tracker
                    .apply_send_outcome(id, &outcome, status_capable)
                    .await;
                info!(message = %id, %kind, %state, "dispatch attempt finished");
                DispatchOutcome {
                    message_id: id,
                    state,
                    error: outcome.error,
                }
            }
            // Transport errors stop at this provider's outcome.
            Err(e) => {
                let cause = e.to_string();
                warn!(message = %id, %kind, error = %cause, "provider send failed");
                self.tracker.reject(id, cause.clone()).await;
                DispatchOutcome {
                    message_id: id,
                    state: MessageState::Rejected,
                    error: Some(cause),
                }
            }
        }
    }
}
