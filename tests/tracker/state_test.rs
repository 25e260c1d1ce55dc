//! Delivery state machine transitions and check-one semantics.

use std::collections::HashMap;
use std::sync::Arc;

use logsentry::config::TrackerSection;
use logsentry::events::{CoreEvent, EventBus};
use logsentry::providers::{NotificationProvider, ProviderKind, SendOutcome};
use logsentry::tracker::{DeliveryTracker, MessageState};

use crate::mock_provider::{MockProvider, SendBehavior, StatusBehavior};

fn tracker_with(
    provider: Arc<MockProvider>,
    config: &TrackerSection,
    bus: EventBus,
) -> DeliveryTracker {
    let mut providers: HashMap<ProviderKind, Arc<dyn NotificationProvider>> = HashMap::new();
    providers.insert(provider.kind(), provider);
    DeliveryTracker::new(providers, bus, config)
}

fn fast_config() -> TrackerSection {
    TrackerSection {
        sweep_interval_secs: 1,
        poll_horizon_hours: 48,
        status_call_delay_ms: 0,
    }
}

fn accepted(id: &str) -> SendOutcome {
    SendOutcome {
        accepted: true,
        provider_message_id: Some(id.to_owned()),
        ..SendOutcome::default()
    }
}

#[tokio::test]
async fn accepted_send_with_id_moves_to_sent() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Accept(Some("abc123".to_owned())),
        true,
    ));
    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let tracker = tracker_with(provider, &fast_config(), bus);

    let id = tracker.record("+15551234567", "alert", ProviderKind::Sms).await;
    let state = tracker.apply_send_outcome(id, &accepted("abc123"), true).await;

    assert_eq!(state, MessageState::Sent);
    let message = tracker.get(id).await.expect("recorded");
    assert_eq!(message.provider_id.as_deref(), Some("abc123"));
    assert_eq!(
        events.recv().await.expect("event"),
        CoreEvent::MessageStateChanged {
            id,
            old: MessageState::Pending,
            new: MessageState::Sent,
        }
    );
}

#[tokio::test]
async fn declined_send_moves_to_rejected() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Decline("out of quota".to_owned()),
        true,
    ));
    let tracker = tracker_with(provider, &fast_config(), EventBus::new());

    let id = tracker.record("+15551234567", "alert", ProviderKind::Sms).await;
    let outcome = SendOutcome {
        accepted: false,
        error: Some("out of quota".to_owned()),
        ..SendOutcome::default()
    };
    let state = tracker.apply_send_outcome(id, &outcome, true).await;

    assert_eq!(state, MessageState::Rejected);
    let message = tracker.get(id).await.expect("recorded");
    assert_eq!(message.error.as_deref(), Some("out of quota"));
}

#[tokio::test]
async fn accepted_on_statusless_provider_resolves_to_delivered() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Chat,
        SendBehavior::Accept(None),
        false,
    ));
    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let tracker = tracker_with(Arc::clone(&provider), &fast_config(), bus);

    let id = tracker.record("880044", "alert", ProviderKind::Chat).await;
    let outcome = SendOutcome {
        accepted: true,
        ..SendOutcome::default()
    };
    let state = tracker.apply_send_outcome(id, &outcome, false).await;

    assert_eq!(state, MessageState::Delivered);
    // Passes through Sent, both transitions observable.
    assert!(matches!(
        events.recv().await.expect("event"),
        CoreEvent::MessageStateChanged { new: MessageState::Sent, .. }
    ));
    assert!(matches!(
        events.recv().await.expect("event"),
        CoreEvent::MessageStateChanged { new: MessageState::Delivered, .. }
    ));

    // Delivered is terminal; a check makes no network call.
    assert_eq!(tracker.check_one(id).await, Some(MessageState::Delivered));
    assert_eq!(provider.status_calls(), 0);
}

#[tokio::test]
async fn terminal_recheck_is_a_cached_noop() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Accept(Some("abc123".to_owned())),
        true,
    ));
    let tracker = tracker_with(Arc::clone(&provider), &fast_config(), EventBus::new());

    let id = tracker.record("+15551234567", "alert", ProviderKind::Sms).await;
    tracker.apply_send_outcome(id, &accepted("abc123"), true).await;

    provider.set_status(StatusBehavior::Status("DELIVERED".to_owned()));
    assert_eq!(tracker.check_one(id).await, Some(MessageState::Delivered));
    assert_eq!(provider.status_calls(), 1);

    // Second and third checks return the cached state, zero further calls.
    assert_eq!(tracker.check_one(id).await, Some(MessageState::Delivered));
    assert_eq!(tracker.check_one(id).await, Some(MessageState::Delivered));
    assert_eq!(provider.status_calls(), 1);
}

#[tokio::test]
async fn failed_provider_status_moves_to_failed() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Accept(Some("abc123".to_owned())),
        true,
    ));
    let tracker = tracker_with(Arc::clone(&provider), &fast_config(), EventBus::new());

    let id = tracker.record("+15551234567", "alert", ProviderKind::Sms).await;
    tracker.apply_send_outcome(id, &accepted("abc123"), true).await;

    provider.set_status(StatusBehavior::Status("FAILED".to_owned()));
    assert_eq!(tracker.check_one(id).await, Some(MessageState::Failed));
}

#[tokio::test]
async fn non_terminal_provider_status_stays_sent() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Accept(Some("abc123".to_owned())),
        true,
    ));
    let tracker = tracker_with(Arc::clone(&provider), &fast_config(), EventBus::new());

    let id = tracker.record("+15551234567", "alert", ProviderKind::Sms).await;
    tracker.apply_send_outcome(id, &accepted("abc123"), true).await;

    provider.set_status(StatusBehavior::Status("SENDING".to_owned()));
    assert_eq!(tracker.check_one(id).await, Some(MessageState::Sent));
}

#[tokio::test]
async fn unknown_status_id_leaves_message_sent() {
    // Scenario: message Sent with id "abc123", status endpoint 404s.
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Accept(Some("abc123".to_owned())),
        true,
    ));
    let tracker = tracker_with(Arc::clone(&provider), &fast_config(), EventBus::new());

    let id = tracker.record("+15551234567", "alert", ProviderKind::Sms).await;
    tracker.apply_send_outcome(id, &accepted("abc123"), true).await;

    provider.set_status(StatusBehavior::NotFound);
    assert_eq!(tracker.check_one(id).await, Some(MessageState::Sent));
    assert_eq!(provider.status_calls(), 1);
}

#[tokio::test]
async fn transient_status_failure_leaves_message_sent() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Accept(Some("abc123".to_owned())),
        true,
    ));
    let tracker = tracker_with(Arc::clone(&provider), &fast_config(), EventBus::new());

    let id = tracker.record("+15551234567", "alert", ProviderKind::Sms).await;
    tracker.apply_send_outcome(id, &accepted("abc123"), true).await;

    provider.set_status(StatusBehavior::TransportError);
    assert_eq!(tracker.check_one(id).await, Some(MessageState::Sent));

    // A later check can still resolve it.
    provider.set_status(StatusBehavior::Status("DELIVERED".to_owned()));
    assert_eq!(tracker.check_one(id).await, Some(MessageState::Delivered));
}

#[tokio::test]
async fn horizon_elapse_moves_sent_to_unknown_without_a_call() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Accept(Some("abc123".to_owned())),
        true,
    ));
    let config = TrackerSection {
        sweep_interval_secs: 1,
        poll_horizon_hours: 0,
        status_call_delay_ms: 0,
    };
    let tracker = tracker_with(Arc::clone(&provider), &config, EventBus::new());

    let id = tracker.record("+15551234567", "alert", ProviderKind::Sms).await;
    tracker.apply_send_outcome(id, &accepted("abc123"), true).await;

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert_eq!(tracker.check_one(id).await, Some(MessageState::Unknown));
    assert_eq!(provider.status_calls(), 0, "horizon check precedes polling");

    // Unknown is terminal: no further transition, no further calls.
    provider.set_status(StatusBehavior::Status("DELIVERED".to_owned()));
    assert_eq!(tracker.check_one(id).await, Some(MessageState::Unknown));
    assert_eq!(provider.status_calls(), 0);
}

#[tokio::test]
async fn accepted_without_id_is_never_polled() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Accept(None),
        true,
    ));
    let tracker = tracker_with(Arc::clone(&provider), &fast_config(), EventBus::new());

    let id = tracker.record("+15551234567", "alert", ProviderKind::Sms).await;
    let outcome = SendOutcome {
        accepted: true,
        ..SendOutcome::default()
    };
    assert_eq!(
        tracker.apply_send_outcome(id, &outcome, true).await,
        MessageState::Sent
    );
    assert_eq!(tracker.check_one(id).await, Some(MessageState::Sent));
    assert_eq!(provider.status_calls(), 0);
}

#[tokio::test]
async fn unrecorded_id_returns_none() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Accept(None),
        true,
    ));
    let tracker = tracker_with(provider, &fast_config(), EventBus::new());
    assert_eq!(tracker.check_one(uuid::Uuid::new_v4()).await, None);
}

#[tokio::test]
async fn history_is_ordered_and_clearable() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Accept(None),
        true,
    ));
    let tracker = tracker_with(provider, &fast_config(), EventBus::new());

    let first = tracker.record("a", "one", ProviderKind::Sms).await;
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let second = tracker.record("b", "two", ProviderKind::Sms).await;

    let history = tracker.history().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, first);
    assert_eq!(history[1].id, second);

    tracker.clear_history().await;
    assert!(tracker.history().await.is_empty());
}
