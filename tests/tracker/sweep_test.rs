//! Batch sweep behavior: eligibility, isolation of per-message failures,
//! and the background sweep loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use logsentry::config::TrackerSection;
use logsentry::events::EventBus;
use logsentry::providers::{NotificationProvider, ProviderKind, SendOutcome};
use logsentry::tasks::LoopHandle;
use logsentry::tracker::{run_sweep_loop, DeliveryTracker, MessageState};

use crate::mock_provider::{MockProvider, SendBehavior, StatusBehavior};

fn fast_config() -> TrackerSection {
    TrackerSection {
        sweep_interval_secs: 1,
        poll_horizon_hours: 48,
        status_call_delay_ms: 0,
    }
}

fn tracker_with(provider: Arc<MockProvider>, config: &TrackerSection) -> DeliveryTracker {
    let mut providers: HashMap<ProviderKind, Arc<dyn NotificationProvider>> = HashMap::new();
    providers.insert(provider.kind(), provider);
    DeliveryTracker::new(providers, EventBus::new(), config)
}

async fn record_sent(tracker: &DeliveryTracker, provider_id: &str) -> uuid::Uuid {
    let id = tracker
        .record("+15551234567", "alert", ProviderKind::Sms)
        .await;
    let outcome = SendOutcome {
        accepted: true,
        provider_message_id: Some(provider_id.to_owned()),
        ..SendOutcome::default()
    };
    tracker.apply_send_outcome(id, &outcome, true).await;
    id
}

#[tokio::test]
async fn sweep_checks_every_sent_message() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Accept(None),
        true,
    ));
    let tracker = tracker_with(Arc::clone(&provider), &fast_config());

    let a = record_sent(&tracker, "id-a").await;
    let b = record_sent(&tracker, "id-b").await;
    let c = record_sent(&tracker, "id-c").await;

    provider.set_status(StatusBehavior::Status("DELIVERED".to_owned()));
    tracker.sweep().await;

    assert_eq!(provider.status_calls(), 3);
    for id in [a, b, c] {
        assert_eq!(
            tracker.get(id).await.map(|m| m.state),
            Some(MessageState::Delivered)
        );
    }
}

#[tokio::test]
async fn sweep_skips_pending_and_terminal_messages() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Accept(None),
        true,
    ));
    let tracker = tracker_with(Arc::clone(&provider), &fast_config());

    // Pending: never offered to the provider yet.
    let pending = tracker
        .record("+15551234567", "alert", ProviderKind::Sms)
        .await;

    // Rejected: terminal.
    let rejected = tracker
        .record("+15551234567", "alert", ProviderKind::Sms)
        .await;
    tracker.reject(rejected, "no binding").await;

    tracker.sweep().await;
    assert_eq!(provider.status_calls(), 0);
    assert_eq!(
        tracker.get(pending).await.map(|m| m.state),
        Some(MessageState::Pending)
    );
    assert_eq!(
        tracker.get(rejected).await.map(|m| m.state),
        Some(MessageState::Rejected)
    );
}

#[tokio::test]
async fn one_bad_response_does_not_abort_the_sweep() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Accept(None),
        true,
    ));
    let tracker = tracker_with(Arc::clone(&provider), &fast_config());

    let first = record_sent(&tracker, "id-1").await;
    let second = record_sent(&tracker, "id-2").await;

    // Every check fails this pass; both messages survive as Sent.
    provider.set_status(StatusBehavior::TransportError);
    tracker.sweep().await;
    assert_eq!(provider.status_calls(), 2, "sweep reached both messages");
    for id in [first, second] {
        assert_eq!(
            tracker.get(id).await.map(|m| m.state),
            Some(MessageState::Sent)
        );
    }

    // Next sweep resolves them.
    provider.set_status(StatusBehavior::Status("DELIVERED".to_owned()));
    tracker.sweep().await;
    for id in [first, second] {
        assert_eq!(
            tracker.get(id).await.map(|m| m.state),
            Some(MessageState::Delivered)
        );
    }
}

#[tokio::test]
async fn sweep_loop_stops_within_the_join_timeout() {
    let provider = Arc::new(MockProvider::new(
        ProviderKind::Sms,
        SendBehavior::Accept(None),
        true,
    ));
    let tracker = Arc::new(tracker_with(provider, &fast_config()));

    let handle = LoopHandle::spawn({
        let tracker = Arc::clone(&tracker);
        move |stop_rx| run_sweep_loop(tracker, Duration::from_millis(20), stop_rx)
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle
        .stop(Duration::from_secs(1))
        .await
        .expect("sweep loop should observe the stop flag and exit");
}
