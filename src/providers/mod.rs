//! Notification provider abstraction layer.
//!
//! Defines the [`NotificationProvider`] trait and the shared outcome types
//! used by all provider implementations.
//!
//! Two providers are implemented:
//! - [`sms::SmsProvider`] — HTTP SMS gateway (TextBelt wire contract)
//! - [`chat::ChatProvider`] — chat-bot direct message
//!
//! Status polling is a separate capability ([`StatusPoll`]): a provider
//! either exposes it through [`NotificationProvider::status_poll`] or is
//! statically known not to, and the delivery tracker tolerates both.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod chat;
pub mod sms;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Delivery channel a message goes out on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// SMS over an HTTP gateway.
    Sms,
    /// Chat-bot direct message.
    Chat,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sms => write!(f, "sms"),
            Self::Chat => write!(f, "chat"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sms" => Ok(Self::Sms),
            "chat" => Ok(Self::Chat),
            other => Err(format!("unknown provider {other:?}, expected sms or chat")),
        }
    }
}

/// Result of a send attempt, as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SendOutcome {
    /// Whether the provider accepted the message for delivery.
    pub accepted: bool,
    /// Provider-assigned message id, when accepted and issued.
    pub provider_message_id: Option<String>,
    /// Provider-reported error, when declined.
    pub error: Option<String>,
    /// Remaining send quota, when the provider reports one.
    pub quota_remaining: Option<u64>,
}

/// Result of a delivery status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCheck {
    /// Provider-reported status string (e.g. `SENT`, `DELIVERED`, `FAILED`).
    Status(String),
    /// The id is unknown or expired at the provider. Not an error; the
    /// caller leaves the message as-is.
    NotFound,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by notification providers.
///
/// These never cross the dispatcher or tracker boundary: a send error is
/// recorded as a rejected message, a status-check error is logged and the
/// check retried on a later sweep.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure, including the per-call timeout.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match the expected schema.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// Upstream provider responded with an error status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Raw response body, truncated.
        body: String,
    },
}

// ---------------------------------------------------------------------------
// HTTP helpers (useful for all providers)
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure,
/// `ProviderError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: truncate_error_body(&body),
        });
    }
    Ok(body)
}

fn truncate_error_body(raw: &str) -> String {
    const MAX_ERROR_BODY_CHARS: usize = 256;

    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = collapsed
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }
    collapsed
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Status-polling capability, exposed only by providers whose upstream has
/// a status endpoint.
#[async_trait]
pub trait StatusPoll: Send + Sync {
    /// Query delivery status for a provider-assigned message id.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport or parse failure. An unknown
    /// id is [`StatusCheck::NotFound`], not an error.
    async fn check_status(&self, provider_message_id: &str)
        -> Result<StatusCheck, ProviderError>;
}

/// Core notification provider interface.
///
/// Implementations must be `Send + Sync` to allow use across the dispatch
/// and sweep task boundaries. Calls must not outlive the per-call timeout
/// configured on the provider's HTTP client.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// The channel this provider delivers on.
    fn kind(&self) -> ProviderKind;

    /// Deliver `body` to the provider-specific `address`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport or parse failure; a provider
    /// that explicitly declines reports it via
    /// [`SendOutcome::accepted`] = `false` instead.
    async fn send(&self, address: &str, body: &str) -> Result<SendOutcome, ProviderError>;

    /// The status-polling capability, if this provider has one.
    ///
    /// Messages on providers without it resolve directly to `Delivered`
    /// once accepted.
    fn status_poll(&self) -> Option<&dyn StatusPoll> {
        None
    }
}
