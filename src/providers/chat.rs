//! Chat-bot direct-message provider.
//!
//! Delivers to a chat account id previously bound to an application user
//! by an out-of-band registration step. The bot API gives no delivery
//! status feedback, so this provider exposes no [`StatusPoll`] capability:
//! accepted messages resolve directly to `Delivered`.
//!
//! [`StatusPoll`]: super::StatusPoll

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ChatSection;

use super::{check_http_response, NotificationProvider, ProviderError, ProviderKind, SendOutcome};

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Bot API direct-message request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct ChatSendRequest<'a> {
    /// Bound chat account id.
    pub recipient_id: &'a str,
    /// Message text.
    pub content: &'a str,
}

/// Bot API direct-message response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct ChatSendResponse {
    /// Whether the bot delivered the message to the account.
    pub ok: bool,
    /// Bot-reported error, present on decline.
    pub error: Option<String>,
}

/// Parse a bot API send response into a [`SendOutcome`].
///
/// The bot assigns no message id; there is nothing to poll later.
///
/// # Errors
///
/// Returns `ProviderError::Parse` if the body is not the expected JSON.
#[doc(hidden)]
pub fn parse_send_response(body: &str) -> Result<SendOutcome, ProviderError> {
    let resp: ChatSendResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    Ok(SendOutcome {
        accepted: resp.ok,
        error: resp.error,
        ..SendOutcome::default()
    })
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Chat-bot direct-message provider.
#[derive(Debug, Clone)]
pub struct ChatProvider {
    base_url: String,
    bot_token: String,
    client: reqwest::Client,
}

impl ChatProvider {
    /// Create a provider from the `[chat]` config section.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Parse`] if no bot token is configured, or
    /// [`ProviderError::Request`] if the HTTP client cannot be built.
    pub fn new(config: &ChatSection) -> Result<Self, ProviderError> {
        let bot_token = config
            .bot_token
            .clone()
            .ok_or_else(|| ProviderError::Parse("chat bot token not configured".to_owned()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            bot_token,
            client,
        })
    }
}

#[async_trait]
impl NotificationProvider for ChatProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Chat
    }

    async fn send(&self, address: &str, body: &str) -> Result<SendOutcome, ProviderError> {
        let url = format!("{}/messages", self.base_url);
        tracing::debug!(url = %url, "sending chat direct message");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.bot_token)
            .json(&ChatSendRequest {
                recipient_id: address,
                content: body,
            })
            .send()
            .await?;
        let text = check_http_response(response).await?;
        parse_send_response(&text)
    }
}
