//! HTTP SMS gateway provider (TextBelt wire contract).
//!
//! Send: POST form `{phone, message, key}` → JSON `{success, textId?,
//! error?, quotaRemaining?}`. Status: GET `{textId, key}` → JSON
//! `{status}`; a 404 means the id is unknown or expired and maps to
//! [`StatusCheck::NotFound`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::SmsSection;

use super::{
    check_http_response, NotificationProvider, ProviderError, ProviderKind, SendOutcome,
    StatusCheck, StatusPoll,
};

/// Test number accepted by the gateway for dry-run requests.
const TEST_PHONE: &str = "5555555555";

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Gateway send response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct SmsSendResponse {
    /// Whether the gateway accepted the message.
    pub success: bool,
    /// Assigned message id, present on acceptance.
    #[serde(rename = "textId")]
    pub text_id: Option<String>,
    /// Gateway error, present on decline.
    pub error: Option<String>,
    /// Remaining quota for the key, when reported.
    #[serde(rename = "quotaRemaining")]
    pub quota_remaining: Option<u64>,
}

/// Gateway status response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct SmsStatusResponse {
    /// Delivery status string, e.g. `SENT`, `DELIVERED`, `FAILED`.
    pub status: String,
}

/// Parse a gateway send response into a [`SendOutcome`].
///
/// # Errors
///
/// Returns `ProviderError::Parse` if the body is not the expected JSON.
#[doc(hidden)]
pub fn parse_send_response(body: &str) -> Result<SendOutcome, ProviderError> {
    let resp: SmsSendResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    Ok(SendOutcome {
        accepted: resp.success,
        provider_message_id: resp.text_id,
        error: resp.error,
        quota_remaining: resp.quota_remaining,
    })
}

/// Parse a gateway status response into a [`StatusCheck`].
///
/// # Errors
///
/// Returns `ProviderError::Parse` if the body is not the expected JSON.
#[doc(hidden)]
pub fn parse_status_response(body: &str) -> Result<StatusCheck, ProviderError> {
    let resp: SmsStatusResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    Ok(StatusCheck::Status(resp.status))
}

// ---------------------------------------------------------------------------
// Phone normalization
// ---------------------------------------------------------------------------

/// Normalize a phone number to E.164 form.
///
/// Numbers without a leading `+` use a NANP heuristic: a bare 10-digit
/// number is assumed US/Canada (`+1` prepended), and a number starting
/// with `1` of length ≥ 10 is assumed already country-coded. This is a
/// documented approximation, ambiguous for many non-NANP 10-digit numbers;
/// anything else without a country code is rejected.
///
/// # Errors
///
/// Returns a human-readable reason when the number cannot be normalized.
pub fn normalize_phone(phone: &str) -> Result<String, String> {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();

    if digits.len() < 8 {
        return Err(format!("invalid phone number {phone:?}: too few digits"));
    }
    if digits.len() > 15 {
        return Err(format!("invalid phone number {phone:?}: too many digits"));
    }

    if phone.trim_start().starts_with('+') {
        return Ok(format!("+{digits}"));
    }
    if digits.starts_with('1') && digits.len() >= 10 {
        return Ok(format!("+{digits}"));
    }
    if digits.len() == 10 {
        return Ok(format!("+1{digits}"));
    }
    Err(format!(
        "invalid phone number {phone:?}: missing country code (use +XX format)"
    ))
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// HTTP SMS gateway provider.
#[derive(Debug, Clone)]
pub struct SmsProvider {
    api_key: String,
    send_url: String,
    status_url: String,
    client: reqwest::Client,
}

impl SmsProvider {
    /// Create a provider from the `[sms]` config section.
    ///
    /// The per-call timeout is enforced by the HTTP client; a timed-out
    /// send surfaces as a transport error and is recorded as rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Request`] if the HTTP client cannot be built.
    pub fn new(config: &SmsSection) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            api_key: config.api_key.clone(),
            send_url: config.send_url.clone(),
            status_url: config.status_url.clone(),
            client,
        })
    }

    /// Whether the configured key selects the gateway's free tier.
    pub fn is_free_tier(&self) -> bool {
        self.api_key.eq_ignore_ascii_case("textbelt")
    }

    /// Dry-run request against the send endpoint: the `test` flag tells the
    /// gateway to validate the key without delivering anything. Surfaces
    /// quota remaining when reported.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport or parse failure.
    pub async fn test_connection(&self) -> Result<SendOutcome, ProviderError> {
        let response = self
            .client
            .post(&self.send_url)
            .form(&[
                ("phone", TEST_PHONE),
                ("message", "Test connection"),
                ("key", self.api_key.as_str()),
                ("test", "1"),
            ])
            .send()
            .await?;
        let body = check_http_response(response).await?;
        parse_send_response(&body)
    }
}

#[async_trait]
impl NotificationProvider for SmsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sms
    }

    async fn send(&self, address: &str, body: &str) -> Result<SendOutcome, ProviderError> {
        let phone = match normalize_phone(address) {
            Ok(p) => p,
            // Local decline, no network call.
            Err(reason) => {
                return Ok(SendOutcome {
                    accepted: false,
                    error: Some(reason),
                    ..SendOutcome::default()
                })
            }
        };

        tracing::debug!(send_url = %self.send_url, "sending sms");
        let response = self
            .client
            .post(&self.send_url)
            .form(&[
                ("phone", phone.as_str()),
                ("message", body),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;
        let text = check_http_response(response).await?;
        let outcome = parse_send_response(&text)?;

        if let Some(quota) = outcome.quota_remaining {
            tracing::info!(quota, "sms quota remaining");
        }
        Ok(outcome)
    }

    fn status_poll(&self) -> Option<&dyn StatusPoll> {
        Some(self)
    }
}

#[async_trait]
impl StatusPoll for SmsProvider {
    async fn check_status(
        &self,
        provider_message_id: &str,
    ) -> Result<StatusCheck, ProviderError> {
        let response = self
            .client
            .get(&self.status_url)
            .query(&[
                ("textId", provider_message_id),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        // The gateway only keeps status for recent messages; an expired or
        // unknown id is a 404, not a failure.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(StatusCheck::NotFound);
        }

        let body = check_http_response(response).await?;
        parse_status_response(&body)
    }
}
