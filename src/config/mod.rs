//! Configuration loading and management.
//!
//! Loads configuration from `./logsentry.toml` (or `$LOGSENTRY_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

// ── Top-level config ────────────────────────────────────────────

/// Top-level logsentry configuration loaded from TOML.
///
/// Path: `./logsentry.toml` or `$LOGSENTRY_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SentryConfig {
    /// File-watch settings (`[watch]`).
    pub watch: WatchSection,
    /// SMS provider settings (`[sms]`).
    pub sms: SmsSection,
    /// Chat provider settings (`[chat]`).
    pub chat: ChatSection,
    /// Delivery tracker settings (`[tracker]`).
    pub tracker: TrackerSection,
    /// Logging settings (`[log]`).
    pub log: LogSection,
}

impl SentryConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$LOGSENTRY_CONFIG_PATH` or `./logsentry.toml`.
    /// If the file does not exist, returns defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: SentryConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(SentryConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve config file path.
    ///
    /// Checks `$LOGSENTRY_CONFIG_PATH` first, then `./logsentry.toml` in the
    /// working directory.
    fn config_path() -> PathBuf {
        match std::env::var("LOGSENTRY_CONFIG_PATH") {
            Ok(p) => PathBuf::from(p),
            Err(_) => PathBuf::from("logsentry.toml"),
        }
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in tests).
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Watch.
        if let Some(v) = env("LOGSENTRY_WATCH_PATH") {
            self.watch.path = v;
        }
        if let Some(v) = env("LOGSENTRY_PATTERNS") {
            self.watch.patterns = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(v) = env("LOGSENTRY_POLL_INTERVAL_MS") {
            match v.parse() {
                Ok(n) => self.watch.poll_interval_ms = n,
                Err(_) => tracing::warn!(
                    var = "LOGSENTRY_POLL_INTERVAL_MS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // SMS (key presence enables the provider).
        if let Some(key) = env("LOGSENTRY_SMS_API_KEY") {
            self.sms.api_key = key;
            self.sms.enabled = true;
        }

        // Chat.
        if let Some(token) = env("LOGSENTRY_CHAT_BOT_TOKEN") {
            self.chat.bot_token = Some(token);
            self.chat.enabled = true;
        }
        if let Some(v) = env("LOGSENTRY_CHAT_BASE_URL") {
            self.chat.base_url = v;
        }

        // Log.
        if let Some(v) = env("LOGSENTRY_LOG_LEVEL") {
            self.log.level = v;
        }
    }

    /// Parse a TOML string into config (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML does not match the config schema.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: SentryConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

// ── Watch config ────────────────────────────────────────────────

/// File-watch settings (`[watch]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchSection {
    /// Path of the file to tail.
    pub path: String,
    /// Patterns to detect in appended lines (ordered, case-insensitive).
    pub patterns: Vec<String>,
    /// Poll interval for the tail loop, in milliseconds.
    pub poll_interval_ms: u64,
    /// Optional text prepended to the matched line in the alert body.
    pub alert_prefix: String,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            path: String::new(),
            patterns: Vec::new(),
            poll_interval_ms: 500,
            alert_prefix: String::new(),
        }
    }
}

// ── Provider config ─────────────────────────────────────────────

/// SMS provider settings (`[sms]`).
///
/// `recipients` maps application user ids to phone numbers and seeds the
/// recipient binding registry at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmsSection {
    /// Whether the SMS provider participates in dispatch.
    pub enabled: bool,
    /// Gateway API key (`textbelt` selects the free tier).
    pub api_key: String,
    /// Send endpoint URL.
    pub send_url: String,
    /// Status endpoint URL.
    pub status_url: String,
    /// Application user id → phone number.
    pub recipients: BTreeMap<String, String>,
    /// Per-call HTTP timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SmsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: "textbelt".to_owned(),
            send_url: "https://textbelt.com/text".to_owned(),
            status_url: "https://textbelt.com/status".to_owned(),
            recipients: BTreeMap::new(),
            timeout_secs: 10,
        }
    }
}

/// Chat provider settings (`[chat]`).
///
/// `recipients` maps application user ids to chat account ids, normally
/// produced by an out-of-band registration step.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    /// Whether the chat provider participates in dispatch.
    pub enabled: bool,
    /// Bot token used as a bearer credential.
    pub bot_token: Option<String>,
    /// Base URL of the chat bot API.
    pub base_url: String,
    /// Application user id → chat account id.
    pub recipients: BTreeMap<String, String>,
    /// Per-call HTTP timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: None,
            base_url: "https://chat.example.com/api".to_owned(),
            recipients: BTreeMap::new(),
            timeout_secs: 10,
        }
    }
}

// ── Tracker config ──────────────────────────────────────────────

/// Delivery tracker settings (`[tracker]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    /// Interval between status sweeps, in seconds.
    pub sweep_interval_secs: u64,
    /// Messages still non-terminal after this many hours become `Unknown`.
    pub poll_horizon_hours: u64,
    /// Delay between consecutive status calls in a sweep, in milliseconds.
    pub status_call_delay_ms: u64,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            poll_horizon_hours: 48,
            status_call_delay_ms: 100,
        }
    }
}

// ── Log config ──────────────────────────────────────────────────

/// Logging settings (`[log]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Default filter level when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for rotated JSON log files.
    pub dir: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            dir: "logs".to_owned(),
        }
    }
}
