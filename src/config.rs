//! Application configuration loaded from environment variables.
//!
//! Credentials are read from:
//! - `STREAMBOOK_API_KEY_ID` — API key id
//! - `STREAMBOOK_API_KEY_SECRET` — API key secret
//!
//! Optional overrides:
//! - `STREAMBOOK_PAIR` — market to mirror (default `XBTZAR`)
//! - `STREAMBOOK_WEBSOCKET_URL` — stream endpoint (default `wss://ws.luno.com`)
//! - `STREAMBOOK_SETTINGS` — path of a JSON file with [`StreamSettings`] tuning

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::models::Credentials;
use crate::websocket::BackoffConfig;

/// Default stream endpoint.
pub const DEFAULT_WEBSOCKET_URL: &str = "wss://ws.luno.com";

/// Default market.
pub const DEFAULT_PAIR: &str = "XBTZAR";

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub websocket_url: String,
    pub pair: String,
    pub api_key_id: Option<String>,
    pub api_key_secret: Option<String>,
    pub settings: StreamSettings,
}

impl AppConfig {
    /// Returns the configured key pair, or `None` if either half is missing.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.api_key_id, &self.api_key_secret) {
            (Some(id), Some(secret)) => Some(Credentials::new(id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

/// Longest accepted keep-alive interval.
const MAX_KEEPALIVE: Duration = Duration::from_secs(60 * 60);

/// Longest accepted backoff base delay.
const MAX_BACKOFF_BASE: Duration = Duration::from_secs(60 * 60);

/// Most doublings accepted; the delay is capped at `base * 2^16`.
const MAX_BACKOFF_DOUBLINGS: u32 = 16;

/// Timing and queueing knobs for a stream connection.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Interval between outbound keep-alive frames.
    pub keepalive_interval: Duration,
    pub backoff: BackoffConfig,
    /// A connection that streamed at least this long resets the backoff.
    pub healthy_after: Duration,
    /// Capacity of the update notification queue.
    pub notify_queue: usize,
    /// How long the reader waits for queue space before dropping a notification.
    pub notify_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
            healthy_after: Duration::from_secs(5 * 60),
            notify_queue: 256,
            notify_timeout: Duration::from_millis(50),
        }
    }
}

/// On-disk form of [`StreamSettings`]. Every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    keepalive_secs: Option<u64>,
    backoff_base_ms: Option<u64>,
    backoff_max_doublings: Option<u32>,
    backoff_jitter: Option<f64>,
    healthy_after_secs: Option<u64>,
    notify_queue: Option<usize>,
    notify_timeout_ms: Option<u64>,
}

impl StreamSettings {
    /// Loads settings from a JSON file. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value
    /// is out of range.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            crate::StreambookError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&contents)
    }

    /// Parses settings from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`StreambookError::Json`](crate::StreambookError::Json) for
    /// malformed JSON and [`StreambookError::Config`](crate::StreambookError::Config)
    /// for out-of-range values.
    pub fn parse(contents: &str) -> crate::Result<Self> {
        let file: SettingsFile = serde_json::from_str(contents)?;
        let defaults = Self::default();

        let settings = Self {
            keepalive_interval: file
                .keepalive_secs
                .map_or(defaults.keepalive_interval, Duration::from_secs),
            backoff: BackoffConfig {
                base: file
                    .backoff_base_ms
                    .map_or(defaults.backoff.base, Duration::from_millis),
                max_doublings: file
                    .backoff_max_doublings
                    .unwrap_or(defaults.backoff.max_doublings),
                jitter: file.backoff_jitter.unwrap_or(defaults.backoff.jitter),
            },
            healthy_after: file
                .healthy_after_secs
                .map_or(defaults.healthy_after, Duration::from_secs),
            notify_queue: file.notify_queue.unwrap_or(defaults.notify_queue),
            notify_timeout: file
                .notify_timeout_ms
                .map_or(defaults.notify_timeout, Duration::from_millis),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Checks every value is in range. Also run by `Connection::open`.
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.keepalive_interval.is_zero() || self.keepalive_interval > MAX_KEEPALIVE {
            return Err(config_err("keepalive_secs must be between 1 and 3600"));
        }
        if self.backoff.base.is_zero() || self.backoff.base > MAX_BACKOFF_BASE {
            return Err(config_err("backoff_base_ms must be between 1 and 3600000"));
        }
        if self.backoff.max_doublings > MAX_BACKOFF_DOUBLINGS {
            return Err(config_err("backoff_max_doublings must be at most 16"));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter) {
            return Err(config_err("backoff_jitter must be between 0 and 1"));
        }
        if self.notify_queue == 0 {
            return Err(config_err("notify_queue must be positive"));
        }
        Ok(())
    }
}

fn config_err(msg: &str) -> crate::StreambookError {
    crate::StreambookError::Config(msg.to_string())
}

/// Loads the application configuration from environment variables.
///
/// # Errors
///
/// Returns [`StreambookError::Config`](crate::StreambookError::Config) if
/// only one of the two credential variables is set, or if the settings
/// file named by `STREAMBOOK_SETTINGS` cannot be loaded.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let websocket_url = non_empty_var("STREAMBOOK_WEBSOCKET_URL")
        .unwrap_or_else(|| DEFAULT_WEBSOCKET_URL.to_string());
    let pair = non_empty_var("STREAMBOOK_PAIR").unwrap_or_else(|| DEFAULT_PAIR.to_string());

    let api_key_id = non_empty_var("STREAMBOOK_API_KEY_ID");
    let api_key_secret = non_empty_var("STREAMBOOK_API_KEY_SECRET");

    match (&api_key_id, &api_key_secret) {
        (Some(_), None) => {
            return Err(config_err(
                "STREAMBOOK_API_KEY_ID is set but STREAMBOOK_API_KEY_SECRET is missing",
            ));
        }
        (None, Some(_)) => {
            return Err(config_err(
                "STREAMBOOK_API_KEY_SECRET is set but STREAMBOOK_API_KEY_ID is missing",
            ));
        }
        _ => {}
    }

    let settings = match non_empty_var("STREAMBOOK_SETTINGS") {
        Some(path) => StreamSettings::load(Path::new(&path))?,
        None => StreamSettings::default(),
    };

    Ok(AppConfig {
        websocket_url,
        pair,
        api_key_id,
        api_key_secret,
        settings,
    })
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}
