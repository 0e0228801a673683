//! Wire models for the streaming order book feed.
//!
//! Contains the credentials handshake frame, order side and market
//! status enumerations, and the snapshot and diff documents in
//! [`book`] and [`update`].

pub mod book;
pub mod update;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use zeroize::Zeroizing;

/// Side of the book an order rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderSide {
    Bid,
    Ask,
}

impl OrderSide {
    /// Returns the wire token used by create updates.
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Bid => "BID",
            OrderSide::Ask => "ASK",
        }
    }

    /// Parses a wire token. Anything but `BID` or `ASK` is rejected.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "BID" => Some(OrderSide::Bid),
            "ASK" => Some(OrderSide::Ask),
            _ => None,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trading status of the market, as reported by snapshots and status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarketStatus {
    /// No snapshot has been received on the current connection.
    #[default]
    Unknown,
    Active,
    /// Only post-only (maker) orders are accepted.
    PostOnly,
    Disabled,
}

impl MarketStatus {
    /// Maps a wire token to a status; unrecognised tokens map to `Unknown`.
    pub fn from_token(token: &str) -> Self {
        match token {
            "ACTIVE" => MarketStatus::Active,
            "POSTONLY" => MarketStatus::PostOnly,
            "DISABLED" => MarketStatus::Disabled,
            _ => MarketStatus::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for MarketStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = Option::<String>::deserialize(deserializer)?;
        Ok(token.map_or(MarketStatus::Unknown, |t| Self::from_token(&t)))
    }
}

/// The first frame sent after the WebSocket handshake.
#[derive(Serialize)]
pub struct CredentialsRequest<'a> {
    pub api_key_id: &'a str,
    pub api_key_secret: &'a str,
}

/// API key pair used to authenticate the stream.
#[derive(Clone)]
pub struct Credentials {
    key_id: String,
    key_secret: Zeroizing<String>,
}

impl Credentials {
    /// Creates a credential pair. Emptiness is checked when the stream is opened.
    #[must_use]
    pub fn new(key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_secret: Zeroizing::new(key_secret.into()),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Returns `true` if both the key id and the secret are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.key_id.is_empty() && !self.key_secret.is_empty()
    }

    /// Builds the handshake frame.
    pub fn request(&self) -> CredentialsRequest<'_> {
        CredentialsRequest {
            api_key_id: &self.key_id,
            api_key_secret: &self.key_secret,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .finish()
    }
}

/// Deserializes a sequence number sent either as a decimal string or a number.
pub(crate) fn deserialize_sequence<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSequence {
        Number(u64),
        Text(String),
    }

    match RawSequence::deserialize(deserializer)? {
        RawSequence::Number(n) => Ok(n),
        RawSequence::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Deserializes a list that the feed may send as `null`.
pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_side_tokens() {
        assert_eq!(OrderSide::from_token("BID"), Some(OrderSide::Bid));
        assert_eq!(OrderSide::from_token("ASK"), Some(OrderSide::Ask));
        assert_eq!(OrderSide::from_token("bid"), None);
        assert_eq!(OrderSide::from_token("SELL"), None);
        assert_eq!(OrderSide::Ask.to_string(), "ASK");
    }

    #[test]
    fn unknown_status_token_maps_to_unknown() {
        let status: MarketStatus = serde_json::from_str("\"HALTED\"").unwrap();
        assert_eq!(status, MarketStatus::Unknown);
        let status: MarketStatus = serde_json::from_str("\"POSTONLY\"").unwrap();
        assert_eq!(status, MarketStatus::PostOnly);
        let status: MarketStatus = serde_json::from_str("null").unwrap();
        assert_eq!(status, MarketStatus::Unknown);
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let creds = Credentials::new("key-id", "super-secret");
        let debug = format!("{creds:?}");
        assert!(debug.contains("key-id"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn credentials_request_serializes() {
        let creds = Credentials::new("id", "secret");
        let value = serde_json::to_value(creds.request()).unwrap();
        assert_eq!(value["api_key_id"], "id");
        assert_eq!(value["api_key_secret"], "secret");
    }

    #[test]
    fn incomplete_credentials() {
        assert!(!Credentials::new("", "secret").is_complete());
        assert!(!Credentials::new("id", "").is_complete());
        assert!(Credentials::new("id", "secret").is_complete());
    }
}
