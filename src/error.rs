//! Error types for the market price feed

use thiserror::Error;

/// Errors raised by source adapters.
///
/// All of these are absorbed inside the feed: transient errors trigger
/// reconnects or tier escalation, parse errors drop the single offending
/// message, and hard failures sideline the tier. Nothing here propagates
/// to readers of the price cache.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Socket refused, dropped, or closed by the peer
    #[error("Connection error: {0}")]
    Connection(String),

    /// HTTP request failed
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Malformed or unrecognized message; the message is dropped
    #[error("Parse error: {0}")]
    Parse(String),

    /// HTTP 429 from the upstream
    #[error("Rate limit exceeded")]
    RateLimited,

    /// HTTP 451 from the upstream; the tier is long-lived unavailable
    #[error("Geo-blocked upstream")]
    GeoBlocked,

    /// Timed out waiting for a response
    #[error("Request timeout")]
    Timeout,

    /// The inter-request cooldown has not elapsed yet
    #[error("Poll cooldown active")]
    Cooldown,

    /// The stream ended without an error frame
    #[error("Stream closed")]
    StreamClosed,
}

impl SourceError {
    /// Hard failures sideline the tier instead of scheduling a reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::RateLimited | SourceError::GeoBlocked)
    }

    /// Creates a Connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a Parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}
