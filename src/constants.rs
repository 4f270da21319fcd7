//! Constants for the market price feed
//!
//! All configuration for the feed is centralized here. There is no runtime
//! configuration file; the tunables below seed `FeedConfig::default()` and a
//! host process can override individual fields at `start` time.

use crate::types::Symbol;

/// Window after boot before tier 2 is promoted when tier 1 has not connected
pub const TIER2_ESCALATION_SECS: u64 = 3;

/// Window after boot before tier 3 is promoted when no stream has connected
pub const TIER3_ESCALATION_SECS: u64 = 6;

/// How often the polling tier fetches a market snapshot (in seconds)
pub const POLL_INTERVAL_SECS: u64 = 10;

/// Minimum spacing between outbound snapshot requests, independent of the
/// interval timer, so manual refresh bursts cannot exceed the upstream
/// rate limit
pub const POLL_COOLDOWN_SECS: u64 = 5;

/// How often the 24h baseline is recomputed (in seconds)
pub const BASELINE_REFRESH_SECS: u64 = 3600;

/// Initial reconnect delay for a dropped stream (in milliseconds)
pub const INITIAL_RECONNECT_BACKOFF_MS: u64 = 5_000;

/// Cap on the reconnect delay (in milliseconds)
pub const MAX_RECONNECT_BACKOFF_MS: u64 = 60_000;

/// Random jitter added to each reconnect delay (in milliseconds)
pub const RECONNECT_JITTER_MS: u64 = 1_000;

/// HTTP request timeout when fetching snapshots (in seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// How long before a committed price is considered stale (in seconds)
pub const STALE_THRESHOLD_SECS: u64 = 300;

/// A committed price is never allowed to fall below this fraction of the
/// prior committed price for the same symbol
pub const PRICE_FLOOR_RATIO: f64 = 0.5;

/// Symbols to track by default
pub const ENABLED_SYMBOLS: &[Symbol] = &[
    Symbol::BTC,
    Symbol::ETH,
    Symbol::SOL,
    Symbol::XRP,
    Symbol::ADA,
    Symbol::DOGE,
];

/// Coinbase websocket feed URL
pub const COINBASE_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";

/// Kraken websocket feed URL
pub const KRAKEN_WS_URL: &str = "wss://ws.kraken.com";

/// CoinGecko API base URL
pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

/// CoinGecko API endpoint for batched market snapshots
pub const COINGECKO_MARKETS_ENDPOINT: &str = "/coins/markets";

/// User agent for HTTP requests
pub const USER_AGENT: &str = "market-price-feed/0.1.0";

/// Capacity of the feed's broadcast channel
pub const BROADCAST_CHANNEL_CAPACITY: usize = 1024;
