//! Types for the market price feed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical tickers covered by the feed.
///
/// Every source's wire identifier lives here as an exhaustive match, so
/// adding a symbol without filling in all three source tables is a compile
/// error rather than a silent drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Symbol {
    /// Bitcoin
    BTC,
    /// Ethereum
    ETH,
    /// Solana
    SOL,
    /// Ripple
    XRP,
    /// Cardano
    ADA,
    /// Dogecoin
    DOGE,
}

impl Symbol {
    /// Get the canonical ticker
    pub fn ticker(&self) -> &'static str {
        match self {
            Symbol::BTC => "BTC",
            Symbol::ETH => "ETH",
            Symbol::SOL => "SOL",
            Symbol::XRP => "XRP",
            Symbol::ADA => "ADA",
            Symbol::DOGE => "DOGE",
        }
    }

    /// Get the Coinbase product id for this symbol
    pub fn coinbase_product_id(&self) -> Option<&'static str> {
        match self {
            Symbol::BTC => Some("BTC-USD"),
            Symbol::ETH => Some("ETH-USD"),
            Symbol::SOL => Some("SOL-USD"),
            Symbol::XRP => Some("XRP-USD"),
            Symbol::ADA => Some("ADA-USD"),
            Symbol::DOGE => Some("DOGE-USD"),
        }
    }

    /// Resolve a Coinbase product id back to a symbol
    pub fn from_coinbase_product_id(id: &str) -> Option<Symbol> {
        Symbol::all()
            .iter()
            .find(|s| s.coinbase_product_id() == Some(id))
            .copied()
    }

    /// Get the Kraken websocket pair name for this symbol
    pub fn kraken_pair(&self) -> Option<&'static str> {
        match self {
            Symbol::BTC => Some("XBT/USD"),
            Symbol::ETH => Some("ETH/USD"),
            Symbol::SOL => Some("SOL/USD"),
            Symbol::XRP => Some("XRP/USD"),
            Symbol::ADA => Some("ADA/USD"),
            Symbol::DOGE => Some("XDG/USD"),
        }
    }

    /// Resolve a Kraken pair name back to a symbol
    pub fn from_kraken_pair(pair: &str) -> Option<Symbol> {
        Symbol::all()
            .iter()
            .find(|s| s.kraken_pair() == Some(pair))
            .copied()
    }

    /// Get the CoinGecko coin id for this symbol
    pub fn coingecko_id(&self) -> Option<&'static str> {
        match self {
            Symbol::BTC => Some("bitcoin"),
            Symbol::ETH => Some("ethereum"),
            Symbol::SOL => Some("solana"),
            Symbol::XRP => Some("ripple"),
            Symbol::ADA => Some("cardano"),
            Symbol::DOGE => Some("dogecoin"),
        }
    }

    /// Resolve a CoinGecko coin id back to a symbol
    pub fn from_coingecko_id(id: &str) -> Option<Symbol> {
        Symbol::all()
            .iter()
            .find(|s| s.coingecko_id() == Some(id))
            .copied()
    }

    /// Get all covered symbols
    pub fn all() -> &'static [Symbol] {
        &[
            Symbol::BTC,
            Symbol::ETH,
            Symbol::SOL,
            Symbol::XRP,
            Symbol::ADA,
            Symbol::DOGE,
        ]
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.ticker())
    }
}

/// The three ranked upstream data sources, ordered by preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    /// Tier 1: Coinbase websocket stream
    CoinbaseWs = 0,
    /// Tier 2: Kraken websocket stream
    KrakenWs = 1,
    /// Tier 3: CoinGecko REST polling
    CoinGeckoRest = 2,
}

impl SourceTier {
    /// Get the source name for logging and health reporting
    pub fn name(&self) -> &'static str {
        match self {
            SourceTier::CoinbaseWs => "coinbase-ws",
            SourceTier::KrakenWs => "kraken-ws",
            SourceTier::CoinGeckoRest => "coingecko-rest",
        }
    }

    /// True for the websocket tiers
    pub fn is_streaming(&self) -> bool {
        matches!(self, SourceTier::CoinbaseWs | SourceTier::KrakenWs)
    }

    /// The next tier to escalate to, if any
    pub fn next(&self) -> Option<SourceTier> {
        match self {
            SourceTier::CoinbaseWs => Some(SourceTier::KrakenWs),
            SourceTier::KrakenWs => Some(SourceTier::CoinGeckoRest),
            SourceTier::CoinGeckoRest => None,
        }
    }

    /// All tiers in preference order
    pub fn all() -> &'static [SourceTier] {
        &[
            SourceTier::CoinbaseWs,
            SourceTier::KrakenWs,
            SourceTier::CoinGeckoRest,
        ]
    }
}

impl std::fmt::Display for SourceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection state of a single source adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Disconnected,
    Connecting,
    Connected,
    /// Hard failure (rate limited or geo-blocked); the tier is sidelined
    /// and not retried aggressively.
    Failed,
}

/// A normalized tick as emitted by an adapter, before the commit gate.
///
/// `change_percent` is only present when the source reports it directly
/// (the polling tier); for the streaming tiers the controller derives it
/// from the 24h baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTick {
    pub symbol: Symbol,
    pub price: f64,
    pub change_percent: Option<f64>,
    pub volume: Option<f64>,
    pub market_cap: Option<f64>,
}

/// A committed price for a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// The symbol
    pub symbol: Symbol,

    /// Last price in USD
    pub price: f64,

    /// Absolute change vs. the 24h baseline
    pub change: f64,

    /// Percent change vs. the 24h baseline
    pub change_percent: f64,

    /// When the update was committed
    pub timestamp: DateTime<Utc>,

    /// 24h volume, when the source reports it
    pub volume: Option<f64>,

    /// Market capitalization, when the source reports it
    pub market_cap: Option<f64>,

    /// Which tier produced this update
    pub source: SourceTier,
}

impl PriceUpdate {
    /// Check if the update is older than the threshold in seconds
    pub fn is_stale(&self, threshold_seconds: u64) -> bool {
        let age = Utc::now().signed_duration_since(self.timestamp);
        age.num_seconds() > threshold_seconds as i64
    }

    /// Get the age of the update
    pub fn age(&self) -> std::time::Duration {
        let duration = Utc::now().signed_duration_since(self.timestamp);
        std::time::Duration::from_secs(duration.num_seconds().max(0) as u64)
    }
}

/// Events emitted on the feed's broadcast channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedEvent {
    /// A batch of freshly committed prices
    PriceBatch {
        id: Uuid,
        updates: Vec<PriceUpdate>,
        timestamp: DateTime<Utc>,
    },

    /// The active source changed (escalation or recovery)
    SourceChanged {
        id: Uuid,
        previous: Option<SourceTier>,
        active: SourceTier,
        timestamp: DateTime<Utc>,
    },
}

impl FeedEvent {
    /// Get the event ID
    pub fn id(&self) -> Uuid {
        match self {
            FeedEvent::PriceBatch { id, .. } => *id,
            FeedEvent::SourceChanged { id, .. } => *id,
        }
    }
}

impl std::fmt::Display for FeedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedEvent::PriceBatch { updates, .. } => {
                write!(f, "Price batch: {} updates", updates.len())
            }
            FeedEvent::SourceChanged {
                previous, active, ..
            } => match previous {
                Some(prev) => write!(f, "Active source: {} -> {}", prev, active),
                None => write!(f, "Active source: {}", active),
            },
        }
    }
}

/// Overall feed health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// All symbols priced and the active tier is a streaming tier
    Healthy,
    /// Serving prices, but degraded (polling fallback or missing symbols)
    Degraded,
    /// No price data available at all
    Unhealthy,
}

/// Health snapshot exposed for UI display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedHealth {
    pub status: HealthStatus,
    pub active_source: SourceTier,
    pub source_states: Vec<(SourceTier, SourceState)>,
    /// Symbols with a committed price
    pub priced_symbols: usize,
    /// Symbols still waiting for a first commit
    pub missing_symbols: Vec<Symbol>,
    pub checked_at: DateTime<Utc>,
}
