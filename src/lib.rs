//! # Market Price Feed
//!
//! Live market price ingestion pipeline: continuously supplies a consistent,
//! low-latency, best-effort-accurate price per traded symbol while the
//! upstream data sources are unreliable, geo-restricted, or rate-limited.
//!
//! Three ranked source tiers feed a single shared price cache:
//!
//! 1. Coinbase websocket stream
//! 2. Kraken websocket stream
//! 3. CoinGecko batched REST polling (also maintains the 24h baseline)
//!
//! A failover controller owns which tier is authoritative at any moment,
//! escalates through the tiers on failure or timeout, and gates every cache
//! write so a demoted source's in-flight message can never clobber fresh
//! data.
//!
//! ## Usage
//!
//! ```no_run
//! use market_price_feed::{FeedConfig, MarketPriceFeed, Symbol};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let feed = MarketPriceFeed::start(FeedConfig::default(), None)?;
//!
//! // Single price (None until the first commit for the symbol)
//! if let Some(btc) = feed.get_market_price(Symbol::BTC).await {
//!     println!("BTC: ${:.2} ({:+.2}%)", btc.price, btc.change_percent);
//! }
//!
//! // All prices, plus which tier produced them
//! for update in feed.get_all_market_prices().await {
//!     println!("{}: ${:.2} via {}", update.symbol, update.price, update.source);
//! }
//! println!("active source: {}", feed.active_source());
//!
//! feed.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Source Adapter (active tier)
//!     ↓
//! Failover Controller (single-writer commit gate)
//!     ↓
//! Price Cache (in-memory, last known good)
//!     ↓
//! Broadcaster (host callback + subscribers)
//! ```
//!
//! ## Error handling
//!
//! Network and parse failures never propagate to readers: the feed degrades
//! by switching tier or serving the last committed value. Before the first
//! commit for a symbol, reads return `None` and callers must handle the
//! "no price yet" case explicitly.
//!
//! ## Adding new symbols
//!
//! Add the variant to the `Symbol` enum in `types.rs`; the compiler then
//! requires an entry in every source's wire-identifier table.

pub mod baseline;
pub mod broadcaster;
pub mod cache;
pub mod constants;
mod controller;
pub mod error;
pub mod feed;
pub mod metrics;
mod rate_gate;
pub mod source;
pub mod sources;
pub mod types;

// Re-export commonly used types
pub use broadcaster::BroadcastFn;
pub use cache::PriceCache;
pub use error::SourceError;
pub use feed::{FeedConfig, MarketPriceFeed};
pub use metrics::SourceMetrics;
pub use types::{
    FeedEvent, FeedHealth, HealthStatus, PriceUpdate, SourceState, SourceTier, Symbol,
};
