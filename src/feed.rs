//! Market price feed service
//!
//! The handle owned by the host process: constructs the cache, baseline
//! tracker, broadcaster, and failover controller at `start`, exposes the
//! narrow read API every consuming subsystem uses, and tears everything
//! down at `shutdown`.

use crate::{
    baseline::BaselineTracker,
    broadcaster::{BroadcastFn, Broadcaster},
    cache::PriceCache,
    constants::{
        BASELINE_REFRESH_SECS, ENABLED_SYMBOLS, INITIAL_RECONNECT_BACKOFF_MS,
        MAX_RECONNECT_BACKOFF_MS, POLL_COOLDOWN_SECS, POLL_INTERVAL_SECS, RECONNECT_JITTER_MS,
        TIER2_ESCALATION_SECS, TIER3_ESCALATION_SECS,
    },
    controller::{FailoverController, SourceSet},
    error::SourceError,
    metrics::SourceMetrics,
    sources::{CoinGeckoSource, CoinbaseSource, KrakenSource},
    types::{FeedEvent, FeedHealth, HealthStatus, PriceUpdate, SourceTier, Symbol},
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Tunables for the feed, seeded from `constants`
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Symbols to track
    pub symbols: Vec<Symbol>,
    /// Interval between tier-3 snapshot polls
    pub poll_interval: Duration,
    /// Minimum spacing between outbound snapshot requests
    pub poll_cooldown: Duration,
    /// Window before tier 2 is promoted when tier 1 has not connected
    pub tier2_escalation: Duration,
    /// Window before tier 3 is promoted when no stream has connected
    pub tier3_escalation: Duration,
    /// Cadence of the 24h baseline refresh
    pub baseline_refresh: Duration,
    /// First reconnect delay after a stream drops
    pub initial_reconnect_backoff: Duration,
    /// Cap on the reconnect delay
    pub max_reconnect_backoff: Duration,
    /// Random jitter added to each reconnect delay
    pub reconnect_jitter: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            symbols: ENABLED_SYMBOLS.to_vec(),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            poll_cooldown: Duration::from_secs(POLL_COOLDOWN_SECS),
            tier2_escalation: Duration::from_secs(TIER2_ESCALATION_SECS),
            tier3_escalation: Duration::from_secs(TIER3_ESCALATION_SECS),
            baseline_refresh: Duration::from_secs(BASELINE_REFRESH_SECS),
            initial_reconnect_backoff: Duration::from_millis(INITIAL_RECONNECT_BACKOFF_MS),
            max_reconnect_backoff: Duration::from_millis(MAX_RECONNECT_BACKOFF_MS),
            reconnect_jitter: Duration::from_millis(RECONNECT_JITTER_MS),
        }
    }
}

/// Running market price feed
///
/// # Example
/// ```no_run
/// use market_price_feed::{FeedConfig, MarketPriceFeed, Symbol};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let feed = MarketPriceFeed::start(FeedConfig::default(), None)?;
///
/// if let Some(btc) = feed.get_market_price(Symbol::BTC).await {
///     println!("BTC: ${:.2} ({:+.2}%)", btc.price, btc.change_percent);
/// }
///
/// feed.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct MarketPriceFeed {
    config: FeedConfig,
    cache: Arc<PriceCache>,
    broadcaster: Arc<Broadcaster>,
    controller: Arc<FailoverController>,
    shutdown_tx: watch::Sender<bool>,
    shut: AtomicBool,
}

impl MarketPriceFeed {
    /// Starts the feed: boots tier 1, arms the escalation timers, and kicks
    /// off the baseline bootstrap.
    ///
    /// `broadcast_fn`, when given, is invoked with every committed batch
    /// (e.g. an outbound relay to UI clients). Must be called from within a
    /// tokio runtime.
    pub fn start(
        config: FeedConfig,
        broadcast_fn: Option<BroadcastFn>,
    ) -> Result<Self, SourceError> {
        let cache = Arc::new(PriceCache::new());
        let baseline = Arc::new(BaselineTracker::new());
        let broadcaster = Arc::new(Broadcaster::new());
        if let Some(callback) = broadcast_fn {
            broadcaster.register(callback);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let controller = FailoverController::new(
            cache.clone(),
            baseline,
            broadcaster.clone(),
            config.clone(),
            shutdown_rx,
        );

        let snapshot = Arc::new(CoinGeckoSource::with_cooldown(config.poll_cooldown)?);
        controller.spawn(SourceSet {
            tier1: Box::new(CoinbaseSource::new(&config.symbols)),
            tier2: Box::new(KrakenSource::new(&config.symbols)),
            snapshot,
        });

        tracing::info!(symbols = config.symbols.len(), "Market price feed started");
        Ok(Self {
            config,
            cache,
            broadcaster,
            controller,
            shutdown_tx,
            shut: AtomicBool::new(false),
        })
    }

    /// Gets the last committed price for a symbol.
    ///
    /// Returns `None` before the first successful commit; after that the
    /// last-known-good value is served even while every upstream is down.
    pub async fn get_market_price(&self, symbol: Symbol) -> Option<PriceUpdate> {
        self.cache.get(symbol).await
    }

    /// Gets all committed prices in canonical symbol order
    pub async fn get_all_market_prices(&self) -> Vec<PriceUpdate> {
        self.cache.get_all().await
    }

    /// The tier currently authorized to write prices
    pub fn active_source(&self) -> SourceTier {
        self.controller.active_source()
    }

    /// Checks whether any price has been committed for the symbol
    pub async fn has_price(&self, symbol: Symbol) -> bool {
        self.cache.has_price(symbol).await
    }

    /// Subscribes to committed batches and source changes
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.broadcaster.subscribe()
    }

    /// Per-tier latency and success metrics
    pub async fn source_metrics(&self) -> Vec<SourceMetrics> {
        self.controller.metrics_snapshots().await
    }

    /// Connection-health snapshot for UI display
    pub async fn feed_health(&self) -> FeedHealth {
        let priced = self.cache.get_all().await;
        let mut missing = Vec::new();
        for symbol in &self.config.symbols {
            if !self.cache.has_price(*symbol).await {
                missing.push(*symbol);
            }
        }

        let active_source = self.controller.active_source();
        let status = if priced.is_empty() {
            HealthStatus::Unhealthy
        } else if !missing.is_empty() || !active_source.is_streaming() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        FeedHealth {
            status,
            active_source,
            source_states: self.controller.source_states(),
            priced_symbols: priced.len(),
            missing_symbols: missing,
            checked_at: Utc::now(),
        }
    }

    /// Stops every source task, cancels pending timers, and clears the
    /// cache. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.shut.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        self.cache.clear().await;
        tracing::info!("Market price feed shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_before_first_commit_are_absent() {
        let feed = MarketPriceFeed::start(FeedConfig::default(), None).unwrap();

        assert!(feed.get_market_price(Symbol::BTC).await.is_none());
        assert!(feed.get_all_market_prices().await.is_empty());
        assert!(!feed.has_price(Symbol::ETH).await);

        let health = feed.feed_health().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.priced_symbols, 0);
        assert_eq!(health.missing_symbols.len(), Symbol::all().len());

        feed.shutdown().await;
    }

    #[tokio::test]
    async fn test_boot_starts_on_tier1() {
        let feed = MarketPriceFeed::start(FeedConfig::default(), None).unwrap();
        assert_eq!(feed.active_source(), SourceTier::CoinbaseWs);
        feed.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let feed = MarketPriceFeed::start(FeedConfig::default(), None).unwrap();
        feed.shutdown().await;
        feed.shutdown().await;
    }

    #[test]
    fn test_default_config_matches_constants() {
        let config = FeedConfig::default();
        assert_eq!(config.tier2_escalation, Duration::from_secs(3));
        assert_eq!(config.tier3_escalation, Duration::from_secs(6));
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert!(config.poll_cooldown <= config.poll_interval);
        assert_eq!(config.symbols.len(), Symbol::all().len());
    }
}
