//! Failover controller
//!
//! Owns which single tier is authoritative at any moment and enforces the
//! single-writer discipline: every proposed update passes through
//! `try_commit`, which accepts the write only when the proposing tier is the
//! active source. A demoted adapter's in-flight message can therefore never
//! land in the cache after a promotion.
//!
//! Reconnect scheduling also lives here rather than in the adapters: a
//! scheduled reconnect re-checks the active source immediately before acting,
//! so demoting a tier reliably stops its reconnect loop.

use crate::{
    baseline::BaselineTracker,
    broadcaster::Broadcaster,
    cache::PriceCache,
    constants::PRICE_FLOOR_RATIO,
    error::SourceError,
    feed::FeedConfig,
    metrics::{MetricsCollector, SourceMetrics},
    source::{SnapshotSource, StreamSource},
    types::{PriceUpdate, SourceState, SourceTick, SourceTier},
};
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

/// The three adapters handed to the controller at boot
pub(crate) struct SourceSet {
    pub tier1: Box<dyn StreamSource>,
    pub tier2: Box<dyn StreamSource>,
    pub snapshot: Arc<dyn SnapshotSource>,
}

/// Owns the active tier, the commit gate, and all source lifecycles
pub(crate) struct FailoverController {
    cache: Arc<PriceCache>,
    baseline: Arc<BaselineTracker>,
    broadcaster: Arc<Broadcaster>,
    config: FeedConfig,
    active_tx: watch::Sender<SourceTier>,
    states: RwLock<HashMap<SourceTier, SourceState>>,
    metrics: [Arc<MetricsCollector>; 3],
    shutdown_rx: watch::Receiver<bool>,
}

impl FailoverController {
    pub(crate) fn new(
        cache: Arc<PriceCache>,
        baseline: Arc<BaselineTracker>,
        broadcaster: Arc<Broadcaster>,
        config: FeedConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let (active_tx, _) = watch::channel(SourceTier::CoinbaseWs);
        let states = SourceTier::all()
            .iter()
            .map(|t| (*t, SourceState::Disconnected))
            .collect();

        Arc::new(Self {
            cache,
            baseline,
            broadcaster,
            config,
            active_tx,
            states: RwLock::new(states),
            metrics: [
                Arc::new(MetricsCollector::new(SourceTier::CoinbaseWs)),
                Arc::new(MetricsCollector::new(SourceTier::KrakenWs)),
                Arc::new(MetricsCollector::new(SourceTier::CoinGeckoRest)),
            ],
            shutdown_rx,
        })
    }

    /// Spawns every background task: both stream loops, the poll loop, the
    /// baseline maintenance loop, and the boot escalation timers.
    pub(crate) fn spawn(self: &Arc<Self>, sources: SourceSet) {
        let SourceSet {
            tier1,
            tier2,
            snapshot,
        } = sources;

        tokio::spawn(self.clone().stream_loop(tier1));
        tokio::spawn(self.clone().stream_loop(tier2));
        tokio::spawn(self.clone().poll_loop(snapshot.clone()));
        tokio::spawn(self.clone().baseline_loop(snapshot));
        tokio::spawn(self.clone().escalation_timers());
    }

    /// The single tier currently authorized to write into the cache
    pub(crate) fn active_source(&self) -> SourceTier {
        *self.active_tx.borrow()
    }

    pub(crate) fn state(&self, tier: SourceTier) -> SourceState {
        let states = self.states.read().unwrap_or_else(|e| e.into_inner());
        states
            .get(&tier)
            .copied()
            .unwrap_or(SourceState::Disconnected)
    }

    pub(crate) fn source_states(&self) -> Vec<(SourceTier, SourceState)> {
        SourceTier::all()
            .iter()
            .map(|t| (*t, self.state(*t)))
            .collect()
    }

    pub(crate) async fn metrics_snapshots(&self) -> Vec<SourceMetrics> {
        let mut result = Vec::with_capacity(self.metrics.len());
        for collector in &self.metrics {
            result.push(collector.snapshot().await);
        }
        result
    }

    fn set_state(&self, tier: SourceTier, state: SourceState) {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        states.insert(tier, state);
    }

    fn metrics_for(&self, tier: SourceTier) -> &Arc<MetricsCollector> {
        &self.metrics[tier as usize]
    }

    /// Makes a tier the active source
    fn promote(&self, tier: SourceTier) {
        let previous = *self.active_tx.borrow();
        if previous == tier {
            return;
        }
        self.active_tx.send_replace(tier);
        tracing::info!(from = %previous, to = %tier, "Active source changed");
        self.broadcaster.publish_source_change(Some(previous), tier);
    }

    /// Escalates past a failed tier to the next one that is not sidelined.
    ///
    /// When no tier remains the active source is left as-is and the cache
    /// keeps serving the last committed values.
    fn escalate_from(&self, failed: SourceTier) {
        if self.active_source() != failed {
            return;
        }

        let mut candidate = failed.next();
        while let Some(tier) = candidate {
            if self.state(tier) != SourceState::Failed {
                self.promote(tier);
                return;
            }
            candidate = tier.next();
        }
        tracing::error!(%failed, "No tier available; serving last committed prices");
    }

    fn handle_failure(&self, tier: SourceTier, error: &SourceError) {
        if matches!(error, SourceError::GeoBlocked) {
            // Long-lived unavailable; never retried aggressively.
            tracing::error!(%tier, "Source geo-blocked; sidelining tier");
            self.set_state(tier, SourceState::Failed);
        }
        self.escalate_from(tier);
    }

    fn on_connected(&self, tier: SourceTier) {
        self.set_state(tier, SourceState::Connected);
        let active = self.active_source();
        if tier < active {
            // A higher-priority tier recovered; demote whatever took over.
            self.promote(tier);
        }
    }

    /// Single-writer commit gate.
    ///
    /// Accepts the batch only when the proposing tier is the active source;
    /// proposals from every other tier are discarded. Accepted ticks get
    /// their change fields derived (or the baseline refreshed, when the
    /// source reports the 24h change itself), are clamped against the
    /// defensive price floor, and land in the cache before the batch is
    /// broadcast.
    pub(crate) async fn try_commit(&self, tier: SourceTier, ticks: Vec<SourceTick>) -> bool {
        if self.active_source() != tier {
            tracing::debug!(%tier, discarded = ticks.len(), "Commit rejected: not the active source");
            return false;
        }

        let mut batch = Vec::with_capacity(ticks.len());
        for tick in ticks {
            if !tick.price.is_finite() || tick.price <= 0.0 {
                tracing::warn!(symbol = %tick.symbol, price = tick.price, "Dropping non-positive price");
                continue;
            }

            let mut price = tick.price;
            if let Some(prior) = self.cache.get(tick.symbol).await {
                let floor = prior.price * PRICE_FLOOR_RATIO;
                if price < floor {
                    tracing::warn!(
                        symbol = %tick.symbol,
                        proposed = price,
                        floor,
                        "Clamping suspicious price to floor"
                    );
                    price = floor;
                }
            }

            if let Some(pct) = tick.change_percent {
                self.baseline.record_snapshot(tick.symbol, price, pct).await;
            }
            let derived = self.baseline.derive_change(tick.symbol, price).await;

            let update = PriceUpdate {
                symbol: tick.symbol,
                price,
                change: derived.change,
                change_percent: derived.change_percent,
                timestamp: Utc::now(),
                volume: tick.volume,
                market_cap: tick.market_cap,
                source: tier,
            };
            self.cache.set(update.clone()).await;
            batch.push(update);
        }

        self.broadcaster.publish_batch(batch);
        true
    }

    /// Drives one streaming adapter's whole lifecycle.
    ///
    /// The loop only runs while its tier is the active source; a demoted
    /// tier parks here until promoted again, which is what suppresses its
    /// pending reconnect.
    async fn stream_loop(self: Arc<Self>, mut source: Box<dyn StreamSource>) {
        let tier = source.tier();
        let initial_backoff = self.config.initial_reconnect_backoff.as_millis() as u64;
        let max_backoff = self.config.max_reconnect_backoff.as_millis() as u64;
        let mut backoff_ms = initial_backoff;

        loop {
            if self.is_shutdown() {
                break;
            }
            if self.active_source() != tier && !self.wait_until_active(tier).await {
                break;
            }

            self.set_state(tier, SourceState::Connecting);
            let started = Instant::now();
            let connected = tokio::select! {
                result = source.connect() => result,
                _ = self.shutdown_signal() => break,
            };

            match connected {
                Ok(()) => {
                    self.metrics_for(tier).record(started.elapsed(), true).await;
                    self.on_connected(tier);
                    backoff_ms = initial_backoff;

                    loop {
                        let next = tokio::select! {
                            result = source.next_ticks() => Some(result),
                            _ = self.shutdown_signal() => None,
                        };
                        let Some(next) = next else {
                            source.disconnect().await;
                            return;
                        };
                        match next {
                            Ok(ticks) => {
                                self.try_commit(tier, ticks).await;
                            }
                            Err(e) => {
                                tracing::warn!(%tier, error = %e, "Stream failed");
                                self.metrics_for(tier).record(Duration::ZERO, false).await;
                                source.disconnect().await;
                                self.set_state(tier, SourceState::Disconnected);
                                self.handle_failure(tier, &e);
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(%tier, error = %e, "Connect failed");
                    self.metrics_for(tier).record(started.elapsed(), false).await;
                    self.set_state(tier, SourceState::Disconnected);
                    self.handle_failure(tier, &e);
                }
            }

            if self.state(tier) == SourceState::Failed {
                tracing::error!(%tier, "Source sidelined; no further reconnects");
                return;
            }

            let delay = self.jittered(backoff_ms);
            backoff_ms = (backoff_ms * 2).min(max_backoff);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shutdown_signal() => return,
            }
            // Loop top re-checks the active source before reconnecting.
        }
    }

    /// Drives the polling tier while it holds the active slot
    async fn poll_loop(self: Arc<Self>, source: Arc<dyn SnapshotSource>) {
        let tier = source.tier();

        loop {
            if !self.wait_until_active(tier).await {
                return;
            }
            self.set_state(tier, SourceState::Connected);
            tracing::info!(%tier, "Polling engaged");

            while self.active_source() == tier && !self.is_shutdown() {
                let started = Instant::now();
                match source.fetch_snapshot(&self.config.symbols).await {
                    Ok(ticks) => {
                        self.metrics_for(tier).record(started.elapsed(), true).await;
                        self.try_commit(tier, ticks).await;
                    }
                    Err(SourceError::Cooldown) => {
                        tracing::trace!(%tier, "Poll skipped: cooldown active");
                    }
                    Err(e @ SourceError::GeoBlocked) => {
                        self.metrics_for(tier).record(started.elapsed(), false).await;
                        self.handle_failure(tier, &e);
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(%tier, error = %e, "Poll failed");
                        self.metrics_for(tier).record(started.elapsed(), false).await;
                    }
                }

                tokio::select! {
                    _ = sleep(self.config.poll_interval) => {}
                    _ = self.shutdown_signal() => {
                        self.set_state(tier, SourceState::Disconnected);
                        return;
                    }
                }
            }

            self.set_state(tier, SourceState::Disconnected);
            if self.is_shutdown() {
                return;
            }
            tracing::info!(%tier, "Polling demoted");
        }
    }

    /// Boot escalation: tier 2 if tier 1 has not connected within the first
    /// window, tier 3 if no stream has connected within the second.
    async fn escalation_timers(self: Arc<Self>) {
        let t1 = self.config.tier2_escalation;
        let t2 = self.config.tier3_escalation;

        tokio::select! {
            _ = sleep(t1) => {}
            _ = self.shutdown_signal() => return,
        }
        if self.state(SourceTier::CoinbaseWs) != SourceState::Connected
            && self.active_source() == SourceTier::CoinbaseWs
        {
            tracing::warn!(window = ?t1, "Tier 1 not connected in time; promoting tier 2");
            self.promote(SourceTier::KrakenWs);
        }

        tokio::select! {
            _ = sleep(t2.saturating_sub(t1)) => {}
            _ = self.shutdown_signal() => return,
        }
        let any_stream_connected = SourceTier::all()
            .iter()
            .filter(|t| t.is_streaming())
            .any(|t| self.state(*t) == SourceState::Connected);
        if !any_stream_connected && self.active_source() != SourceTier::CoinGeckoRest {
            tracing::warn!(window = ?t2, "No stream connected in time; promoting tier 3");
            self.promote(SourceTier::CoinGeckoRest);
        }
    }

    /// Bootstraps the 24h baseline at start and refreshes it on a fixed
    /// cadence, independent of which tier is active. The streaming tiers
    /// only report an absolute price, so without this there is nothing to
    /// derive change against.
    async fn baseline_loop(self: Arc<Self>, source: Arc<dyn SnapshotSource>) {
        for attempt in 1..=3u32 {
            if self.refresh_baseline(&source).await {
                break;
            }
            tracing::warn!(attempt, "Baseline bootstrap failed, retrying");
            tokio::select! {
                _ = sleep(self.config.poll_cooldown) => {}
                _ = self.shutdown_signal() => return,
            }
        }

        loop {
            tokio::select! {
                _ = sleep(self.config.baseline_refresh) => {}
                _ = self.shutdown_signal() => return,
            }
            if !self.refresh_baseline(&source).await {
                // Fall back to whatever the cache currently holds so the
                // baseline does not drift stale across long uptimes.
                let cached = self.cache.get_all().await;
                self.baseline.recompute_from(&cached).await;
            }
        }
    }

    async fn refresh_baseline(&self, source: &Arc<dyn SnapshotSource>) -> bool {
        match source.fetch_snapshot(&self.config.symbols).await {
            Ok(ticks) => {
                let mut recorded = 0usize;
                for tick in &ticks {
                    if let Some(pct) = tick.change_percent {
                        self.baseline
                            .record_snapshot(tick.symbol, tick.price, pct)
                            .await;
                        recorded += 1;
                    }
                }
                tracing::debug!(recorded, "Baseline refreshed from snapshot");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Baseline snapshot failed");
                false
            }
        }
    }

    fn jittered(&self, base_ms: u64) -> Duration {
        let jitter_ms = self.config.reconnect_jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base_ms + jitter)
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Resolves once shutdown is signalled (or the feed handle is gone)
    async fn shutdown_signal(&self) {
        let mut rx = self.shutdown_rx.clone();
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Parks until the tier becomes the active source.
    ///
    /// Returns false when shutdown arrives first.
    async fn wait_until_active(&self, tier: SourceTier) -> bool {
        let mut active_rx = self.active_tx.subscribe();
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            if *shutdown_rx.borrow() {
                return false;
            }
            if *active_rx.borrow_and_update() == tier {
                return true;
            }
            tokio::select! {
                changed = active_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::{MockSnapshot, MockStream};
    use crate::sources::CoinbaseSource;
    use crate::types::Symbol;

    fn tick(symbol: Symbol, price: f64) -> SourceTick {
        SourceTick {
            symbol,
            price,
            change_percent: None,
            volume: None,
            market_cap: None,
        }
    }

    fn snapshot_tick(symbol: Symbol, price: f64, pct: f64) -> SourceTick {
        SourceTick {
            symbol,
            price,
            change_percent: Some(pct),
            volume: None,
            market_cap: None,
        }
    }

    struct Fixture {
        controller: Arc<FailoverController>,
        cache: Arc<PriceCache>,
        baseline: Arc<BaselineTracker>,
        shutdown_tx: watch::Sender<bool>,
    }

    fn fixture() -> Fixture {
        // No jitter so timing assertions stay deterministic.
        let config = FeedConfig {
            reconnect_jitter: Duration::ZERO,
            ..FeedConfig::default()
        };
        let cache = Arc::new(PriceCache::new());
        let baseline = Arc::new(BaselineTracker::new());
        let broadcaster = Arc::new(Broadcaster::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let controller = FailoverController::new(
            cache.clone(),
            baseline.clone(),
            broadcaster,
            config,
            shutdown_rx,
        );
        Fixture {
            controller,
            cache,
            baseline,
            shutdown_tx,
        }
    }

    #[tokio::test]
    async fn test_commit_gate_rejects_demoted_tier() {
        let f = fixture();
        f.controller.promote(SourceTier::KrakenWs);

        // Tier 1's in-flight proposal after the promotion must be discarded.
        let accepted = f
            .controller
            .try_commit(SourceTier::CoinbaseWs, vec![tick(Symbol::BTC, 66000.0)])
            .await;
        assert!(!accepted);

        let accepted = f
            .controller
            .try_commit(SourceTier::KrakenWs, vec![tick(Symbol::BTC, 67000.0)])
            .await;
        assert!(accepted);

        let cached = f.cache.get(Symbol::BTC).await.unwrap();
        assert_eq!(cached.price, 67000.0);
        assert_eq!(cached.source, SourceTier::KrakenWs);
    }

    #[tokio::test]
    async fn test_commit_clamps_to_price_floor() {
        let f = fixture();
        f.controller
            .try_commit(SourceTier::CoinbaseWs, vec![tick(Symbol::BTC, 100.0)])
            .await;
        f.controller
            .try_commit(SourceTier::CoinbaseWs, vec![tick(Symbol::BTC, 10.0)])
            .await;

        assert_eq!(f.cache.get(Symbol::BTC).await.unwrap().price, 50.0);
    }

    #[tokio::test]
    async fn test_commit_drops_non_positive_prices() {
        let f = fixture();
        f.controller
            .try_commit(
                SourceTier::CoinbaseWs,
                vec![tick(Symbol::BTC, -5.0), tick(Symbol::ETH, 0.0)],
            )
            .await;

        assert!(f.cache.get(Symbol::BTC).await.is_none());
        assert!(f.cache.get(Symbol::ETH).await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_commit_records_baseline() {
        let f = fixture();
        f.controller.promote(SourceTier::CoinGeckoRest);
        f.controller
            .try_commit(
                SourceTier::CoinGeckoRest,
                vec![snapshot_tick(Symbol::BTC, 67250.50, 1.13)],
            )
            .await;

        let cached = f.cache.get(Symbol::BTC).await.unwrap();
        assert!((cached.change_percent - 1.13).abs() < 1e-6);
        assert!(f.baseline.baseline(Symbol::BTC).await.is_some());
    }

    #[tokio::test]
    async fn test_ticker_message_end_to_end() {
        let f = fixture();
        // Baseline as if a snapshot had reported BTC at 66500 with 0% change.
        f.baseline.record_snapshot(Symbol::BTC, 66500.0, 0.0).await;

        let text = r#"{"type":"ticker","product_id":"BTC-USD","price":"67250.50","volume_24h":"12345"}"#;
        let parsed = CoinbaseSource::parse_message(text).unwrap().unwrap();
        f.controller
            .try_commit(SourceTier::CoinbaseWs, vec![parsed])
            .await;

        let cached = f.cache.get(Symbol::BTC).await.unwrap();
        assert_eq!(cached.price, 67250.50);
        assert!((cached.change - 750.50).abs() < 1e-9);
        assert!((cached.change_percent - 1.13).abs() < 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalates_to_tier2_when_tier1_never_connects() {
        let f = fixture();
        let tier1 = MockStream::never_connecting(SourceTier::CoinbaseWs);
        let tier2 = MockStream::connecting_after(SourceTier::KrakenWs, Duration::ZERO);
        let snapshot = Arc::new(MockSnapshot::with_ticks(vec![]));

        f.controller.spawn(SourceSet {
            tier1: Box::new(tier1),
            tier2: Box::new(tier2),
            snapshot,
        });

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(f.controller.active_source(), SourceTier::CoinbaseWs);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(f.controller.active_source(), SourceTier::KrakenWs);
        assert_eq!(
            f.controller.state(SourceTier::KrakenWs),
            SourceState::Connected
        );

        // Tier 2 connected, so the second window must not promote tier 3.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(f.controller.active_source(), SourceTier::KrakenWs);

        let _ = f.shutdown_tx.send(true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalates_to_tier3_when_no_stream_connects() {
        let f = fixture();
        let tier1 = MockStream::never_connecting(SourceTier::CoinbaseWs);
        let tier2 = MockStream::never_connecting(SourceTier::KrakenWs);
        let snapshot = Arc::new(MockSnapshot::with_ticks(vec![snapshot_tick(
            Symbol::BTC,
            50_000.0,
            2.0,
        )]));

        f.controller.spawn(SourceSet {
            tier1: Box::new(tier1),
            tier2: Box::new(tier2),
            snapshot,
        });

        tokio::time::sleep(Duration::from_millis(6200)).await;
        assert_eq!(f.controller.active_source(), SourceTier::CoinGeckoRest);

        // The poll loop engages and commits through the gate.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let cached = f.cache.get(Symbol::BTC).await.unwrap();
        assert_eq!(cached.price, 50_000.0);
        assert_eq!(cached.source, SourceTier::CoinGeckoRest);

        let _ = f.shutdown_tx.send(true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovered_stream_demotes_polling() {
        let f = fixture();
        // Tier 1's boot connect attempt is still in flight when tier 3 is
        // promoted; once it lands, tier 1 must take the slot back.
        let tier1 = MockStream::connecting_after(SourceTier::CoinbaseWs, Duration::from_secs(10));
        tier1.push_ticks(vec![tick(Symbol::BTC, 67250.50)]);
        let tier2 = MockStream::never_connecting(SourceTier::KrakenWs);
        let snapshot = Arc::new(MockSnapshot::with_ticks(vec![snapshot_tick(
            Symbol::BTC,
            50_000.0,
            2.0,
        )]));

        f.controller.spawn(SourceSet {
            tier1: Box::new(tier1),
            tier2: Box::new(tier2),
            snapshot,
        });

        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(f.controller.active_source(), SourceTier::CoinGeckoRest);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(f.controller.active_source(), SourceTier::CoinbaseWs);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let cached = f.cache.get(Symbol::BTC).await.unwrap();
        assert_eq!(cached.price, 67250.50);
        assert_eq!(cached.source, SourceTier::CoinbaseWs);

        let _ = f.shutdown_tx.send(true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_demoted_tier_reconnect_is_suppressed() {
        let f = fixture();
        let tier1 = MockStream::connecting_after(SourceTier::CoinbaseWs, Duration::ZERO);
        let tier1_connects = tier1.connect_call_handle();
        tier1.push_ticks(vec![tick(Symbol::BTC, 66000.0)]);
        tier1.push_error(SourceError::connection("socket dropped"));

        let tier2 = MockStream::connecting_after(SourceTier::KrakenWs, Duration::ZERO);
        tier2.push_ticks(vec![tick(Symbol::BTC, 67000.0)]);

        let snapshot = Arc::new(MockSnapshot::with_ticks(vec![]));

        f.controller.spawn(SourceSet {
            tier1: Box::new(tier1),
            tier2: Box::new(tier2),
            snapshot,
        });

        // Tier 1 connects, commits, fails; tier 2 takes over and commits.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.controller.active_source(), SourceTier::KrakenWs);
        assert_eq!(f.cache.get(Symbol::BTC).await.unwrap().price, 67000.0);

        // Well past several reconnect windows: the pending reconnect must
        // have observed the demotion and parked without reconnecting.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(
            tier1_connects.load(std::sync::atomic::Ordering::SeqCst),
            1,
            "demoted tier must not reconnect"
        );
        assert_eq!(f.cache.get(Symbol::BTC).await.unwrap().price, 67000.0);

        let _ = f.shutdown_tx.send(true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_populates_every_symbol() {
        let f = fixture();
        let tier1 = MockStream::connecting_after(SourceTier::CoinbaseWs, Duration::ZERO);
        tier1.push_ticks(vec![
            tick(Symbol::BTC, 67250.50),
            tick(Symbol::ETH, 3500.0),
            tick(Symbol::SOL, 150.25),
            tick(Symbol::XRP, 0.52),
            tick(Symbol::ADA, 0.38),
            tick(Symbol::DOGE, 0.12),
        ]);
        let tier2 = MockStream::never_connecting(SourceTier::KrakenWs);
        let snapshot = Arc::new(MockSnapshot::with_ticks(vec![]));

        f.controller.spawn(SourceSet {
            tier1: Box::new(tier1),
            tier2: Box::new(tier2),
            snapshot,
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        for symbol in Symbol::all() {
            let cached = f.cache.get(*symbol).await.unwrap();
            assert!(cached.price > 0.0, "{symbol} must have a positive price");
        }

        let _ = f.shutdown_tx.send(true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_geo_blocked_stream_is_sidelined() {
        let f = fixture();
        let tier1 = MockStream::connecting_after(SourceTier::CoinbaseWs, Duration::ZERO);
        let tier1_connects = tier1.connect_call_handle();
        tier1.push_error(SourceError::GeoBlocked);
        let tier2 = MockStream::connecting_after(SourceTier::KrakenWs, Duration::ZERO);
        let snapshot = Arc::new(MockSnapshot::with_ticks(vec![]));

        f.controller.spawn(SourceSet {
            tier1: Box::new(tier1),
            tier2: Box::new(tier2),
            snapshot,
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            f.controller.state(SourceTier::CoinbaseWs),
            SourceState::Failed
        );
        assert_eq!(f.controller.active_source(), SourceTier::KrakenWs);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(
            tier1_connects.load(std::sync::atomic::Ordering::SeqCst),
            1,
            "sidelined tier must not be retried"
        );

        let _ = f.shutdown_tx.send(true);
    }

    #[tokio::test]
    async fn test_baseline_fallback_recomputes_from_cache() {
        let f = fixture();
        f.controller
            .try_commit(
                SourceTier::CoinbaseWs,
                vec![snapshot_tick(Symbol::SOL, 150.0, 5.0)],
            )
            .await;

        let failing: Arc<dyn SnapshotSource> =
            Arc::new(MockSnapshot::failing(|| SourceError::RateLimited));
        assert!(!f.controller.refresh_baseline(&failing).await);

        let cached = f.cache.get_all().await;
        f.baseline.recompute_from(&cached).await;
        let baseline = f.baseline.baseline(Symbol::SOL).await.unwrap();
        assert!((baseline - 150.0 / 1.05).abs() < 1e-9);
    }
}
