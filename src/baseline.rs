//! Approximate 24h price baseline per symbol
//!
//! The streaming tiers report only an absolute last price, so change and
//! percent change have to be derived against a reconstructed "price 24 hours
//! ago". Whenever a source reports `change_percent` directly, the baseline is
//! recovered algebraically as `price / (1 + change_percent / 100)`.

use crate::types::{PriceUpdate, Symbol};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Change derived against the stored baseline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedChange {
    pub change: f64,
    pub change_percent: f64,
}

impl DerivedChange {
    /// First-observation convention: no baseline yet means zero change.
    pub const ZERO: DerivedChange = DerivedChange {
        change: 0.0,
        change_percent: 0.0,
    };
}

/// Tracks the approximate 24h-ago price per symbol
pub struct BaselineTracker {
    baselines: RwLock<HashMap<Symbol, f64>>,
}

impl BaselineTracker {
    /// Creates an empty tracker
    pub fn new() -> Self {
        Self {
            baselines: RwLock::new(HashMap::new()),
        }
    }

    /// Records a snapshot where the source reported the 24h change directly.
    ///
    /// Stores `baseline = price / (1 + change_percent / 100)`. Snapshots that
    /// would produce a non-positive baseline are ignored.
    pub async fn record_snapshot(&self, symbol: Symbol, price: f64, change_percent: f64) {
        let divisor = 1.0 + change_percent / 100.0;
        if !(price > 0.0) || divisor <= 0.0 {
            tracing::warn!(%symbol, price, change_percent, "ignoring unusable baseline snapshot");
            return;
        }

        let baseline = price / divisor;
        let mut baselines = self.baselines.write().await;
        baselines.insert(symbol, baseline);
    }

    /// Gets the stored baseline, if one exists
    pub async fn baseline(&self, symbol: Symbol) -> Option<f64> {
        let baselines = self.baselines.read().await;
        baselines.get(&symbol).copied()
    }

    /// Derives change and percent change for a current price.
    ///
    /// Returns zero change when no baseline has been recorded yet.
    pub async fn derive_change(&self, symbol: Symbol, current_price: f64) -> DerivedChange {
        let baselines = self.baselines.read().await;
        match baselines.get(&symbol) {
            Some(&baseline) if baseline > 0.0 => DerivedChange {
                change: current_price - baseline,
                change_percent: (current_price - baseline) / baseline * 100.0,
            },
            _ => DerivedChange::ZERO,
        }
    }

    /// Recomputes baselines from committed cache entries.
    ///
    /// Fallback path for the hourly refresh when the snapshot source is
    /// unavailable; keeps the baseline from drifting stale across long
    /// uptimes.
    pub async fn recompute_from(&self, updates: &[PriceUpdate]) {
        for update in updates {
            self.record_snapshot(update.symbol, update.price, update.change_percent)
                .await;
        }
    }
}

impl Default for BaselineTracker {
    fn default() -> Self {
        Self::new()
    }
}
