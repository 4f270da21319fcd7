//! In-memory last-known-good price cache
//!
//! The single source of truth read by every consuming subsystem. Entries are
//! created on the first accepted commit for a symbol, mutated only through
//! the failover controller's commit gate, and never deleted until shutdown.
//! When every upstream tier is down the cache simply keeps serving the last
//! committed value; before the first commit a read returns `None`.

use crate::{
    constants::STALE_THRESHOLD_SECS,
    types::{PriceUpdate, Symbol},
};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Shared cache of the last committed price per symbol
pub struct PriceCache {
    prices: RwLock<HashMap<Symbol, PriceUpdate>>,
}

impl PriceCache {
    /// Creates an empty cache
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Stores a committed update, replacing any prior entry for the symbol.
    ///
    /// Called only from the failover controller after the commit gate has
    /// accepted the write.
    pub(crate) async fn set(&self, update: PriceUpdate) {
        let mut prices = self.prices.write().await;
        tracing::trace!(
            symbol = %update.symbol,
            price = update.price,
            source = %update.source,
            "cache write"
        );
        prices.insert(update.symbol, update);
    }

    /// Gets the last committed price for a symbol, stale or not
    pub async fn get(&self, symbol: Symbol) -> Option<PriceUpdate> {
        let prices = self.prices.read().await;
        prices.get(&symbol).cloned()
    }

    /// Gets all committed prices in canonical symbol order
    pub async fn get_all(&self) -> Vec<PriceUpdate> {
        let prices = self.prices.read().await;
        Symbol::all()
            .iter()
            .filter_map(|s| prices.get(s).cloned())
            .collect()
    }

    /// Checks whether a first commit has landed for the symbol
    pub async fn has_price(&self, symbol: Symbol) -> bool {
        let prices = self.prices.read().await;
        prices.contains_key(&symbol)
    }

    /// Checks if the entry for a symbol is stale (or absent)
    pub async fn is_stale(&self, symbol: Symbol) -> bool {
        let prices = self.prices.read().await;
        match prices.get(&symbol) {
            Some(update) => update.is_stale(STALE_THRESHOLD_SECS),
            None => true,
        }
    }

    /// Clears every entry. Only called at service shutdown.
    pub(crate) async fn clear(&self) {
        let mut prices = self.prices.write().await;
        prices.clear();
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceTier;
    use chrono::Utc;

    fn update(symbol: Symbol, price: f64) -> PriceUpdate {
        PriceUpdate {
            symbol,
            price,
            change: 0.0,
            change_percent: 0.0,
            timestamp: Utc::now(),
            volume: None,
            market_cap: None,
            source: SourceTier::CoinbaseWs,
        }
    }

    #[tokio::test]
    async fn test_absent_before_first_commit() {
        let cache = PriceCache::new();
        assert!(cache.get(Symbol::BTC).await.is_none());
        assert!(!cache.has_price(Symbol::BTC).await);
        assert!(cache.is_stale(Symbol::BTC).await);
        assert!(cache.get_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = PriceCache::new();
        cache.set(update(Symbol::BTC, 67250.50)).await;
        cache.set(update(Symbol::ETH, 3500.0)).await;

        let btc = cache.get(Symbol::BTC).await.unwrap();
        assert_eq!(btc.price, 67250.50);
        assert!(cache.has_price(Symbol::ETH).await);

        // get_all follows the canonical symbol order
        let all = cache.get_all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].symbol, Symbol::BTC);
        assert_eq!(all[1].symbol, Symbol::ETH);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_latest() {
        let cache = PriceCache::new();
        cache.set(update(Symbol::SOL, 150.0)).await;
        cache.set(update(Symbol::SOL, 151.5)).await;
        assert_eq!(cache.get(Symbol::SOL).await.unwrap().price, 151.5);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = PriceCache::new();
        cache.set(update(Symbol::BTC, 1.0)).await;
        cache.clear().await;
        assert!(cache.get(Symbol::BTC).await.is_none());
    }
}
