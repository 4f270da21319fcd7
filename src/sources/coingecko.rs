//! CoinGecko REST source (tier 3)
//!
//! One batched snapshot request covers every symbol's price, 24h change
//! percent, volume, and market cap. Besides serving as the last-resort
//! polling tier, this source bootstraps and refreshes the 24h baseline
//! regardless of which tier is active.

use crate::{
    constants::{
        COINGECKO_API_URL, COINGECKO_MARKETS_ENDPOINT, POLL_COOLDOWN_SECS, REQUEST_TIMEOUT_SECS,
        USER_AGENT,
    },
    error::SourceError,
    rate_gate::RateGate,
    source::SnapshotSource,
    types::{SourceTick, SourceTier, Symbol},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// One row of the `/coins/markets` response
#[derive(Debug, Deserialize)]
struct MarketRow {
    id: String,
    current_price: Option<f64>,
    price_change_percentage_24h: Option<f64>,
    total_volume: Option<f64>,
    market_cap: Option<f64>,
}

/// Polling adapter for the CoinGecko markets endpoint
pub struct CoinGeckoSource {
    client: Client,
    gate: RateGate,
}

impl CoinGeckoSource {
    /// Creates a new CoinGecko source
    pub fn new() -> Result<Self, SourceError> {
        Self::with_cooldown(Duration::from_secs(POLL_COOLDOWN_SECS))
    }

    /// Creates a source with a custom inter-request cooldown
    pub fn with_cooldown(cooldown: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(SourceError::Network)?;

        Ok(Self {
            client,
            gate: RateGate::new(cooldown),
        })
    }

    /// Builds the markets URL for a batched snapshot
    fn build_url(&self, symbols: &[Symbol]) -> String {
        let ids = symbols
            .iter()
            .filter_map(|s| s.coingecko_id())
            .collect::<Vec<_>>()
            .join(",");

        format!(
            "{}{}?vs_currency=usd&ids={}",
            COINGECKO_API_URL, COINGECKO_MARKETS_ENDPOINT, ids
        )
    }

    /// Parses the response rows into ticks, dropping unmapped or priceless rows
    fn parse_rows(rows: Vec<MarketRow>) -> Vec<SourceTick> {
        rows.into_iter()
            .filter_map(|row| {
                let symbol = Symbol::from_coingecko_id(&row.id)?;
                let price = row.current_price.filter(|p| *p > 0.0)?;
                Some(SourceTick {
                    symbol,
                    price,
                    change_percent: row.price_change_percentage_24h,
                    volume: row.total_volume,
                    market_cap: row.market_cap,
                })
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn parse_body(body: &str) -> Result<Vec<SourceTick>, SourceError> {
        let rows: Vec<MarketRow> =
            serde_json::from_str(body).map_err(|e| SourceError::parse(e.to_string()))?;
        Ok(Self::parse_rows(rows))
    }
}

#[async_trait]
impl SnapshotSource for CoinGeckoSource {
    fn tier(&self) -> SourceTier {
        SourceTier::CoinGeckoRest
    }

    async fn fetch_snapshot(&self, symbols: &[Symbol]) -> Result<Vec<SourceTick>, SourceError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        if !self.gate.try_acquire() {
            return Err(SourceError::Cooldown);
        }

        let url = self.build_url(symbols);
        tracing::debug!(%url, "Fetching CoinGecko snapshot");

        let response = self.client.get(&url).send().await?;

        match response.status().as_u16() {
            429 => return Err(SourceError::RateLimited),
            451 => return Err(SourceError::GeoBlocked),
            status if !response.status().is_success() => {
                return Err(SourceError::connection(format!(
                    "HTTP {}: {}",
                    status,
                    response.text().await.unwrap_or_default()
                )));
            }
            _ => {}
        }

        let rows: Vec<MarketRow> = response
            .json()
            .await
            .map_err(|e| SourceError::parse(format!("bad markets response: {e}")))?;

        let ticks = Self::parse_rows(rows);
        if ticks.is_empty() {
            return Err(SourceError::parse("no usable rows in markets response"));
        }

        tracing::debug!(count = ticks.len(), "Fetched CoinGecko snapshot");
        Ok(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_markets_body() {
        let body = r#"[
            {"id":"bitcoin","current_price":67250.50,"price_change_percentage_24h":1.13,
             "total_volume":28000000000.0,"market_cap":1300000000000.0},
            {"id":"solana","current_price":150.25,"price_change_percentage_24h":-2.4,
             "total_volume":2500000000.0,"market_cap":70000000000.0}
        ]"#;

        let ticks = CoinGeckoSource::parse_body(body).unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].symbol, Symbol::BTC);
        assert_eq!(ticks[0].price, 67250.50);
        assert_eq!(ticks[0].change_percent, Some(1.13));
        assert_eq!(ticks[0].market_cap, Some(1.3e12));
        assert_eq!(ticks[1].symbol, Symbol::SOL);
        assert_eq!(ticks[1].change_percent, Some(-2.4));
    }

    #[test]
    fn test_unknown_and_priceless_rows_dropped() {
        let body = r#"[
            {"id":"shiba-inu","current_price":0.00002,"price_change_percentage_24h":0.1,
             "total_volume":null,"market_cap":null},
            {"id":"bitcoin","current_price":null,"price_change_percentage_24h":null,
             "total_volume":null,"market_cap":null},
            {"id":"ethereum","current_price":3500.0,"price_change_percentage_24h":null,
             "total_volume":null,"market_cap":null}
        ]"#;

        let ticks = CoinGeckoSource::parse_body(body).unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].symbol, Symbol::ETH);
        assert_eq!(ticks[0].change_percent, None);
    }

    #[test]
    fn test_build_url_joins_ids() {
        let source = CoinGeckoSource::new().unwrap();
        let url = source.build_url(&[Symbol::BTC, Symbol::ETH]);
        assert!(url.contains("/coins/markets?vs_currency=usd&ids=bitcoin,ethereum"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_blocks_second_fetch() {
        // The gate is consulted before any network activity, so the second
        // call fails fast with Cooldown and performs no outbound request.
        let source = CoinGeckoSource::with_cooldown(Duration::from_secs(5)).unwrap();
        assert!(source.gate.try_acquire());

        let result = source.fetch_snapshot(&[Symbol::BTC]).await;
        assert!(matches!(result, Err(SourceError::Cooldown)));
    }
}
