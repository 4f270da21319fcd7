//! Per-tier health metrics
//!
//! Tracks latency and success rates for each source tier: connect attempts
//! for the streaming tiers, snapshot requests for the polling tier.

use crate::types::SourceTier;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::RwLock;

/// Maximum number of samples kept in the rolling window
const MAX_SAMPLES: usize = 100;

/// Computed metrics for a single source tier
#[derive(Debug, Clone)]
pub struct SourceMetrics {
    /// Which tier these metrics describe
    pub tier: SourceTier,
    /// 50th percentile latency in milliseconds
    pub latency_p50_ms: f64,
    /// 99th percentile latency in milliseconds
    pub latency_p99_ms: f64,
    /// Success rate (0.0 to 1.0)
    pub success_rate: f64,
    /// Total number of operations tracked
    pub total_requests: u64,
    /// Number of failed operations
    pub failed_requests: u64,
}

impl SourceMetrics {
    /// Metrics with no data yet
    pub fn empty(tier: SourceTier) -> Self {
        Self {
            tier,
            latency_p50_ms: 0.0,
            latency_p99_ms: 0.0,
            success_rate: 1.0,
            total_requests: 0,
            failed_requests: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct LatencySample {
    duration_ms: f64,
    success: bool,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    failed: u64,
}

/// Collects samples for one tier
pub struct MetricsCollector {
    tier: SourceTier,
    samples: RwLock<VecDeque<LatencySample>>,
    counters: RwLock<Counters>,
}

impl MetricsCollector {
    /// Creates a collector for a tier
    pub fn new(tier: SourceTier) -> Self {
        Self {
            tier,
            samples: RwLock::new(VecDeque::with_capacity(MAX_SAMPLES)),
            counters: RwLock::new(Counters::default()),
        }
    }

    /// Records an operation with its duration and outcome
    pub async fn record(&self, duration: Duration, success: bool) {
        let duration_ms = duration.as_secs_f64() * 1000.0;

        {
            let mut counters = self.counters.write().await;
            counters.total += 1;
            if !success {
                counters.failed += 1;
            }
        }

        let mut samples = self.samples.write().await;
        if samples.len() >= MAX_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(LatencySample {
            duration_ms,
            success,
        });
    }

    /// Computes current metrics from the rolling window
    pub async fn snapshot(&self) -> SourceMetrics {
        let samples = self.samples.read().await;
        let counters = self.counters.read().await;

        if samples.is_empty() {
            return SourceMetrics::empty(self.tier);
        }

        let mut latencies: Vec<f64> = samples
            .iter()
            .filter(|s| s.success)
            .map(|s| s.duration_ms)
            .collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let success_rate = if counters.total > 0 {
            (counters.total - counters.failed) as f64 / counters.total as f64
        } else {
            1.0
        };

        SourceMetrics {
            tier: self.tier,
            latency_p50_ms: percentile(&latencies, 50.0),
            latency_p99_ms: percentile(&latencies, 99.0),
            success_rate,
            total_requests: counters.total,
            failed_requests: counters.failed,
        }
    }
}

/// Calculate percentile from sorted values
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let idx = (p / 100.0 * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[idx.min(sorted_values.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collector_counts_outcomes() {
        let collector = MetricsCollector::new(SourceTier::CoinGeckoRest);

        collector.record(Duration::from_millis(100), true).await;
        collector.record(Duration::from_millis(200), true).await;
        collector.record(Duration::from_millis(150), false).await;

        let metrics = collector.snapshot().await;
        assert_eq!(metrics.tier, SourceTier::CoinGeckoRest);
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.failed_requests, 1);
        assert!(metrics.success_rate > 0.6 && metrics.success_rate < 0.7);
    }

    #[tokio::test]
    async fn test_empty_collector() {
        let collector = MetricsCollector::new(SourceTier::CoinbaseWs);
        let metrics = collector.snapshot().await;
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.success_rate, 1.0);
    }

    #[test]
    fn test_percentile() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(percentile(&values, 50.0), 5.0);
        assert_eq!(percentile(&values, 99.0), 10.0);
    }
}
