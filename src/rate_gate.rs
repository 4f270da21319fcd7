//! Minimum-spacing gate for outbound requests

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Enforces a minimum cooldown between acquisitions.
///
/// Independent of any interval timer: bursts of manual poll triggers collapse
/// into at most one outbound request per cooldown window.
pub struct RateGate {
    cooldown: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateGate {
    /// Creates a gate with the given cooldown
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: Mutex::new(None),
        }
    }

    /// Returns true when the cooldown has elapsed, consuming the permit.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match *last {
            Some(prev) if now.duration_since(prev) < self.cooldown => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_permit() {
        let gate = RateGate::new(Duration::from_secs(5));

        let granted = (0..10).filter(|_| gate.try_acquire()).count();
        assert_eq!(granted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_returns_after_cooldown() {
        let gate = RateGate::new(Duration::from_secs(5));
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
    }
}
