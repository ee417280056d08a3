use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Inclusive window a randomized delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange::secs(0, 0);

    pub const fn secs(min_secs: u64, max_secs: u64) -> Self {
        Self { min_secs, max_secs }
    }

    pub fn is_valid(&self) -> bool {
        self.min_secs <= self.max_secs
    }

    /// Uniform sample in `[min, max]` with millisecond resolution.
    pub fn sample(&self) -> Duration {
        let min_ms = self.min_secs.saturating_mul(1000);
        let max_ms = self.max_secs.saturating_mul(1000);
        if max_ms <= min_ms {
            return Duration::from_millis(min_ms);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }
}

/// Sleep for `duration` unless `cancel` fires first. Returns `false` if cancelled.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_in_range() {
        let range = DelayRange::secs(8, 15);
        for _ in 0..200 {
            let d = range.sample();
            assert!(d >= Duration::from_secs(8) && d <= Duration::from_secs(15));
        }
    }

    #[test]
    fn degenerate_range_is_fixed() {
        assert_eq!(DelayRange::secs(5, 5).sample(), Duration::from_secs(5));
        assert_eq!(DelayRange::ZERO.sample(), Duration::ZERO);
        assert!(!DelayRange::secs(6, 3).is_valid());
    }

    #[tokio::test]
    async fn cancel_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let completed = sleep_or_cancel(Duration::from_secs(30), &cancel).await;
        assert!(!completed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
