use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Calculate a geometric backoff delay, optionally with jitter.
///
/// Formula: `min(base * multiplier^(attempt-1) + jitter, max)` (0-25% jitter)
pub fn calculate_backoff(
    attempt: u32,
    base: Duration,
    multiplier: u32,
    max: Duration,
    jitter: bool,
) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let max_ms = max.as_millis().min(u64::MAX as u128) as u64;

    let factor = (multiplier.max(1) as u64).saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(factor);

    let jitter_ms = if jitter && delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter_ms).min(max_ms))
}

/// Caller-side redelivery policy. The queue itself never computes backoff;
/// workers use this to pick the next due time after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    /// 5 minutes, then 25, 125 and 625; quarantined after the fifth attempt.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5 * 60),
            multiplier: 5,
            max_delay: Duration::from_secs(3 * 24 * 60 * 60),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: i32) -> Duration {
        let attempt = u32::try_from(attempt).unwrap_or(0);
        calculate_backoff(
            attempt,
            self.base_delay,
            self.multiplier,
            self.max_delay,
            self.jitter,
        )
    }

    /// Whether an item with this many recorded attempts is out of budget.
    pub fn is_exhausted(&self, attempts: i32) -> bool {
        attempts >= self.max_attempts
    }

    /// Next due time once `attempts_after` attempts have been recorded.
    ///
    /// `None` when the budget is spent: the item stays in storage and shows
    /// up in the quarantine view instead of being rescheduled.
    pub fn next_due_time(&self, attempts_after: i32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.is_exhausted(attempts_after) {
            return None;
        }

        let delay = chrono::Duration::from_std(self.delay_for(attempts_after))
            .unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(delay)
    }
}
