use crate::config::manifest::{AppSettings, JitterMode, RetryBudget};
use crate::registry::ServiceSpec;
use rand::Rng;
use std::cmp::{max, min};
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(250);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

pub fn merge_retry_budgets<'a, I>(budgets: I) -> Option<RetryBudget>
where
    I: IntoIterator<Item = Option<&'a RetryBudget>>,
{
    let mut merged = RetryBudget::default();
    let mut seen = false;

    for budget in budgets.into_iter().flatten() {
        seen = true;
        merged.max_attempts = min_opt(merged.max_attempts, budget.max_attempts);
        merged.max_elapsed = min_duration_opt(merged.max_elapsed, budget.max_elapsed);
        merged.base_backoff = max_duration_opt(merged.base_backoff, budget.base_backoff);
        merged.max_backoff = min_duration_opt(merged.max_backoff, budget.max_backoff);
        merged.jitter = merge_jitter(merged.jitter, budget.jitter);
    }

    if seen {
        Some(merged)
    } else {
        None
    }
}

fn min_opt<T: Ord>(current: Option<T>, candidate: Option<T>) -> Option<T> {
    match (current, candidate) {
        (Some(lhs), Some(rhs)) => Some(min(lhs, rhs)),
        (Some(lhs), None) => Some(lhs),
        (None, Some(rhs)) => Some(rhs),
        (None, None) => None,
    }
}

fn max_duration_opt(current: Option<Duration>, candidate: Option<Duration>) -> Option<Duration> {
    match (current, candidate) {
        (Some(lhs), Some(rhs)) => Some(max(lhs, rhs)),
        (Some(lhs), None) => Some(lhs),
        (None, Some(rhs)) => Some(rhs),
        (None, None) => None,
    }
}

fn min_duration_opt(current: Option<Duration>, candidate: Option<Duration>) -> Option<Duration> {
    match (current, candidate) {
        (Some(lhs), Some(rhs)) => Some(min(lhs, rhs)),
        (Some(lhs), None) => Some(lhs),
        (None, Some(rhs)) => Some(rhs),
        (None, None) => None,
    }
}

fn merge_jitter(current: Option<JitterMode>, candidate: Option<JitterMode>) -> Option<JitterMode> {
    match (current, candidate) {
        (Some(lhs), Some(rhs)) => {
            if jitter_rank(rhs) >= jitter_rank(lhs) {
                Some(rhs)
            } else {
                Some(lhs)
            }
        }
        (Some(lhs), None) => Some(lhs),
        (None, Some(rhs)) => Some(rhs),
        (None, None) => None,
    }
}

const fn jitter_rank(mode: JitterMode) -> u8 {
    match mode {
        JitterMode::None => 0,
        JitterMode::Equal => 1,
        JitterMode::Full => 2,
    }
}

pub fn jitter_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    let min_secs = min.as_secs_f64();
    let span = max.as_secs_f64() - min_secs;
    let sample = rng.gen::<f64>() * span + min_secs;
    Duration::from_secs_f64(sample)
}

/// Effective retry policy for one service's probe loop, merged from the
/// app-level budget and the service's override.
#[derive(Clone, Copy, Debug)]
pub struct ProbeRetryPolicy {
    max_attempts: u32,
    max_elapsed: Option<Duration>,
    base_backoff: Duration,
    max_backoff: Duration,
    jitter: JitterMode,
}

impl ProbeRetryPolicy {
    pub fn for_service(app: &AppSettings, service: &ServiceSpec) -> Self {
        let mut policy = Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_elapsed: None,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            jitter: JitterMode::None,
        };

        let merged_budget =
            merge_retry_budgets([app.retry_budget.as_ref(), service.retry.as_ref()]);

        if let Some(budget) = merged_budget {
            if let Some(value) = budget.max_attempts {
                policy.max_attempts = value.max(1);
            }
            if let Some(value) = budget.max_elapsed {
                policy.max_elapsed = Some(value);
            }
            if let Some(value) = budget.base_backoff {
                policy.base_backoff = if value.is_zero() {
                    DEFAULT_BASE_BACKOFF
                } else {
                    value
                };
            }
            if let Some(value) = budget.max_backoff {
                policy.max_backoff = if value.is_zero() {
                    DEFAULT_MAX_BACKOFF
                } else {
                    value
                };
            }
            if let Some(mode) = budget.jitter {
                policy.jitter = mode;
            }
        }

        if policy.max_backoff < policy.base_backoff {
            policy.max_backoff = policy.base_backoff;
        }

        policy
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&self, attempts: u32, attempt_elapsed: Duration) -> Option<Duration> {
        if attempts >= self.max_attempts() {
            return None;
        }

        let mut delay = self.compute_backoff(attempts);
        delay = match self.jitter {
            JitterMode::None => delay,
            JitterMode::Equal => jitter_between(delay.mul_f64(0.5), delay),
            JitterMode::Full => jitter_between(Duration::from_secs(0), delay),
        };

        if let Some(limit) = self.max_elapsed {
            if attempt_elapsed >= limit {
                return None;
            }
            let remaining = limit - attempt_elapsed;
            if remaining < delay {
                return None;
            }
        }

        Some(delay)
    }

    /// Deterministic schedule: base doubled per completed attempt, clamped to
    /// the ceiling. Exponent saturates at 8 to keep the shift in range.
    pub fn compute_backoff(&self, attempts: u32) -> Duration {
        if self.base_backoff.is_zero() {
            return Duration::from_secs(0);
        }

        let exponent = attempts.saturating_sub(1).min(8);
        let factor = 1u32 << exponent;
        let mut delay = self.base_backoff.mul_f64(factor as f64);
        if delay > self.max_backoff {
            delay = self.max_backoff;
        }
        delay
    }
}
