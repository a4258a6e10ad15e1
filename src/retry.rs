//! Retry policy for the publish pipeline
//!
//! Decides, from the attempt count and a classified error verdict, whether
//! a failed step is retried and after how long. Non-transient verdicts and
//! anything at or past the attempt ceiling give up immediately; transient
//! failures back off exponentially with jitter so that a batch of posts
//! failing together does not retry together. Rate-limit verdicts get a
//! longer floor than other transients.

use std::time::Duration;

use rand::Rng;

use crate::services::instagram_errors::{ErrorCategory, ErrorVerdict};

/// What to do about a failed attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Total attempts allowed per post before a transient failure becomes
    /// terminal. Prevents infinite retries against a degraded dependency.
    pub max_attempts: i32,
    pub base_delay_secs: f64,
    pub multiplier: f64,
    pub max_delay_secs: f64,
    /// Jitter fraction applied to every delay (0.1 = +/-10%)
    pub max_jitter: f64,
    /// Minimum delay for rate-limit verdicts, to stop hammering a throttled
    /// endpoint with the short early-attempt delays
    pub rate_limit_floor_secs: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 2.0,
            multiplier: 2.0,
            max_delay_secs: 300.0,
            max_jitter: 0.1,
            rate_limit_floor_secs: 60.0,
        }
    }
}

impl BackoffPolicy {
    /// Decide the fate of a post whose step just failed for the
    /// `attempt`-th time (1-based, counting the failure being handled).
    pub fn decide(&self, attempt: i32, verdict: &ErrorVerdict) -> RetryDecision {
        if !verdict.is_transient {
            return RetryDecision::GiveUp;
        }
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let delay = self.delay_secs(attempt, verdict.category);
        RetryDecision::RetryAfter(Duration::from_secs_f64(self.jittered(delay)))
    }

    /// Deterministic part of the backoff curve. Also mirrored by the claim
    /// query's SQL gate, which is why it is jitter-free.
    pub fn delay_secs(&self, attempt: i32, category: ErrorCategory) -> f64 {
        let exponent = (attempt - 1).max(0);
        let exponential = self.base_delay_secs * self.multiplier.powi(exponent);
        let capped = exponential.min(self.max_delay_secs);

        if category == ErrorCategory::RateLimit {
            capped.max(self.rate_limit_floor_secs).min(self.max_delay_secs)
        } else {
            capped
        }
    }

    fn jittered(&self, delay_secs: f64) -> f64 {
        if self.max_jitter <= 0.0 {
            return delay_secs;
        }
        let factor = rand::rng().random_range(-self.max_jitter..=self.max_jitter);
        (delay_secs * (1.0 + factor)).max(0.0)
    }
}
