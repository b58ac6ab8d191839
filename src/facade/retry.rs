//! Bounded retry with jittered exponential backoff.

use crate::config::RetryConfig;
use crate::{Error, Result};
use rand::Rng;
use std::time::Duration;

/// Internal decision for how to proceed after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Retry { delay: Duration },
    Fail,
}

/// Retry policy for the protected remote call.
///
/// Only transient classes are retried: connection/read timeouts and upstream
/// 5xx. A 429 is never retried here — admission already governs concurrency,
/// and retrying internally would double up backoff policy — and non-429 4xx
/// fails on any attempt, so retrying it only burns quota.
#[derive(Debug)]
pub struct RetryPolicy {
    cfg: RetryConfig,
}

impl RetryPolicy {
    /// Rejects a delay floor above the ceiling at construction, so the
    /// backoff arithmetic never has to handle an inverted range.
    pub fn new(cfg: RetryConfig) -> Result<Self> {
        if cfg.min_delay_ms > cfg.max_delay_ms {
            return Err(Error::configuration(format!(
                "retry min_delay_ms {} exceeds max_delay_ms {}",
                cfg.min_delay_ms, cfg.max_delay_ms
            )));
        }
        Ok(Self { cfg })
    }

    pub fn max_retries(&self) -> u32 {
        self.cfg.max_retries
    }

    /// Exponential backoff clamped to the configured floor/ceiling, plus up
    /// to 10% jitter to avoid retry alignment across callers.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = 2u64.saturating_pow(attempt);
        let delay_ms = self
            .cfg
            .min_delay_ms
            .saturating_mul(exponential)
            .clamp(self.cfg.min_delay_ms, self.cfg.max_delay_ms);

        let jitter_ms = if self.cfg.jitter && delay_ms >= 10 {
            rand::thread_rng().gen_range(0..delay_ms / 10)
        } else {
            0
        };
        Duration::from_millis(delay_ms + jitter_ms)
    }

    /// Decide what to do after a failed attempt. `attempt` is 0-based.
    pub(crate) fn decide(&self, err: &Error, attempt: u32) -> Decision {
        if err.is_retryable() && attempt < self.cfg.max_retries {
            Decision::Retry { delay: self.backoff_delay(attempt) }
        } else {
            Decision::Fail
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // Defaults are a valid range by construction.
        Self { cfg: RetryConfig::default() }
    }
}
