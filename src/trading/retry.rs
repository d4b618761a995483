//! One retry policy shared by the open and close paths.
//!
//! Attempts are driven by `tokio-retry` with exponential backoff and jitter.
//! Only errors that report `is_retryable()` are retried, and every retry runs
//! with a wider slippage tolerance than the attempt before it.

use crate::trading::config::ExecutionConfig;
use crate::trading::error::ExecutionError;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub base_slippage_bps: u16,
    pub max_slippage_bps: u16,
    pub widen_bps: u16,
    /// Price impact (percent) above which the starting tolerance grows
    pub elevated_price_impact_pct: f64,
}

/// Result of a retried operation plus how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ExecutionError>,
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base_ms: config.backoff_base_ms,
            backoff_max_ms: config.backoff_max_ms,
            base_slippage_bps: config.base_slippage_bps,
            max_slippage_bps: config.max_slippage_bps,
            widen_bps: config.retry_widen_bps,
            elevated_price_impact_pct: config.elevated_price_impact_pct,
        }
    }

    /// Delays between attempts: base, 2x base, 4x base ... capped, jittered.
    pub fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor((self.backoff_base_ms / 2).max(1))
            .max_delay(Duration::from_millis(self.backoff_max_ms))
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Slippage tolerance for `attempt` (1-based). Starts at the base value,
    /// grows in proportion to an elevated price impact, widens on each retry
    /// and never exceeds the maximum.
    pub fn slippage_bps(&self, price_impact_pct: f64, attempt: u32) -> u16 {
        let mut bps = self.base_slippage_bps as f64;
        if self.elevated_price_impact_pct > 0.0 && price_impact_pct > self.elevated_price_impact_pct {
            bps *= price_impact_pct / self.elevated_price_impact_pct;
        }
        bps += self.widen_bps as f64 * attempt.saturating_sub(1) as f64;
        bps.round().min(self.max_slippage_bps as f64) as u16
    }

    /// Run `op` until it succeeds, fails with a terminal error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        let mut attempts = 0u32;
        let max_attempts = self.max_attempts;

        let result = RetryIf::spawn(
            self.backoff(),
            || {
                attempts += 1;
                op(attempts)
            },
            |e: &ExecutionError| {
                let retry = e.is_retryable();
                if retry {
                    warn!("Retryable failure: {}", e);
                }
                retry
            },
        )
        .await;

        if let Err(e) = &result {
            if e.is_retryable() {
                warn!("Giving up after {} of {} attempts: {}", attempts.min(max_attempts), max_attempts, e);
            }
        }

        RetryOutcome { result, attempts }
    }
}
