//! Retry with exponential backoff and jitter.
//!
//! Every facade call runs through a [`RetryPolicy`]. The policy is uniform
//! over error kinds: a `NotFound` is retried exactly like a transient
//! network failure, and the last error is returned unchanged once the
//! attempts are exhausted.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::Result;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between attempts in milliseconds (default: 1000)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Double the delay on every retry (default: true)
    #[serde(default = "default_true")]
    pub exponential_backoff: bool,

    /// Upper bound of the uniform random jitter in milliseconds (default: 1000)
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_max_jitter_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            exponential_backoff: true,
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Stateless retry executor.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Deterministic part of the delay before retry number `retry` (0-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.config.base_delay_ms;
        let delay_ms = if self.config.exponential_backoff {
            base.saturating_mul(2u64.saturating_pow(retry))
        } else {
            base
        };
        Duration::from_millis(delay_ms)
    }

    fn jitter(&self) -> Duration {
        if self.config.max_jitter_ms == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=self.config.max_jitter_ms);
        Duration::from_millis(jitter_ms)
    }

    /// Run `operation` until it succeeds or the retries are exhausted.
    ///
    /// The closure is invoked once per attempt, so it must build a fresh
    /// future each time.
    pub async fn execute<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} succeeded after {} retries", operation_name, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if attempt >= self.config.max_retries => {
                    if self.config.max_retries > 0 {
                        warn!(
                            "{} failed after {} attempts: {}",
                            operation_name,
                            attempt + 1,
                            e
                        );
                    }
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.backoff(attempt) + self.jitter();
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation_name,
                        attempt + 1,
                        self.config.max_retries + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
