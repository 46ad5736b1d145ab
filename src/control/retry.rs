//! Retry Step
//!
//! Re-attempts a failed continuation up to a configured number of extra
//! tries. The only primitive that swallows downstream failures; when every
//! attempt fails the last attempt's error propagates unchanged.

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::control::parse_args;
use crate::engine::adapter::{DualStep, DualView};
use crate::engine::chain::{Next, StepResult};

/// Configuration for [`Retry`], deserialized from spec arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after the initial one.
    pub max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

pub struct Retry {
    max_retries: usize,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
        }
    }

    pub fn from_args(args: Value) -> Self {
        Self::new(parse_args("retryable", args))
    }
}

#[async_trait]
impl DualStep for Retry {
    fn name(&self) -> &str {
        "retryable"
    }

    async fn call(&self, view: DualView, next: Next) -> StepResult {
        let key = view.key().await;
        let attempts = self.max_retries + 1;

        let mut last = next.fork().run().await;
        for attempt in 2..=attempts {
            match last {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    warn!(
                        "attempt {}/{} for '{}' failed: {}",
                        attempt - 1,
                        attempts,
                        key,
                        err
                    );
                }
            }
            debug!("re-attempting '{}' ({}/{})", key, attempt, attempts);
            last = next.fork().run().await;
        }

        last
    }
}
