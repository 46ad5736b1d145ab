//! Throttle Step
//!
//! Rejects calls on a key arriving within `wait` of the last accepted
//! call. With a configured default payload the rejection terminates the
//! chain normally; without one it fails with a rate-exceeded error.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::control::{parse_args, MAX_TRACKED_KEYS};
use crate::engine::adapter::{DualStep, DualView};
use crate::engine::chain::{Next, StepResult};
use crate::engine::context::Outcome;
use crate::error::EngineError;

/// Configuration for [`Throttle`], deserialized from spec arguments.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Minimum spacing between accepted calls on one key.
    pub wait_ms: u64,
    /// Terminal payload for rejected calls; absent means rejection fails
    /// the chain instead.
    pub default_value: Option<Value>,
}

/// Last accepted time per `subject.operation`, together with the window
/// it was recorded under so eviction can tell when the record lapses.
static LAST_ACCEPTED: Lazy<Mutex<HashMap<String, (Instant, Duration)>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub struct Throttle {
    wait: Duration,
    default_value: Option<Value>,
}

impl Throttle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            wait: Duration::from_millis(config.wait_ms),
            default_value: config.default_value,
        }
    }

    pub fn from_args(args: Value) -> Self {
        Self::new(parse_args("throttle", args))
    }
}

#[async_trait]
impl DualStep for Throttle {
    fn name(&self) -> &str {
        "throttle"
    }

    async fn call(&self, view: DualView, next: Next) -> StepResult {
        let key = view.key().await;
        let now = Instant::now();

        let accepted = {
            let mut map = LAST_ACCEPTED
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match map.get(&key) {
                Some((last, _)) if now.duration_since(*last) < self.wait => false,
                _ => {
                    if map.len() >= MAX_TRACKED_KEYS {
                        // Each record lapses on its own window, not the
                        // window of whichever instance triggered the
                        // sweep.
                        map.retain(|_, (last, wait)| now.duration_since(*last) < *wait);
                    }
                    map.insert(key.clone(), (now, self.wait));
                    true
                }
            }
        };

        if accepted {
            return next.run().await;
        }

        debug!("throttled '{}'", key);
        match &self.default_value {
            Some(value) => {
                view.terminate(value.clone()).await;
                Ok(Outcome::Terminated(value.clone()))
            }
            None => Err(EngineError::RateExceeded { key }),
        }
    }
}
