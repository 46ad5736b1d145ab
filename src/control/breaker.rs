//! Circuit Breaker Step
//!
//! Tracks downstream failures per key through three phases. Closed counts
//! consecutive failures; reaching the threshold opens the circuit, which
//! short-circuits every call until the reset window elapses. The first
//! call after the window probes half-open: enough consecutive successes
//! close the circuit again, any failure re-opens it. Each admitted attempt
//! additionally races a timeout, and a lost race counts as a failure.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::control::{parse_args, MAX_TRACKED_KEYS};
use crate::engine::adapter::{DualStep, DualView};
use crate::engine::chain::{Next, StepResult};
use crate::engine::context::Outcome;
use crate::error::EngineError;

/// Configuration for [`Breaker`], deserialized from spec arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// Per-attempt time budget.
    pub timeout_ms: u64,
    /// How long an open circuit rejects before probing.
    pub reset_ms: u64,
    /// Terminal payload for rejected calls; absent means rejection fails
    /// the chain instead.
    pub fallback: Option<Value>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 1_000,
            reset_ms: 30_000,
            fallback: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { successes: u32 },
}

/// Circuit phase per `subject.operation`.
static CIRCUITS: Lazy<Mutex<HashMap<String, Phase>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub struct Breaker {
    config: BreakerConfig,
}

impl Breaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self { config }
    }

    pub fn from_args(args: Value) -> Self {
        Self::new(parse_args("circuit_breaker", args))
    }

    /// Admission check. Open circuits whose reset window has elapsed
    /// transition to half-open and admit the probing call.
    fn admit(&self, key: &str, now: Instant) -> bool {
        let mut circuits = CIRCUITS.lock().unwrap_or_else(PoisonError::into_inner);
        if !circuits.contains_key(key) && circuits.len() >= MAX_TRACKED_KEYS {
            circuits.retain(|_, phase| !matches!(phase, Phase::Closed { failures: 0 }));
        }

        let phase = circuits
            .entry(key.to_string())
            .or_insert(Phase::Closed { failures: 0 });
        match *phase {
            Phase::Closed { .. } | Phase::HalfOpen { .. } => true,
            Phase::Open { until } if now >= until => {
                debug!("circuit for '{}' probing half-open", key);
                *phase = Phase::HalfOpen { successes: 0 };
                true
            }
            Phase::Open { .. } => false,
        }
    }

    fn record_success(&self, key: &str) {
        let mut circuits = CIRCUITS.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(phase) = circuits.get_mut(key) {
            match *phase {
                Phase::Closed { .. } => *phase = Phase::Closed { failures: 0 },
                Phase::HalfOpen { successes } => {
                    let successes = successes + 1;
                    if successes >= self.config.success_threshold {
                        info!("circuit for '{}' closed", key);
                        *phase = Phase::Closed { failures: 0 };
                    } else {
                        *phase = Phase::HalfOpen { successes };
                    }
                }
                Phase::Open { .. } => {}
            }
        }
    }

    fn record_failure(&self, key: &str, now: Instant) {
        let until = now + Duration::from_millis(self.config.reset_ms);
        let mut circuits = CIRCUITS.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(phase) = circuits.get_mut(key) {
            match *phase {
                Phase::Closed { failures } => {
                    let failures = failures + 1;
                    if failures >= self.config.failure_threshold {
                        warn!("circuit for '{}' opened after {} failure(s)", key, failures);
                        *phase = Phase::Open { until };
                    } else {
                        *phase = Phase::Closed { failures };
                    }
                }
                Phase::HalfOpen { .. } => {
                    warn!("circuit for '{}' re-opened from half-open", key);
                    *phase = Phase::Open { until };
                }
                Phase::Open { .. } => {}
            }
        }
    }
}

#[async_trait]
impl DualStep for Breaker {
    fn name(&self) -> &str {
        "circuit_breaker"
    }

    async fn call(&self, view: DualView, next: Next) -> StepResult {
        let key = view.key().await;

        if !self.admit(&key, Instant::now()) {
            debug!("circuit open, rejecting '{}'", key);
            return match &self.config.fallback {
                Some(value) => {
                    view.terminate(value.clone()).await;
                    Ok(Outcome::Terminated(value.clone()))
                }
                None => Err(EngineError::CircuitOpen { key }),
            };
        }

        let budget = Duration::from_millis(self.config.timeout_ms);
        let attempt = tokio::time::timeout(budget, next.run()).await;
        let result = match attempt {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                millis: self.config.timeout_ms,
            }),
        };

        match &result {
            Ok(_) => self.record_success(&key),
            Err(err) => {
                debug!("attempt for '{}' failed: {}", key, err);
                self.record_failure(&key, Instant::now());
            }
        }

        result
    }
}
