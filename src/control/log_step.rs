//! Log Step
//!
//! Emits a line when the invocation enters the chain and another when the
//! rest of the chain comes back, so one entry in a spec list surfaces the
//! full lifecycle of everything declared after it.

use async_trait::async_trait;
use log::{log, warn, Level};
use serde::Deserialize;
use serde_json::Value;

use crate::control::parse_args;
use crate::engine::adapter::{DualStep, DualView};
use crate::engine::chain::{Next, StepResult};

/// Configuration for [`LogStep`], deserialized from spec arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level name; unknown names fall back to `debug`.
    pub level: String,
    pub include_args: bool,
    pub include_state: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            include_args: true,
            include_state: false,
        }
    }
}

pub struct LogStep {
    level: Level,
    include_args: bool,
    include_state: bool,
}

impl LogStep {
    pub fn new(config: LogConfig) -> Self {
        let level = match config.level.parse() {
            Ok(level) => level,
            Err(_) => {
                warn!("unknown log level '{}', using debug", config.level);
                Level::Debug
            }
        };
        Self {
            level,
            include_args: config.include_args,
            include_state: config.include_state,
        }
    }

    pub fn from_args(args: Value) -> Self {
        Self::new(parse_args("log", args))
    }
}

#[async_trait]
impl DualStep for LogStep {
    fn name(&self) -> &str {
        "log"
    }

    async fn call(&self, view: DualView, next: Next) -> StepResult {
        let key = view.key().await;

        if self.include_args {
            log!(
                self.level,
                "[{}] started ({}) args={}",
                key,
                view.scope(),
                view.arguments().await
            );
        } else {
            log!(self.level, "[{}] started ({})", key, view.scope());
        }

        let result = next.run().await;

        match &result {
            Ok(outcome) => {
                let status = if outcome.is_terminated() {
                    "terminated"
                } else {
                    "completed"
                };
                if self.include_state {
                    log!(
                        self.level,
                        "[{}] {} state={}",
                        key,
                        status,
                        Value::Object(view.state_snapshot().await)
                    );
                } else {
                    log!(self.level, "[{}] {}", key, status);
                }
            }
            Err(err) => log!(self.level, "[{}] failed: {}", key, err),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::testutil::{ctx, Counter};
    use crate::engine::adapter::adapt_dual;
    use crate::engine::chain::Chain;
    use crate::engine::context::Outcome;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_log_step_is_transparent() {
        let hits = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new(vec![
            adapt_dual(Arc::new(LogStep::from_args(Value::Null))),
            adapt_dual(Arc::new(Counter { hits: hits.clone() })),
        ]);

        let outcome = chain.run(ctx("log_a", "save", json!({}))).await.unwrap();

        assert_eq!(outcome, Outcome::Continue);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_log_step_forwards_failures() {
        use crate::control::testutil::Flaky;
        use crate::error::EngineError;

        let calls = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new(vec![
            adapt_dual(Arc::new(LogStep::from_args(json!({ "level": "info" })))),
            adapt_dual(Arc::new(Flaky {
                fail_first: 1,
                calls: calls.clone(),
            })),
        ]);

        let err = chain.run(ctx("log_b", "save", json!({}))).await.unwrap_err();
        assert!(matches!(err, EngineError::Step { .. }));
    }

    #[test]
    fn test_unknown_level_falls_back_to_debug() {
        let step = LogStep::from_args(json!({ "level": "loud" }));
        assert_eq!(step.level, Level::Debug);

        let step = LogStep::from_args(json!({ "level": "warn" }));
        assert_eq!(step.level, Level::Warn);
    }
}
