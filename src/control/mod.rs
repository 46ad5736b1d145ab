//! Control-Flow Primitives
//!
//! Self-contained dual-scope steps wrapping a continuation, each owning a
//! small state machine over keyed process-wide state:
//!
//! - [`throttle`]: rejects calls arriving within a sliding window
//! - [`debounce`]: collapses bursts into one trailing execution
//! - [`retry`]: bounded re-attempts, the only primitive that swallows
//!   failures
//! - [`cache`]: TTL cache over terminal payloads
//! - [`breaker`]: three-phase circuit breaker with attempt timeout
//! - [`log_step`]: request logging around the continuation
//!
//! Keyed state is keyed by `subject.operation` (the cache additionally by
//! serialized arguments) and lives for the process lifetime, bounded by a
//! sweep of stale entries once a map outgrows [`MAX_TRACKED_KEYS`].

pub mod breaker;
pub mod cache;
pub mod debounce;
pub mod log_step;
pub mod retry;
pub mod throttle;

pub use breaker::{Breaker, BreakerConfig};
pub use cache::{Cache, CacheConfig};
pub use debounce::{Debounce, DebounceConfig};
pub use log_step::{LogConfig, LogStep};
pub use retry::{Retry, RetryConfig};
pub use throttle::{Throttle, ThrottleConfig};

use log::warn;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Cap on distinct keys tracked per primitive before stale entries are
/// swept on insert.
pub(crate) const MAX_TRACKED_KEYS: usize = 1024;

/// Deserializes step configuration from spec arguments, falling back to
/// defaults on null or malformed input (a misconfigured entry degrades,
/// it does not abort resolution).
pub(crate) fn parse_args<T>(step: &str, args: Value) -> T
where
    T: DeserializeOwned + Default,
{
    if args.is_null() {
        return T::default();
    }
    match serde_json::from_value(args) {
        Ok(config) => config,
        Err(err) => {
            warn!("invalid args for step '{}', using defaults: {}", step, err);
            T::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::engine::adapter::{DualStep, DualView};
    use crate::engine::chain::{Next, StepResult};
    use crate::engine::context::{ExecutionContext, Outcome, SharedContext};
    use crate::error::EngineError;
    use crate::spec::ScopeTag;

    /// Counts downstream executions.
    pub struct Counter {
        pub hits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DualStep for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn call(&self, _view: DualView, next: Next) -> StepResult {
            self.hits.fetch_add(1, Ordering::SeqCst);
            next.run().await
        }
    }

    /// Counts executions and terminates with the hit number.
    pub struct TerminatingCounter {
        pub hits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DualStep for TerminatingCounter {
        fn name(&self) -> &str {
            "terminating_counter"
        }

        async fn call(&self, view: DualView, _next: Next) -> StepResult {
            let n = self.hits.fetch_add(1, Ordering::SeqCst) + 1;
            view.terminate(json!({ "n": n })).await;
            Ok(Outcome::Terminated(json!({ "n": n })))
        }
    }

    /// Fails the first `fail_first` calls, then succeeds.
    pub struct Flaky {
        pub fail_first: usize,
        pub calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DualStep for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn call(&self, _view: DualView, next: Next) -> StepResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(EngineError::step("flaky", format!("attempt {} failed", n)));
            }
            next.run().await
        }
    }

    /// Fresh restricted-scope context.
    pub fn ctx(subject: &str, operation: &str, args: Value) -> SharedContext {
        ExecutionContext::new(subject, operation, args, ScopeTag::Restricted).into_shared()
    }
}
