//! Debounce Step
//!
//! Collapses bursts of calls on one key into a single trailing execution:
//! each call supersedes the pending continuation and restarts the wait;
//! when the window finally elapses only the most recent continuation
//! runs, and every coalesced caller receives that same outcome.
//!
//! Superseded timers are cancelled implicitly: each scheduled wakeup
//! carries the generation it was armed for and becomes a no-op if a newer
//! call has bumped the entry's generation since.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::control::parse_args;
use crate::engine::adapter::{DualStep, DualView};
use crate::engine::chain::{Next, StepResult};
use crate::error::EngineError;

/// Configuration for [`Debounce`], deserialized from spec arguments.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Quiet period required before the pending execution fires.
    pub wait_ms: u64,
}

struct PendingEntry {
    generation: u64,
    latest: Next,
    waiters: Vec<oneshot::Sender<StepResult>>,
}

/// Pending executions per `subject.operation`. Entries remove themselves
/// when their timer fires.
static PENDING: Lazy<Mutex<HashMap<String, PendingEntry>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

static GENERATION: AtomicU64 = AtomicU64::new(0);

pub struct Debounce {
    wait: Duration,
}

impl Debounce {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            wait: Duration::from_millis(config.wait_ms),
        }
    }

    pub fn from_args(args: Value) -> Self {
        Self::new(parse_args("debounce", args))
    }
}

#[async_trait]
impl DualStep for Debounce {
    fn name(&self) -> &str {
        "debounce"
    }

    async fn call(&self, view: DualView, next: Next) -> StepResult {
        let key = view.key().await;
        let generation = GENERATION.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();

        {
            let mut map = PENDING.lock().unwrap_or_else(PoisonError::into_inner);
            match map.get_mut(&key) {
                Some(entry) => {
                    debug!("debounce superseding pending call for '{}'", key);
                    entry.generation = generation;
                    entry.latest = next;
                    entry.waiters.push(tx);
                }
                None => {
                    map.insert(
                        key.clone(),
                        PendingEntry {
                            generation,
                            latest: next,
                            waiters: vec![tx],
                        },
                    );
                }
            }
        }

        tokio::spawn(fire_after(key, generation, self.wait));

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::step("debounce", "pending execution dropped")),
        }
    }
}

/// Wakes after the quiet period and runs the pending continuation, unless
/// a newer call superseded this generation in the meantime.
async fn fire_after(key: String, generation: u64, wait: Duration) {
    tokio::time::sleep(wait).await;

    let entry = {
        let mut map = PENDING.lock().unwrap_or_else(PoisonError::into_inner);
        match map.get(&key) {
            Some(entry) if entry.generation == generation => map.remove(&key),
            _ => None,
        }
    };

    if let Some(entry) = entry {
        debug!(
            "debounce firing for '{}' with {} coalesced caller(s)",
            key,
            entry.waiters.len()
        );
        let result = entry.latest.run().await;
        for waiter in entry.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::testutil::{ctx, Counter};
    use crate::engine::adapter::{adapt_dual, DualView};
    use crate::engine::chain::Chain;
    use crate::engine::context::Outcome;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio::time::Instant;

    /// Records the arguments it observes, then terminates.
    struct ArgRecorder {
        hits: Arc<AtomicUsize>,
        seen: Arc<StdMutex<Option<Value>>>,
    }

    #[async_trait]
    impl DualStep for ArgRecorder {
        fn name(&self) -> &str {
            "arg_recorder"
        }

        async fn call(&self, view: DualView, _next: Next) -> StepResult {
            self.hits.fetch_add(1, Ordering::SeqCst);
            let args = view.arguments().await;
            *self.seen.lock().unwrap() = Some(args.clone());
            view.terminate(args.clone()).await;
            Ok(Outcome::Terminated(args))
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_latest_call() {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(StdMutex::new(None));
        let chain = Arc::new(Chain::new(vec![
            adapt_dual(Arc::new(Debounce::new(DebounceConfig { wait_ms: 50 }))),
            adapt_dual(Arc::new(ArgRecorder {
                hits: hits.clone(),
                seen: seen.clone(),
            })),
        ]));

        let start = Instant::now();
        let mut handles = Vec::new();
        for n in 1..=3 {
            let chain = chain.clone();
            handles.push(tokio::spawn(async move {
                chain
                    .run(ctx("debounce_a", "search", json!({ "n": n })))
                    .await
            }));
            settle().await;
            if n < 3 {
                tokio::time::advance(Duration::from_millis(10)).await;
                settle().await;
            }
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        // One downstream execution, with the last call's arguments.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), Some(json!({ "n": 3 })));

        // Every caller received the same outcome.
        for outcome in &outcomes {
            assert_eq!(*outcome, Outcome::Terminated(json!({ "n": 3 })));
        }

        // Fired one quiet period after the last call: t = 20 + 50.
        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_calls_each_execute() {
        let hits = Arc::new(AtomicUsize::new(0));
        let chain = Arc::new(Chain::new(vec![
            adapt_dual(Arc::new(Debounce::new(DebounceConfig { wait_ms: 50 }))),
            adapt_dual(Arc::new(Counter { hits: hits.clone() })),
        ]));

        for _ in 0..2 {
            let chain = chain.clone();
            let handle =
                tokio::spawn(async move { chain.run(ctx("debounce_b", "search", json!({}))).await });
            handle.await.unwrap().unwrap();
            tokio::time::advance(Duration::from_millis(100)).await;
            settle().await;
        }

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_debounce_independently() {
        let hits = Arc::new(AtomicUsize::new(0));
        let chain = Arc::new(Chain::new(vec![
            adapt_dual(Arc::new(Debounce::new(DebounceConfig { wait_ms: 50 }))),
            adapt_dual(Arc::new(Counter { hits: hits.clone() })),
        ]));

        let mut handles = Vec::new();
        for op in ["search", "suggest"] {
            let chain = chain.clone();
            handles.push(tokio::spawn(async move {
                chain.run(ctx("debounce_c", op, json!({}))).await
            }));
            settle().await;
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
