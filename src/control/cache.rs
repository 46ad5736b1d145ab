//! Cache Step
//!
//! Memoizes terminal payloads per `subject.operation` and argument set.
//! On a hit the chain terminates with the cached payload and nothing
//! downstream runs. On a miss the step either runs its configured child
//! pipeline (when one is declared) or falls through to its continuation,
//! then records whatever terminal payload the run produced.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::control::{parse_args, MAX_TRACKED_KEYS};
use crate::engine::adapter::{DualStep, DualView};
use crate::engine::chain::{Chain, Next, StepResult};
use crate::engine::context::Outcome;
use crate::engine::resolver::resolve_specs;
use crate::registry::Registry;
use crate::spec::Spec;

/// Configuration for [`Cache`], deserialized from spec arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a cached payload stays fresh.
    pub ttl_ms: u64,
    /// Optional child pipeline that produces the value on a miss; when
    /// empty the continuation produces it instead.
    pub children: Vec<Spec>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 60_000,
            children: Vec::new(),
        }
    }
}

struct CachedValue {
    expires_at: Instant,
    payload: Value,
}

/// Cached payloads per `subject.operation` plus serialized arguments.
static STORE: Lazy<Mutex<HashMap<String, CachedValue>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub struct Cache {
    ttl: Duration,
    children: Vec<Spec>,
    registry: Weak<Registry>,
}

impl Cache {
    pub fn new(config: CacheConfig, registry: Weak<Registry>) -> Self {
        Self {
            ttl: Duration::from_millis(config.ttl_ms),
            children: config.children,
            registry,
        }
    }

    pub fn from_args(args: Value, registry: Weak<Registry>) -> Self {
        Self::new(parse_args("cacheable", args), registry)
    }

    fn cache_key(key: &str, args: &Value) -> String {
        format!("{}:{}", key, args)
    }
}

#[async_trait]
impl DualStep for Cache {
    fn name(&self) -> &str {
        "cacheable"
    }

    async fn call(&self, view: DualView, next: Next) -> StepResult {
        let key = Self::cache_key(&view.key().await, &view.arguments().await);
        let now = Instant::now();

        let hit = {
            let store = STORE.lock().unwrap_or_else(PoisonError::into_inner);
            store
                .get(&key)
                .filter(|cached| cached.expires_at > now)
                .map(|cached| cached.payload.clone())
        };

        if let Some(payload) = hit {
            debug!("cache hit for '{}'", key);
            view.terminate(payload.clone()).await;
            return Ok(Outcome::Terminated(payload));
        }

        let had_terminal = view.is_terminated().await;

        // Miss: a declared child pipeline replaces the continuation as
        // the value producer.
        let result = if self.children.is_empty() {
            next.run().await?
        } else {
            match self.registry.upgrade() {
                Some(registry) => {
                    let scope = view.scope();
                    let steps = resolve_specs(&registry, &self.children, scope).await;
                    debug!(
                        "cache miss for '{}', running {} child step(s)",
                        key,
                        steps.len()
                    );
                    Chain::new(steps).run(view.shared()).await?
                }
                None => {
                    warn!("cache registry dropped, falling through for '{}'", key);
                    next.run().await?
                }
            }
        };

        // Only a run that produced a new terminal payload is worth
        // remembering.
        if !had_terminal {
            if let Some(payload) = view.terminal_payload().await {
                let mut store = STORE.lock().unwrap_or_else(PoisonError::into_inner);
                if store.len() >= MAX_TRACKED_KEYS {
                    store.retain(|_, cached| cached.expires_at > now);
                }
                store.insert(
                    key,
                    CachedValue {
                        expires_at: now + self.ttl,
                        payload,
                    },
                );
            }
        }

        Ok(result)
    }
}
