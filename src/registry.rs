//! Step Registry
//!
//! Holds named step factories, partitioned by capability scope: one table
//! for privileged-only steps, one for restricted-only steps, and one for
//! dual-capable steps. Registration overwrites silently (last registration
//! wins, which supports hot reload); lookup checks the dual table first,
//! then the scope-specific table, and reports not-found instead of
//! erroring.
//!
//! Built-in steps (the control-flow primitives and the log step) register
//! themselves lazily the first time [`Registry::ensure_builtins`] is
//! awaited; the resolver awaits it before its first lookup.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use log::debug;
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::sync::{OnceCell, RwLock};

use crate::control::{Breaker, Cache, Debounce, LogStep, Retry, Throttle};
use crate::engine::adapter::{
    adapt_dual, adapt_privileged, adapt_restricted, DualStep, PrivilegedStep, RestrictedStep,
};
use crate::engine::chain::ChainStep;
use crate::spec::ScopeTag;

/// Factory producing a privileged step from spec arguments.
pub type PrivilegedFactory = Arc<dyn Fn(Value) -> Arc<dyn PrivilegedStep> + Send + Sync>;
/// Factory producing a restricted step from spec arguments.
pub type RestrictedFactory = Arc<dyn Fn(Value) -> Arc<dyn RestrictedStep> + Send + Sync>;
/// Factory producing a dual step from spec arguments.
pub type DualFactory = Arc<dyn Fn(Value) -> Arc<dyn DualStep> + Send + Sync>;

/// Which table served a resolution, for diagnostics tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedKind {
    Dual,
    Privileged,
    Restricted,
}

/// Snapshot of registered step names per table.
#[derive(Debug, Clone, Default)]
pub struct RegisteredSteps {
    pub privileged: Vec<String>,
    pub restricted: Vec<String>,
    pub dual: Vec<String>,
}

/// The capability-partitioned step registry.
///
/// Explicitly constructed and injected into the engine; a single default
/// instance exists for convenience wiring (see [`Registry::shared`]) so
/// tests can instantiate isolated registries.
pub struct Registry {
    privileged: RwLock<HashMap<String, PrivilegedFactory>>,
    restricted: RwLock<HashMap<String, RestrictedFactory>>,
    dual: RwLock<HashMap<String, DualFactory>>,
    builtins: OnceCell<()>,
}

static DEFAULT_REGISTRY: Lazy<Arc<Registry>> = Lazy::new(|| Arc::new(Registry::new()));

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            privileged: RwLock::new(HashMap::new()),
            restricted: RwLock::new(HashMap::new()),
            dual: RwLock::new(HashMap::new()),
            builtins: OnceCell::new(),
        }
    }

    /// The process-wide default instance.
    pub fn shared() -> Arc<Registry> {
        DEFAULT_REGISTRY.clone()
    }

    /// Registers a privileged-only step factory. Overwrites silently.
    pub async fn register_privileged<F>(&self, name: &str, factory: F)
    where
        F: Fn(Value) -> Arc<dyn PrivilegedStep> + Send + Sync + 'static,
    {
        self.privileged
            .write()
            .await
            .insert(name.to_string(), Arc::new(factory));
        debug!("registered privileged step: {}", name);
    }

    /// Registers a restricted-only step factory. Overwrites silently.
    pub async fn register_restricted<F>(&self, name: &str, factory: F)
    where
        F: Fn(Value) -> Arc<dyn RestrictedStep> + Send + Sync + 'static,
    {
        self.restricted
            .write()
            .await
            .insert(name.to_string(), Arc::new(factory));
        debug!("registered restricted step: {}", name);
    }

    /// Registers a dual-capable step factory. Overwrites silently.
    pub async fn register_dual<F>(&self, name: &str, factory: F)
    where
        F: Fn(Value) -> Arc<dyn DualStep> + Send + Sync + 'static,
    {
        self.dual
            .write()
            .await
            .insert(name.to_string(), Arc::new(factory));
        debug!("registered dual step: {}", name);
    }

    /// Reports which table would serve `name` for the given scope, if any.
    /// The dual table takes precedence.
    pub async fn resolve(&self, name: &str, scope: ScopeTag) -> Option<ResolvedKind> {
        if self.dual.read().await.contains_key(name) {
            return Some(ResolvedKind::Dual);
        }
        match scope {
            ScopeTag::Privileged if self.privileged.read().await.contains_key(name) => {
                Some(ResolvedKind::Privileged)
            }
            ScopeTag::Restricted if self.restricted.read().await.contains_key(name) => {
                Some(ResolvedKind::Restricted)
            }
            _ => None,
        }
    }

    /// Builds an executable step for `name` under the given scope,
    /// invoking the factory with `args` and adapting the result into the
    /// unified chain. Returns `None` when the name is unknown for this
    /// scope.
    pub async fn build(
        &self,
        name: &str,
        scope: ScopeTag,
        args: Value,
    ) -> Option<Arc<dyn ChainStep>> {
        if let Some(factory) = self.dual.read().await.get(name) {
            return Some(adapt_dual(factory(args)));
        }
        match scope {
            ScopeTag::Privileged => {
                let table = self.privileged.read().await;
                table.get(name).map(|factory| adapt_privileged(factory(args)))
            }
            ScopeTag::Restricted => {
                let table = self.restricted.read().await;
                table.get(name).map(|factory| adapt_restricted(factory(args)))
            }
        }
    }

    /// Lists registered step names per table.
    pub async fn registered(&self) -> RegisteredSteps {
        let mut names = RegisteredSteps {
            privileged: self.privileged.read().await.keys().cloned().collect(),
            restricted: self.restricted.read().await.keys().cloned().collect(),
            dual: self.dual.read().await.keys().cloned().collect(),
        };
        names.privileged.sort();
        names.restricted.sort();
        names.dual.sort();
        names
    }

    /// Registers the built-in steps exactly once. Callers that look up
    /// names directly must await this first; the resolver does so itself.
    pub async fn ensure_builtins(self: &Arc<Self>) {
        let weak: Weak<Registry> = Arc::downgrade(self);
        self.builtins
            .get_or_init(|| async {
                debug!("registering built-in steps");
                self.register_dual("throttle", |args| Arc::new(Throttle::from_args(args)))
                    .await;
                self.register_dual("debounce", |args| Arc::new(Debounce::from_args(args)))
                    .await;
                self.register_dual("retryable", |args| Arc::new(Retry::from_args(args)))
                    .await;
                self.register_dual("circuit_breaker", |args| Arc::new(Breaker::from_args(args)))
                    .await;
                self.register_dual("log", |args| Arc::new(LogStep::from_args(args)))
                    .await;
                let registry = weak.clone();
                self.register_dual("cacheable", move |args| {
                    Arc::new(Cache::from_args(args, registry.clone()))
                })
                .await;
            })
            .await;
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::adapter::{DualView, RestrictedView};
    use crate::engine::chain::{Next, StepResult};
    use crate::engine::context::Outcome;
    use async_trait::async_trait;
    use serde_json::json;

    struct Tagged(&'static str);

    #[async_trait]
    impl DualStep for Tagged {
        fn name(&self) -> &str {
            self.0
        }

        async fn call(&self, _view: DualView, next: Next) -> StepResult {
            next.run().await
        }
    }

    struct RestrictedTagged(&'static str);

    #[async_trait]
    impl RestrictedStep for RestrictedTagged {
        fn name(&self) -> &str {
            self.0
        }

        async fn call(&self, _view: RestrictedView, next: Next) -> StepResult {
            next.run().await
        }
    }

    #[tokio::test]
    async fn test_lookup_not_found_is_none() {
        let registry = Registry::new();
        assert!(registry.resolve("missing", ScopeTag::Privileged).await.is_none());
        assert!(registry
            .build("missing", ScopeTag::Restricted, Value::Null)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_dual_table_takes_precedence() {
        let registry = Registry::new();
        registry
            .register_restricted("fetch", |_| Arc::new(RestrictedTagged("fetch")))
            .await;
        registry
            .register_dual("fetch", |_| Arc::new(Tagged("fetch")))
            .await;

        assert_eq!(
            registry.resolve("fetch", ScopeTag::Restricted).await,
            Some(ResolvedKind::Dual)
        );
    }

    #[tokio::test]
    async fn test_scope_specific_lookup() {
        let registry = Registry::new();
        registry
            .register_restricted("fetch", |_| Arc::new(RestrictedTagged("fetch")))
            .await;

        assert_eq!(
            registry.resolve("fetch", ScopeTag::Restricted).await,
            Some(ResolvedKind::Restricted)
        );
        // Not visible from the other scope.
        assert!(registry.resolve("fetch", ScopeTag::Privileged).await.is_none());
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = Registry::new();
        registry
            .register_dual("step", |_| Arc::new(Tagged("first")))
            .await;
        registry
            .register_dual("step", |_| Arc::new(Tagged("second")))
            .await;

        let built = registry
            .build("step", ScopeTag::Restricted, Value::Null)
            .await
            .unwrap();
        assert_eq!(built.name(), "second");
    }

    #[tokio::test]
    async fn test_ensure_builtins_registers_control_steps() {
        let registry = Arc::new(Registry::new());
        registry.ensure_builtins().await;
        registry.ensure_builtins().await; // idempotent

        let names = registry.registered().await;
        for expected in [
            "cacheable",
            "circuit_breaker",
            "debounce",
            "log",
            "retryable",
            "throttle",
        ] {
            assert!(
                names.dual.contains(&expected.to_string()),
                "missing builtin '{}'",
                expected
            );
        }
        assert!(names.privileged.is_empty());
    }

    #[tokio::test]
    async fn test_isolated_instances_do_not_share_tables() {
        let a = Registry::new();
        let b = Registry::new();
        a.register_dual("only_in_a", |_| Arc::new(Tagged("only_in_a")))
            .await;

        assert!(a.resolve("only_in_a", ScopeTag::Restricted).await.is_some());
        assert!(b.resolve("only_in_a", ScopeTag::Restricted).await.is_none());
    }

    #[tokio::test]
    async fn test_factory_receives_args() {
        struct EchoArgs(Value);

        #[async_trait]
        impl DualStep for EchoArgs {
            fn name(&self) -> &str {
                "echo_args"
            }

            async fn call(&self, view: DualView, _next: Next) -> StepResult {
                view.terminate(self.0.clone()).await;
                Ok(Outcome::Terminated(self.0.clone()))
            }
        }

        let registry = Registry::new();
        registry
            .register_dual("echo_args", |args| Arc::new(EchoArgs(args)))
            .await;

        let step = registry
            .build("echo_args", ScopeTag::Restricted, json!({ "a": 1 }))
            .await
            .unwrap();
        assert_eq!(step.name(), "echo_args");
    }
}
