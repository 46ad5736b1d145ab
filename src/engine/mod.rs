//! Chain Execution Engine
//!
//! The core engine that resolves declarative spec lists into executable
//! steps and runs them as one composed, onion-style pipeline:
//!
//! - [`context`]: the unified execution context and outcome type
//! - [`adapter`]: per-scope step traits and context views
//! - [`chain`]: onion composition and the continuation guard
//! - [`resolver`]: spec-entry resolution and nested-pipeline expansion

pub mod adapter;
pub mod chain;
pub mod context;
pub mod resolver;

use std::sync::Arc;

use log::{debug, error};

use crate::registry::{Registry, ResolvedKind};
use crate::spec::{ScopeTag, Spec};

pub use adapter::{DualStep, DualView, PrivilegedStep, PrivilegedView, RestrictedStep, RestrictedView};
pub use chain::{Chain, ChainStep, Next, StepResult};
pub use context::{EnvironmentHandle, ExecutionContext, Outcome, SharedContext};
pub use resolver::resolve_specs;

/// Middleware composition and execution engine.
///
/// Resolves every entry of a spec list against its registry, expands
/// nested sub-pipelines, composes the result into one invocable chain and
/// executes it against a shared context.
///
/// # Example
///
/// ```rust,no_run
/// use pipewise::engine::{Engine, ExecutionContext};
/// use pipewise::spec::{ScopeTag, Spec};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = Engine::with_default_registry();
///     let specs = vec![Spec::bare("log"), Spec::bare("validate")];
///
///     let ctx = ExecutionContext::new("article", "save", json!({}), ScopeTag::Restricted)
///         .into_shared();
///     let outcome = engine.execute_chain(&specs, ctx.clone()).await?;
///     println!("{:?}", outcome);
///     Ok(())
/// }
/// ```
pub struct Engine {
    registry: Arc<Registry>,
}

impl Engine {
    /// Creates an engine over an explicitly constructed registry.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Creates an engine over the process-wide default registry.
    pub fn with_default_registry() -> Self {
        Self::new(Registry::shared())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Resolves a spec list for the context's scope and runs the composed
    /// chain.
    ///
    /// Callers read the result from the returned [`Outcome`] or from the
    /// context's state.
    pub async fn execute_chain(
        &self,
        specs: &[Spec],
        ctx: SharedContext,
    ) -> StepResult {
        let (scope, key) = {
            let ctx = ctx.lock().await;
            (ctx.scope(), ctx.key())
        };

        let steps = resolve_specs(&self.registry, specs, scope).await;
        debug!(
            "executing chain for {} ({} of {} entries resolved, scope '{}')",
            key,
            steps.len(),
            specs.len(),
            scope
        );

        match Chain::new(steps).run(ctx).await {
            Ok(outcome) => {
                debug!("chain completed for {}", key);
                Ok(outcome)
            }
            Err(err) => {
                error!("chain failed for {}: {}", key, err);
                Err(err)
            }
        }
    }

    /// Diagnostics hook: which registry table would serve `name` under
    /// the given scope, if any.
    pub async fn resolve(&self, name: &str, scope: ScopeTag) -> Option<ResolvedKind> {
        self.registry.ensure_builtins().await;
        self.registry.resolve(name, scope).await
    }
}
