//! Spec Resolver
//!
//! Turns declarative spec entries into executable steps:
//! - bare and configured entries resolve through the registry for the
//!   current scope; unknown names are logged and skipped, never fatal
//! - entries pinned to the other environment are filtered out at build
//!   time
//! - nested entries become a synthetic step that runs its children as a
//!   sub-chain (privileged scope only) before the named main step
//!
//! Resolution is asynchronous and awaits registry readiness before the
//! first lookup, to tolerate lazily-populated registries.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;

use crate::engine::chain::{Chain, ChainStep, Next, StepResult};
use crate::engine::context::SharedContext;
use crate::registry::Registry;
use crate::spec::{ScopeTag, Spec};

/// Resolves a spec list into a flat ordered list of executable steps for
/// the given scope.
pub async fn resolve_specs(
    registry: &Arc<Registry>,
    specs: &[Spec],
    scope: ScopeTag,
) -> Vec<Arc<dyn ChainStep>> {
    registry.ensure_builtins().await;

    let mut resolved: Vec<Arc<dyn ChainStep>> = Vec::with_capacity(specs.len());

    for spec in specs {
        match spec {
            Spec::Bare(name) => match registry.build(name, scope, Value::Null).await {
                Some(step) => resolved.push(step),
                None => warn!("step '{}' not found for scope '{}' - skipping", name, scope),
            },
            Spec::Configured {
                name,
                args,
                scope: pin,
            } => {
                if let Some(pin) = pin {
                    if !pin.allows(scope) {
                        debug!(
                            "step '{}' is pinned to another scope - skipping in '{}' build",
                            name, scope
                        );
                        continue;
                    }
                }
                match registry.build(name, scope, args.clone()).await {
                    Some(step) => resolved.push(step),
                    None => warn!(
                        "configured step '{}' not found for scope '{}' - skipping",
                        name, scope
                    ),
                }
            }
            Spec::Nested {
                name,
                args,
                children,
            } => resolved.push(Arc::new(NestedStep {
                name: name.clone(),
                args: args.clone(),
                children: children.clone(),
                registry: Arc::clone(registry),
            })),
        }
    }

    resolved
}

/// Synthetic step produced for a nested spec entry.
///
/// In the privileged scope it first builds and runs a complete sub-chain
/// from its children against the same context, then resolves and runs the
/// named main step. In the restricted scope the children are skipped
/// entirely; nested children typically carry privileged-only work that
/// must never run there.
struct NestedStep {
    name: String,
    args: Value,
    children: Vec<Spec>,
    registry: Arc<Registry>,
}

#[async_trait]
impl ChainStep for NestedStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, ctx: SharedContext, next: Next) -> StepResult {
        let scope = ctx.lock().await.scope();

        if scope == ScopeTag::Privileged && !self.children.is_empty() {
            info!(
                "executing {} nested steps for '{}'",
                self.children.len(),
                self.name
            );
            let steps = resolve_specs(&self.registry, &self.children, scope).await;
            Chain::new(steps).run(ctx.clone()).await?;
        }

        match self
            .registry
            .build(&self.name, scope, self.args.clone())
            .await
        {
            Some(step) => step.call(ctx, next).await,
            None => {
                warn!(
                    "nested step '{}' not found for scope '{}' - running continuation only",
                    self.name, scope
                );
                next.run().await
            }
        }
    }
}
