//! Environment Adapter
//!
//! Reshapes the unified execution context into the narrower view a
//! scope-specific step expects:
//!
//! - privileged view: carries a mandatory environment handle; missing
//!   handle is a configuration error, surfaced before the step runs
//! - restricted view: structurally omits the handle
//! - dual view: scope tag plus an optional handle so the step can branch

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::chain::{ChainStep, Next, StepResult};
use crate::engine::context::{EnvironmentHandle, SharedContext};
use crate::error::EngineError;
use crate::spec::ScopeTag;

/// View handed to privileged-scope steps. The environment handle is
/// guaranteed present.
pub struct PrivilegedView {
    handle: EnvironmentHandle,
    ctx: SharedContext,
}

/// View handed to restricted-scope steps. There is no way to reach the
/// environment handle from here.
pub struct RestrictedView {
    ctx: SharedContext,
}

/// View handed to dual-scope steps.
pub struct DualView {
    scope: ScopeTag,
    handle: Option<EnvironmentHandle>,
    ctx: SharedContext,
}

macro_rules! view_common {
    () => {
        /// The operation name of this invocation.
        pub async fn operation(&self) -> String {
            self.ctx.lock().await.operation().to_string()
        }

        /// The subject (resource/model name) of this invocation.
        pub async fn subject(&self) -> String {
            self.ctx.lock().await.subject().to_string()
        }

        /// Control-state key: `subject.operation`.
        pub async fn key(&self) -> String {
            self.ctx.lock().await.key()
        }

        pub async fn arguments(&self) -> Value {
            self.ctx.lock().await.arguments().clone()
        }

        pub async fn set_arguments(&self, arguments: Value) {
            self.ctx.lock().await.set_arguments(arguments);
        }

        pub async fn state_get(&self, key: &str) -> Option<Value> {
            self.ctx.lock().await.state_get(key).cloned()
        }

        pub async fn state_insert(&self, key: impl Into<String>, value: Value) {
            self.ctx.lock().await.state_insert(key, value);
        }

        /// Clone of the whole scratch state.
        pub async fn state_snapshot(&self) -> serde_json::Map<String, Value> {
            self.ctx.lock().await.state().clone()
        }

        /// Records the terminal payload (first write wins).
        pub async fn terminate(&self, payload: Value) {
            self.ctx.lock().await.terminate(payload);
        }

        pub async fn is_terminated(&self) -> bool {
            self.ctx.lock().await.is_terminated()
        }

        pub async fn terminal_payload(&self) -> Option<Value> {
            self.ctx.lock().await.terminal_payload().cloned()
        }
    };
}

impl PrivilegedView {
    pub fn handle(&self) -> &EnvironmentHandle {
        &self.handle
    }

    view_common!();
}

impl RestrictedView {
    view_common!();
}

impl DualView {
    /// Which environment is currently executing.
    pub fn scope(&self) -> ScopeTag {
        self.scope
    }

    /// The environment handle, present only in the privileged scope.
    pub fn handle(&self) -> Option<&EnvironmentHandle> {
        self.handle.as_ref()
    }

    /// The unified context, for steps that run nested sub-chains.
    pub fn shared(&self) -> SharedContext {
        self.ctx.clone()
    }

    view_common!();
}

/// A step that only runs in the privileged environment.
#[async_trait]
pub trait PrivilegedStep: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, view: PrivilegedView, next: Next) -> StepResult;
}

/// A step that only runs in the restricted environment.
#[async_trait]
pub trait RestrictedStep: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, view: RestrictedView, next: Next) -> StepResult;
}

/// A step that runs in both environments and receives the scope tag so it
/// can branch.
#[async_trait]
pub trait DualStep: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, view: DualView, next: Next) -> StepResult;
}

struct PrivilegedAdapter {
    inner: Arc<dyn PrivilegedStep>,
}

struct RestrictedAdapter {
    inner: Arc<dyn RestrictedStep>,
}

struct DualAdapter {
    inner: Arc<dyn DualStep>,
}

#[async_trait]
impl ChainStep for PrivilegedAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn call(&self, ctx: SharedContext, next: Next) -> StepResult {
        let (scope, handle) = {
            let ctx = ctx.lock().await;
            (ctx.scope(), ctx.env_handle().cloned())
        };

        if scope != ScopeTag::Privileged {
            return Err(EngineError::Scope {
                name: self.inner.name().to_string(),
                required: ScopeTag::Privileged,
                actual: scope,
            });
        }

        let handle = handle.ok_or_else(|| EngineError::MissingHandle {
            name: self.inner.name().to_string(),
        })?;

        self.inner.call(PrivilegedView { handle, ctx }, next).await
    }
}

#[async_trait]
impl ChainStep for RestrictedAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn call(&self, ctx: SharedContext, next: Next) -> StepResult {
        let scope = ctx.lock().await.scope();
        if scope != ScopeTag::Restricted {
            return Err(EngineError::Scope {
                name: self.inner.name().to_string(),
                required: ScopeTag::Restricted,
                actual: scope,
            });
        }

        self.inner.call(RestrictedView { ctx }, next).await
    }
}

#[async_trait]
impl ChainStep for DualAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn call(&self, ctx: SharedContext, next: Next) -> StepResult {
        let (scope, handle) = {
            let ctx = ctx.lock().await;
            (ctx.scope(), ctx.env_handle().cloned())
        };

        self.inner.call(DualView { scope, handle, ctx }, next).await
    }
}

/// Lifts a privileged step into the unified chain.
pub fn adapt_privileged(step: Arc<dyn PrivilegedStep>) -> Arc<dyn ChainStep> {
    Arc::new(PrivilegedAdapter { inner: step })
}

/// Lifts a restricted step into the unified chain.
pub fn adapt_restricted(step: Arc<dyn RestrictedStep>) -> Arc<dyn ChainStep> {
    Arc::new(RestrictedAdapter { inner: step })
}

/// Lifts a dual step into the unified chain.
pub fn adapt_dual(step: Arc<dyn DualStep>) -> Arc<dyn ChainStep> {
    Arc::new(DualAdapter { inner: step })
}
