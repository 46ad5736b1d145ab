//! Chain Builder
//!
//! Folds a resolved step list into one onion-style invocable pipeline:
//! "before" logic in step `i` runs before its continuation, "after" logic
//! runs once everything downstream has completed, in exact reverse order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use log::debug;

use crate::engine::context::{Outcome, SharedContext};
use crate::error::EngineError;

/// Result of one step (or continuation) invocation.
pub type StepResult = Result<Outcome, EngineError>;

/// An executable step in a composed chain.
///
/// Implementations receive the shared context and a continuation
/// representing everything downstream. A step that never runs its
/// continuation short-circuits all steps after it.
#[async_trait]
pub trait ChainStep: Send + Sync {
    /// Step name, used in logs and error messages.
    fn name(&self) -> &str;

    async fn call(&self, ctx: SharedContext, next: Next) -> StepResult;
}

/// The continuation: a handle over the rest of the chain.
///
/// Each handle may be run at most once; a second `run` on the same handle
/// (or a clone of it) is an [`EngineError::Composition`]. Wrappers that
/// re-attempt downstream by design obtain a fresh handle via [`Next::fork`].
#[derive(Clone)]
pub struct Next {
    steps: Arc<Vec<Arc<dyn ChainStep>>>,
    ctx: SharedContext,
    index: usize,
    used: Arc<AtomicBool>,
}

impl Next {
    fn new(steps: Arc<Vec<Arc<dyn ChainStep>>>, ctx: SharedContext, index: usize) -> Self {
        Self {
            steps,
            ctx,
            index,
            used: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A fresh handle over the same downstream steps, with its own
    /// once-only guard. Only for wrappers whose contract is to re-attempt
    /// the continuation (retry).
    pub fn fork(&self) -> Next {
        Next::new(self.steps.clone(), self.ctx.clone(), self.index)
    }

    /// Runs everything downstream of the current step.
    ///
    /// Returns the downstream outcome, or [`EngineError::Composition`] if
    /// this handle has already been run.
    pub fn run(&self) -> BoxFuture<'static, StepResult> {
        let this = self.clone();
        Box::pin(async move {
            if this.used.swap(true, Ordering::SeqCst) {
                return Err(EngineError::Composition { index: this.index });
            }

            if this.index >= this.steps.len() {
                let ctx = this.ctx.lock().await;
                debug!("reached end of chain for {}", ctx.key());
                return Ok(ctx.outcome());
            }

            let step = Arc::clone(&this.steps[this.index]);
            let next = Next::new(this.steps.clone(), this.ctx.clone(), this.index + 1);
            step.call(this.ctx.clone(), next).await
        })
    }
}

/// A composed, invocable pipeline.
pub struct Chain {
    steps: Arc<Vec<Arc<dyn ChainStep>>>,
}

impl Chain {
    /// Builds a chain from resolved steps, in declaration order.
    pub fn new(steps: Vec<Arc<dyn ChainStep>>) -> Self {
        Self {
            steps: Arc::new(steps),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs the whole chain against a context.
    ///
    /// The threaded step outcome wins; when a step cut the chain short
    /// without threading one, the context's terminal payload is
    /// consulted. A coalesced debounce caller receives its outcome from
    /// the threaded result, since the downstream run mutated the latest
    /// caller's context rather than its own.
    pub async fn run(&self, ctx: SharedContext) -> StepResult {
        let outcome = Next::new(self.steps.clone(), ctx.clone(), 0).run().await?;
        if outcome.is_terminated() {
            return Ok(outcome);
        }
        let ctx = ctx.lock().await;
        Ok(ctx.outcome())
    }
}
