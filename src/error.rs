//! Engine Error Taxonomy
//!
//! Distinguishes defects (a continuation run twice, a privileged step
//! without its resource handle) from control-flow rejections (rate limit,
//! open circuit, timeout) and from ordinary step failures that propagate
//! to the chain's caller.

use thiserror::Error;

use crate::spec::ScopeTag;

/// Errors surfaced by chain construction and execution.
///
/// The enum is `Clone` so a single outcome can be handed to every caller
/// coalesced behind a debounce window.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A step ran its continuation more than once. This signals a defect
    /// in the step's implementation and aborts the chain.
    #[error("continuation invoked more than once (step index {index})")]
    Composition { index: usize },

    /// A privileged step was executed without an environment handle on
    /// the context. Configuration error, fail fast.
    #[error("privileged step '{name}' requires an environment handle")]
    MissingHandle { name: String },

    /// A step pinned to one scope was asked to run in the other.
    #[error("step '{name}' is registered for the {required} scope but the chain is executing as {actual}")]
    Scope {
        name: String,
        required: ScopeTag,
        actual: ScopeTag,
    },

    /// Throttle rejection with no default payload configured.
    #[error("'{key}' invoked too frequently")]
    RateExceeded { key: String },

    /// Circuit breaker rejection with no fallback payload configured.
    #[error("circuit is open for '{key}'")]
    CircuitOpen { key: String },

    /// An attempt raced against a timer and lost.
    #[error("attempt timed out after {millis}ms")]
    Timeout { millis: u64 },

    /// A leaf step failed; propagates through every wrapper that is not
    /// specifically designed to catch it.
    #[error("step '{name}' failed: {message}")]
    Step { name: String, message: String },

    /// A pipeline manifest could not be loaded or parsed.
    #[error("manifest error: {0}")]
    Manifest(String),
}

impl EngineError {
    /// Convenience constructor for leaf-step failures.
    pub fn step(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Step {
            name: name.into(),
            message: message.into(),
        }
    }
}
