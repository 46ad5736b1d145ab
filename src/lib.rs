//! Pipewise - Middleware Composition and Execution Engine
//!
//! Turns declarative spec lists into executable middleware chains. Each
//! operation on a subject declares its pipeline once; the engine resolves
//! every entry against a capability-partitioned registry, composes the
//! result into one onion-style chain and executes it in either the
//! privileged or the restricted environment.
//!
//! # Architecture
//!
//! The library is organized into five main modules:
//!
//! - [`spec`]: The declarative spec grammar and the YAML manifest loader
//! - [`registry`]: Named step factories, partitioned by capability scope
//! - [`engine`]: Resolution, onion composition and chain execution
//! - [`control`]: Built-in control-flow steps (throttle, debounce, retry,
//!   cache, circuit breaker, log)
//! - [`error`]: The engine error taxonomy
//!
//! # Example
//!
//! ```rust,no_run
//! use pipewise::{Engine, ExecutionContext, ScopeTag, Spec};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::with_default_registry();
//!
//!     let specs = vec![
//!         Spec::bare("log"),
//!         Spec::configured("throttle", json!({ "wait_ms": 200 })),
//!     ];
//!
//!     let ctx = ExecutionContext::new("article", "save", json!({ "title": "x" }), ScopeTag::Restricted)
//!         .into_shared();
//!     let outcome = engine.execute_chain(&specs, ctx).await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod control;
pub mod engine;
pub mod error;
pub mod registry;
pub mod spec;

// Re-export commonly used types
pub use engine::{Engine, EnvironmentHandle, ExecutionContext, Outcome, SharedContext};
pub use error::EngineError;
pub use registry::Registry;
pub use spec::{load_manifest, Manifest, ScopeTag, Spec, StepScope};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Pipewise";
