//! Declarative Pipeline Specs
//!
//! The spec grammar ([`model`]) and the YAML manifest loader ([`parser`]).

pub mod model;
pub mod parser;

pub use model::{ScopeTag, Spec, StepScope};
pub use parser::{load_manifest, Manifest};
