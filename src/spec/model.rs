//! Pipeline Spec Model
//!
//! Core data structures describing one declarative pipeline step and the
//! capability scopes steps may run in.
//!
//! # Example YAML Format
//!
//! ```yaml
//! subject: article
//! operations:
//!   save:
//!     - validate
//!     - name: throttle
//!       args: { wait_ms: 200 }
//!     - name: persist
//!       scope: privileged
//!   fetch:
//!     - name: cacheable
//!       args: { ttl_ms: 1000 }
//!     - name: get_request
//!       args: {}
//!       children:
//!         - load_record
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The execution environment a chain is currently running in.
///
/// The privileged environment has access to transport/storage resources
/// via an environment handle; the restricted environment may only perform
/// outbound calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeTag {
    Privileged,
    Restricted,
}

impl fmt::Display for ScopeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeTag::Privileged => write!(f, "privileged"),
            ScopeTag::Restricted => write!(f, "restricted"),
        }
    }
}

/// The scope a spec entry is declared for. Absent scope defaults to dual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepScope {
    Privileged,
    Restricted,
    Dual,
}

impl StepScope {
    /// Whether an entry declared for this scope may run under `tag`.
    pub fn allows(self, tag: ScopeTag) -> bool {
        match self {
            StepScope::Dual => true,
            StepScope::Privileged => tag == ScopeTag::Privileged,
            StepScope::Restricted => tag == ScopeTag::Restricted,
        }
    }
}

impl Default for StepScope {
    fn default() -> Self {
        StepScope::Dual
    }
}

/// One declarative pipeline entry.
///
/// - `Bare`: a plain step name, resolved with empty arguments.
/// - `Nested`: a named step carrying child specs that run as a sub-chain
///   ahead of it, in the privileged environment only.
/// - `Configured`: a named step with factory arguments and an optional
///   scope pin.
///
/// Spec lists are created once at definition time and are immutable
/// thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Spec {
    Bare(String),
    Nested {
        name: String,
        #[serde(default)]
        args: Value,
        children: Vec<Spec>,
    },
    Configured {
        name: String,
        #[serde(default)]
        args: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<StepScope>,
    },
}

impl Spec {
    /// Creates a bare entry.
    pub fn bare(name: impl Into<String>) -> Self {
        Spec::Bare(name.into())
    }

    /// Creates a configured entry with factory arguments.
    pub fn configured(name: impl Into<String>, args: Value) -> Self {
        Spec::Configured {
            name: name.into(),
            args,
            scope: None,
        }
    }

    /// Creates a configured entry pinned to one scope.
    pub fn scoped(name: impl Into<String>, args: Value, scope: StepScope) -> Self {
        Spec::Configured {
            name: name.into(),
            args,
            scope: Some(scope),
        }
    }

    /// Creates a nested entry with child specs.
    pub fn nested(name: impl Into<String>, args: Value, children: Vec<Spec>) -> Self {
        Spec::Nested {
            name: name.into(),
            args,
            children,
        }
    }

    /// The step name this entry resolves against the registry.
    pub fn name(&self) -> &str {
        match self {
            Spec::Bare(name) => name,
            Spec::Nested { name, .. } => name,
            Spec::Configured { name, .. } => name,
        }
    }

    /// The factory arguments, `Value::Null` for bare entries.
    pub fn args(&self) -> &Value {
        match self {
            Spec::Bare(_) => &Value::Null,
            Spec::Nested { args, .. } => args,
            Spec::Configured { args, .. } => args,
        }
    }

    /// Child specs, empty unless this is a nested entry.
    pub fn children(&self) -> &[Spec] {
        match self {
            Spec::Nested { children, .. } => children,
            _ => &[],
        }
    }
}
