//! Execution Context
//!
//! The unified, mutable context passed by shared reference through an
//! entire chain invocation, plus the explicit [`Outcome`] type that
//! carries a terminal payload back up through every step.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::spec::ScopeTag;

/// Opaque transport/session handle available to privileged-scope steps.
///
/// Exclusively owned by the privileged execution of a single operation
/// invocation; steps must not retain it beyond that invocation.
#[derive(Debug, Clone)]
pub struct EnvironmentHandle {
    session_id: String,
}

impl EnvironmentHandle {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Result of running a step or a whole chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The chain ran (or was cut short) without recording a terminal
    /// payload.
    Continue,
    /// `terminate` recorded this payload; it is the one and only result
    /// of the invocation.
    Terminated(Value),
}

impl Outcome {
    pub fn is_terminated(&self) -> bool {
        matches!(self, Outcome::Terminated(_))
    }

    /// The terminal payload, if one was recorded.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Outcome::Continue => None,
            Outcome::Terminated(value) => Some(value),
        }
    }
}

/// The unified execution context, created fresh per operation invocation
/// and discarded after.
///
/// `state` is free-form scratch space written by steps in declaration
/// order; there is no concurrency control within one chain because
/// execution is sequential by construction.
#[derive(Debug)]
pub struct ExecutionContext {
    operation: String,
    subject: String,
    arguments: Value,
    state: Map<String, Value>,
    terminal: Option<Value>,
    env_handle: Option<EnvironmentHandle>,
    scope: ScopeTag,
}

/// Shared handle to an [`ExecutionContext`]; the whole chain, including
/// debounce timer tasks and nested sub-chains, mutates the same instance.
pub type SharedContext = Arc<Mutex<ExecutionContext>>;

impl ExecutionContext {
    /// Creates a context for one operation invocation.
    pub fn new(
        subject: impl Into<String>,
        operation: impl Into<String>,
        arguments: Value,
        scope: ScopeTag,
    ) -> Self {
        Self {
            operation: operation.into(),
            subject: subject.into(),
            arguments,
            state: Map::new(),
            terminal: None,
            env_handle: None,
            scope,
        }
    }

    /// Attaches the privileged environment handle.
    pub fn with_handle(mut self, handle: EnvironmentHandle) -> Self {
        self.env_handle = Some(handle);
        self
    }

    /// Wraps the context for chain execution.
    pub fn into_shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Control-state key for this invocation: `subject.operation`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.subject, self.operation)
    }

    pub fn arguments(&self) -> &Value {
        &self.arguments
    }

    /// Replaces the invocation arguments (e.g. after normalization).
    pub fn set_arguments(&mut self, arguments: Value) {
        self.arguments = arguments;
    }

    pub fn scope(&self) -> ScopeTag {
        self.scope
    }

    pub fn env_handle(&self) -> Option<&EnvironmentHandle> {
        self.env_handle.as_ref()
    }

    /// Reads a value from the scratch state.
    pub fn state_get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Writes a value into the scratch state.
    pub fn state_insert(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
    }

    pub fn state(&self) -> &Map<String, Value> {
        &self.state
    }

    /// Records the terminal payload for this invocation.
    ///
    /// The first recorded payload wins; later calls are ignored so the
    /// payload can never be displaced once the chain has settled on it.
    /// Steps after the recording step still run for side effects.
    pub fn terminate(&mut self, payload: Value) {
        if self.terminal.is_none() {
            self.terminal = Some(payload);
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn terminal_payload(&self) -> Option<&Value> {
        self.terminal.as_ref()
    }

    /// The outcome of the invocation so far.
    pub fn outcome(&self) -> Outcome {
        match &self.terminal {
            Some(value) => Outcome::Terminated(value.clone()),
            None => Outcome::Continue,
        }
    }
}
