// Local interpreter boundary

use crate::capture::error::Result;
use std::time::Instant;

/// Value produced by a top-level evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// The interpreter's "no value" sentinel (e.g. `undefined`)
    NoValue,
    /// String form of the returned value
    Value(String),
}

/// User code raised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raised {
    pub message: String,
    pub trace: Option<String>,
}

impl Raised {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    /// Message followed by the trace, when the trace adds anything
    pub fn describe(&self) -> String {
        match self.trace.as_deref().map(str::trim) {
            Some(trace) if !trace.is_empty() && trace != self.message.trim() => {
                format!("{}\n{}", self.message.trim(), trace)
            }
            _ => self.message.trim().to_string(),
        }
    }
}

/// An embedded interpreter with rebindable global output streams.
///
/// Stream state is global to the interpreter: at most one capture may be active at a time.
pub trait Interpreter: Send + Sync {
    fn name(&self) -> &str;

    /// Readiness flag set once asynchronous boot completes
    fn is_ready(&self) -> bool;

    /// Point stdout/stderr at a fresh buffer named `sink`
    fn redirect_streams(&self, sink: &str) -> Result<()>;

    /// Everything written to `sink` so far
    fn read_sink(&self, sink: &str) -> Result<String>;

    /// Rebind the original streams and discard `sink`
    fn restore_streams(&self, sink: &str) -> Result<()>;

    /// Evaluate `source` as one top-level unit, interrupting it at `deadline`
    fn evaluate(&self, source: &str, deadline: Instant) -> std::result::Result<Evaluation, Raised>;
}
