// Capture module - runs source on an embedded interpreter with stdout/stderr captured

pub mod error;
pub mod guard;
pub mod interpreter;
pub mod python;
pub mod quickjs;
pub mod shim;

pub use error::{InterpreterError, Result};
pub use guard::StreamGuard;
pub use interpreter::{Evaluation, Interpreter, Raised};
pub use python::{Python, PYTHON_ID};
pub use quickjs::{QuickJs, QUICKJS_ID};
pub use shim::CaptureShim;
