// Error types for Capture module

use thiserror::Error;

/// Failures of the interpreter boundary itself (not of user code)
#[derive(Debug, Clone, Error)]
pub enum InterpreterError {
    #[error("interpreter is not ready")]
    NotReady,

    #[error("interpreter boot failed: {0}")]
    Boot(String),

    #[error("stream rebinding failed: {0}")]
    Stream(String),
}

pub type Result<T> = std::result::Result<T, InterpreterError>;
