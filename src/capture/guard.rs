// Scoped ownership of the interpreter's global streams

use crate::capture::error::Result;
use crate::capture::interpreter::Interpreter;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

/// Holds the interpreter's streams redirected into `sink` until dropped.
///
/// Restoration runs on every exit path; its failures are logged and swallowed.
pub struct StreamGuard<'a> {
    interpreter: &'a dyn Interpreter,
    sink: String,
}

impl<'a> StreamGuard<'a> {
    /// Redirect into `sink`. If redirection fails, restoration is still attempted.
    pub fn acquire(interpreter: &'a dyn Interpreter, sink: String) -> Result<Self> {
        debug!(sink = %sink, "redirecting interpreter streams");

        if let Err(e) = interpreter.redirect_streams(&sink) {
            release(interpreter, &sink);
            return Err(e);
        }

        Ok(Self { interpreter, sink })
    }

    pub fn sink(&self) -> &str {
        &self.sink
    }

    /// Captured text so far; unreadable buffers count as empty
    pub fn contents(&self) -> String {
        match self.interpreter.read_sink(&self.sink) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(sink = %self.sink, error = %e, "failed to read capture buffer");
                String::new()
            }
        }
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        release(self.interpreter, &self.sink);
    }
}

fn release(interpreter: &dyn Interpreter, sink: &str) {
    match catch_unwind(AssertUnwindSafe(|| interpreter.restore_streams(sink))) {
        Ok(Ok(())) => debug!(sink = %sink, "interpreter streams restored"),
        Ok(Err(e)) => warn!(sink = %sink, error = %e, "failed to restore interpreter streams"),
        Err(_) => warn!(sink = %sink, "panic while restoring interpreter streams"),
    }
}
