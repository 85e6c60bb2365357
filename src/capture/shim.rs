// Runtime capture shim - one interpreter turn with its output captured

use crate::capture::guard::StreamGuard;
use crate::capture::interpreter::{Evaluation, Interpreter};
use crate::dispatch::{Outcome, LOCAL_ERROR_EXIT_CODE};
use crate::provider::sections::compose;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Runs source on the local interpreter and normalizes what it printed.
///
/// Does not serialize callers: overlapping runs share the interpreter's global
/// stream binding and the later redirect wins.
#[derive(Clone)]
pub struct CaptureShim {
    interpreter: Arc<dyn Interpreter>,
}

impl CaptureShim {
    pub fn new(interpreter: Arc<dyn Interpreter>) -> Self {
        Self { interpreter }
    }

    pub fn interpreter(&self) -> &Arc<dyn Interpreter> {
        &self.interpreter
    }

    pub fn run(&self, source: &str, deadline: Instant) -> Outcome {
        let interpreter = self.interpreter.as_ref();

        if !interpreter.is_ready() {
            warn!(interpreter = interpreter.name(), "interpreter not ready");
            return Outcome::service_unavailable(format!(
                "The {} interpreter is still loading. Please wait a moment and run again.",
                interpreter.name()
            ));
        }

        let sink = format!("__capture_{}", Uuid::new_v4().simple());
        let guard = match StreamGuard::acquire(interpreter, sink) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "output capture setup failed");
                return Outcome::runtime_error(
                    "",
                    format!("Failed to capture program output: {}", e),
                    LOCAL_ERROR_EXIT_CODE,
                );
            }
        };

        let evaluated = interpreter.evaluate(source, deadline);
        let captured = guard.contents();
        drop(guard);

        let captured = captured.trim();

        match evaluated {
            Ok(evaluation) => {
                info!(
                    interpreter = interpreter.name(),
                    captured_bytes = captured.len(),
                    "local evaluation completed"
                );

                if !captured.is_empty() {
                    return Outcome::success(captured);
                }
                match evaluation {
                    Evaluation::Value(value) => Outcome::success(value),
                    Evaluation::NoValue => Outcome::success(""),
                }
            }
            Err(raised) => {
                let error_text = raised.describe();
                info!(
                    interpreter = interpreter.name(),
                    captured_bytes = captured.len(),
                    error = %raised.message,
                    "local evaluation raised"
                );

                let diagnostic = if captured.is_empty() {
                    error_text.clone()
                } else {
                    captured.to_string()
                };
                let output = compose(&[("Output", captured), ("Error", error_text.as_str())]);

                Outcome::runtime_error(output, diagnostic, LOCAL_ERROR_EXIT_CODE)
            }
        }
    }
}
