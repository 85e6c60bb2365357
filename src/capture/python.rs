// Embedded RustPython interpreter for Python

use crate::capture::error::{InterpreterError, Result};
use crate::capture::interpreter::{Evaluation, Interpreter, Raised};
use rustpython_vm::builtins::PyBaseExceptionRef;
use rustpython_vm::scope::Scope;
use rustpython_vm::signal::{user_signal_channel, UserSignalReceiver, UserSignalSender};
use rustpython_vm::{PyResult, Settings, VirtualMachine};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const PYTHON_ID: &str = "rustpython";

/// Interrupts are re-sent at this period until the run stops
const INTERRUPT_PERIOD: Duration = Duration::from_millis(25);

/// A run still going this long after its deadline marks the worker wedged
const WEDGE_AFTER: Duration = Duration::from_secs(2);

/// Upper bound on a stream command's round trip
const COMMAND_WAIT: Duration = Duration::from_secs(2);

/// Capture helpers, run once in a private scope at boot.
/// The original streams are kept here so user code cannot lose them.
const PRELUDE: &str = r#"
import sys

_stdout = sys.stdout
_stderr = sys.stderr
_sinks = {}


class _Sink:
    def __init__(self):
        self._parts = []

    def write(self, text):
        text = str(text)
        self._parts.append(text)
        return len(text)

    def writelines(self, lines):
        for line in lines:
            self.write(line)

    def flush(self):
        pass

    def isatty(self):
        return False

    def getvalue(self):
        return "".join(self._parts)


def redirect(name):
    sink = _Sink()
    _sinks[name] = sink
    sys.stdout = sink
    sys.stderr = sink
    return ""


def read(name):
    sink = _sinks.get(name)
    return sink.getvalue() if sink is not None else ""


def restore(name):
    sys.stdout = _stdout
    sys.stderr = _stderr
    _sinks.pop(name, None)
    return ""
"#;

enum Command {
    Call {
        helper: &'static str,
        sink: String,
        reply: mpsc::Sender<Result<String>>,
    },
    Evaluate {
        source: String,
        reply: mpsc::Sender<std::result::Result<Evaluation, Raised>>,
    },
}

struct Handle {
    commands: mpsc::Sender<Command>,
    signals: UserSignalSender,
}

/// Python behind the `Interpreter` boundary.
///
/// The VM is single-threaded, so it lives on a dedicated worker thread and every
/// operation is a message to it. Each run gets a fresh `__main__` scope.
pub struct Python {
    handle: OnceLock<Handle>,
    /// Id of the run the watchdog may interrupt; 0 when idle
    current: Arc<AtomicU64>,
    next_run: AtomicU64,
    /// Set while a run ignores its interrupts past `WEDGE_AFTER`
    wedged: Arc<AtomicBool>,
}

impl Default for Python {
    fn default() -> Self {
        Self::new()
    }
}

impl Python {
    pub fn new() -> Self {
        Self {
            handle: OnceLock::new(),
            current: Arc::new(AtomicU64::new(0)),
            next_run: AtomicU64::new(0),
            wedged: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the worker and wait until its interpreter is built
    pub fn boot(&self) -> Result<()> {
        if self.handle.get().is_some() {
            return Ok(());
        }

        let started = Instant::now();
        let (commands, inbox) = mpsc::channel();
        let (booted_tx, booted_rx) = mpsc::channel();
        let (signals, signal_rx) = user_signal_channel();
        let wedged = Arc::clone(&self.wedged);

        thread::Builder::new()
            .name("polyrun-python".to_string())
            .spawn(move || match Worker::start(signal_rx, wedged) {
                Ok(worker) => {
                    let _ = booted_tx.send(Ok(()));
                    worker.serve(inbox);
                }
                Err(e) => {
                    let _ = booted_tx.send(Err(e));
                }
            })
            .map_err(|e| InterpreterError::Boot(e.to_string()))?;

        booted_rx
            .recv()
            .map_err(|_| InterpreterError::Boot("worker exited during boot".to_string()))??;

        if self.handle.set(Handle { commands, signals }).is_err() {
            debug!("interpreter booted concurrently, keeping the first worker");
        }

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Python interpreter ready"
        );
        Ok(())
    }

    /// Send a helper call to the worker. While a run is wedged the call is queued
    /// behind it and not waited for.
    fn call(&self, helper: &'static str, sink: &str) -> Result<String> {
        let handle = self.handle.get().ok_or(InterpreterError::NotReady)?;

        let (reply, replied) = mpsc::channel();
        handle
            .commands
            .send(Command::Call {
                helper,
                sink: sink.to_string(),
                reply,
            })
            .map_err(|_| InterpreterError::Stream("interpreter worker exited".to_string()))?;

        if self.wedged.load(Ordering::SeqCst) {
            return Err(InterpreterError::Stream("interpreter is busy".to_string()));
        }
        match replied.recv_timeout(COMMAND_WAIT) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                Err(InterpreterError::Stream("interpreter is busy".to_string()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(InterpreterError::Stream("interpreter worker exited".to_string()))
            }
        }
    }

    /// Ask the VM to raise `KeyboardInterrupt` in `run`; stale requests are no-ops
    fn interrupt(&self, handle: &Handle, run: u64) {
        let current = Arc::clone(&self.current);
        let sent = handle.signals.send(Box::new(move |vm: &VirtualMachine| {
            if current.load(Ordering::SeqCst) == run {
                Err(vm.new_exception_empty(vm.ctx.exceptions.keyboard_interrupt.to_owned()))
            } else {
                Ok(())
            }
        }));
        if sent.is_err() {
            warn!(run = run, "interrupt not delivered, worker is gone");
        }
    }

    /// Wait for the worker's verdict, interrupting once the deadline passes
    fn await_run(
        &self,
        handle: &Handle,
        run: u64,
        replied: &mpsc::Receiver<std::result::Result<Evaluation, Raised>>,
        deadline: Instant,
    ) -> std::result::Result<Evaluation, Raised> {
        let gone = || Raised::new("interpreter worker exited");

        match replied.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(verdict) => return verdict,
            Err(RecvTimeoutError::Disconnected) => return Err(gone()),
            Err(RecvTimeoutError::Timeout) => {}
        }

        debug!(run = run, "deadline reached, interrupting");
        loop {
            self.interrupt(handle, run);
            match replied.recv_timeout(INTERRUPT_PERIOD) {
                Ok(verdict) => return verdict,
                Err(RecvTimeoutError::Disconnected) => return Err(gone()),
                Err(RecvTimeoutError::Timeout) => {}
            }
            if Instant::now().saturating_duration_since(deadline) >= WEDGE_AFTER {
                warn!(run = run, "run ignores interrupts, interpreter marked busy");
                self.wedged.store(true, Ordering::SeqCst);
                return Err(Raised::new("interrupted"));
            }
        }
    }
}

impl Interpreter for Python {
    fn name(&self) -> &str {
        PYTHON_ID
    }

    fn is_ready(&self) -> bool {
        self.handle.get().is_some() && !self.wedged.load(Ordering::SeqCst)
    }

    fn redirect_streams(&self, sink: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(InterpreterError::NotReady);
        }
        self.call("redirect", sink).map(|_| ())
    }

    fn read_sink(&self, sink: &str) -> Result<String> {
        self.call("read", sink)
    }

    fn restore_streams(&self, sink: &str) -> Result<()> {
        self.call("restore", sink).map(|_| ())
    }

    fn evaluate(&self, source: &str, deadline: Instant) -> std::result::Result<Evaluation, Raised> {
        let handle = self
            .handle
            .get()
            .ok_or_else(|| Raised::new("interpreter is not ready"))?;

        let started = Instant::now();
        let run = self.next_run.fetch_add(1, Ordering::SeqCst) + 1;
        self.current.store(run, Ordering::SeqCst);

        let (reply, replied) = mpsc::channel();
        handle
            .commands
            .send(Command::Evaluate {
                source: source.to_string(),
                reply,
            })
            .map_err(|_| Raised::new("interpreter worker exited"))?;

        let evaluated = self.await_run(handle, run, &replied, deadline);
        let _ = self
            .current
            .compare_exchange(run, 0, Ordering::SeqCst, Ordering::SeqCst);

        evaluated.map_err(|raised| {
            if Instant::now() >= deadline {
                Raised::new(format!(
                    "Execution interrupted: exceeded the {} ms time limit",
                    deadline.saturating_duration_since(started).as_millis()
                ))
            } else {
                raised
            }
        })
    }
}

/// Owns the VM; lives and dies on the worker thread
struct Worker {
    interpreter: rustpython_vm::Interpreter,
    host: Scope,
    wedged: Arc<AtomicBool>,
}

impl Worker {
    fn start(signals: UserSignalReceiver, wedged: Arc<AtomicBool>) -> Result<Self> {
        let mut settings = Settings::default();
        settings.install_signal_handlers = false;

        let interpreter = rustpython_vm::Interpreter::with_init(settings, move |vm| {
            vm.set_user_signal_channel(signals);
        });

        let host = interpreter
            .enter(|vm| -> std::result::Result<Scope, String> {
                let scope = vm.new_scope_with_builtins();
                vm.run_string(scope.clone(), PRELUDE, "<polyrun>".to_string())
                    .map_err(|exc| raised_from(vm, &exc).message)?;
                Ok(scope)
            })
            .map_err(InterpreterError::Boot)?;

        Ok(Self {
            interpreter,
            host,
            wedged,
        })
    }

    fn serve(self, inbox: mpsc::Receiver<Command>) {
        while let Ok(command) = inbox.recv() {
            match command {
                Command::Call {
                    helper,
                    sink,
                    reply,
                } => {
                    let _ = reply.send(self.call(helper, &sink));
                }
                Command::Evaluate { source, reply } => {
                    let verdict = self.evaluate(&source);
                    self.wedged.store(false, Ordering::SeqCst);
                    let _ = reply.send(verdict);
                }
            }
        }
        debug!("Python worker stopped");
    }

    fn call(&self, helper: &str, sink: &str) -> Result<String> {
        self.interpreter.enter(|vm| {
            let called = || -> PyResult<String> {
                let function = self.host.globals.get_item(helper, vm)?;
                let value = function.call((sink.to_string(),), vm)?;
                Ok(value.str(vm)?.to_string())
            };
            called().map_err(|exc| InterpreterError::Stream(raised_from(vm, &exc).message))
        })
    }

    /// Run `source` in a fresh `__main__`; the last expression is the result
    fn evaluate(&self, source: &str) -> std::result::Result<Evaluation, Raised> {
        self.interpreter.enter(|vm| {
            let completed = vm
                .new_scope_with_main()
                .and_then(|scope| vm.run_block_expr(scope, source));
            match completed {
                Ok(value) if vm.is_none(&value) => Ok(Evaluation::NoValue),
                Ok(value) => value
                    .str(vm)
                    .map(|text| Evaluation::Value(text.to_string()))
                    .map_err(|exc| raised_from(vm, &exc)),
                Err(exc) => Err(raised_from(vm, &exc)),
            }
        })
    }
}

/// The formatted traceback, which already ends with `Name: message`
fn raised_from(vm: &VirtualMachine, exc: &PyBaseExceptionRef) -> Raised {
    let mut trace = String::new();
    if vm.write_exception(&mut trace, exc).is_err() || trace.trim().is_empty() {
        return Raised::new("Python exception");
    }
    Raised::new(trace.trim_end())
}
