// Embedded QuickJS interpreter for JavaScript

use crate::capture::error::{InterpreterError, Result};
use crate::capture::interpreter::{Evaluation, Interpreter, Raised};
use rquickjs::runtime::RejectionTracker;
use rquickjs::{
    CatchResultExt, CaughtError, Context, Ctx, Exception, Function, Persistent, Runtime, Value,
};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const QUICKJS_ID: &str = "quickjs";

/// Host console and capture helpers, installed in every fresh context.
/// Helpers are non-writable so user code cannot replace the restore path.
const PRELUDE: &str = r#"
(() => {
  const format = (args) => args.map((arg) => {
    if (typeof arg === "object" && arg !== null) {
      try { return JSON.stringify(arg, null, 2); } catch { return String(arg); }
    }
    return String(arg);
  }).join(" ");

  const makeConsole = (write) => ({
    log: (...args) => write("stdout", format(args)),
    info: (...args) => write("stdout", format(args)),
    debug: (...args) => write("stdout", format(args)),
    warn: (...args) => write("stderr", format(args)),
    error: (...args) => write("stderr", format(args)),
  });

  const hostWrite = globalThis.__hostWrite;
  const hostConsole = Object.freeze(makeConsole((stream, text) => hostWrite(stream, text)));
  globalThis.console = hostConsole;

  const fixed = (name, value) =>
    Object.defineProperty(globalThis, name, { value, writable: false, configurable: false });

  fixed("__formatValue", (value) => format([value]));
  fixed("__redirectConsole", (sink) => {
    const lines = [];
    globalThis[sink] = lines;
    globalThis.console = makeConsole((_stream, text) => { lines.push(text); });
  });
  fixed("__readSink", (sink) =>
    Array.isArray(globalThis[sink]) ? globalThis[sink].join("\n") : "");
  fixed("__restoreConsole", (sink) => {
    globalThis.console = hostConsole;
    delete globalThis[sink];
  });
})();
"#;

/// Unhandled rejections seen during a run, keyed by promise identity
type Rejections = Arc<Mutex<Vec<(u64, Raised)>>>;

/// One runtime and context, used for exactly one run.
// Context is declared first so it drops before its runtime
struct Engine {
    context: Context,
    runtime: Runtime,
    rejections: Rejections,
}

impl Engine {
    fn build(deadline: &Arc<Mutex<Option<Instant>>>) -> Result<Self> {
        let runtime = Runtime::new().map_err(|e| InterpreterError::Boot(e.to_string()))?;

        let deadline = Arc::clone(deadline);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            deadline
                .lock()
                .map(|d| d.is_some_and(|at| Instant::now() >= at))
                .unwrap_or(false)
        })));

        let rejections: Rejections = Arc::new(Mutex::new(Vec::new()));
        let tracked = Arc::clone(&rejections);
        runtime.set_host_promise_rejection_tracker(Some(rejection_tracker(
            move |ctx, promise, reason, handled| {
                track_rejection(&tracked, &ctx, promise, reason, handled)
            },
        )));

        let context = Context::full(&runtime).map_err(|e| InterpreterError::Boot(e.to_string()))?;

        context
            .with(|ctx| -> std::result::Result<(), String> {
                let host_write = Function::new(ctx.clone(), |stream: String, text: String| {
                    debug!(target: "polyrun::js", stream = %stream, "{}", text);
                })
                .map_err(|e| e.to_string())?;
                ctx.globals()
                    .set("__hostWrite", host_write)
                    .map_err(|e| e.to_string())?;
                ctx.eval::<(), _>(PRELUDE)
                    .catch(&ctx)
                    .map_err(|e| e.to_string())
            })
            .map_err(InterpreterError::Boot)?;

        Ok(Self {
            context,
            runtime,
            rejections,
        })
    }

    fn call_helper<R>(&self, helper: &str, sink: &str) -> Result<R>
    where
        R: for<'js> rquickjs::FromJs<'js> + 'static,
    {
        self.context
            .with(|ctx| -> std::result::Result<R, String> {
                let function: Function = ctx.globals().get(helper).map_err(|e| e.to_string())?;
                function
                    .call::<_, R>((sink.to_string(),))
                    .catch(&ctx)
                    .map_err(|e| e.to_string())
            })
            .map_err(InterpreterError::Stream)
    }

    /// Evaluate, drain the job queue, then settle the completion value.
    /// A promise completion counts as the run's result.
    fn run(&self, source: &str, deadline: Instant) -> std::result::Result<Evaluation, Raised> {
        let completion = self.context.with(|ctx| {
            ctx.eval::<Value, _>(source)
                .catch(&ctx)
                .map(|value| Persistent::save(&ctx, value))
                .map_err(|caught| raised_from(&ctx, caught))
        })?;

        let drained = self.drain_jobs(deadline);

        self.context.with(|ctx| {
            let value = completion
                .restore(&ctx)
                .map_err(|e| Raised::new(e.to_string()))?;
            drained?;
            let evaluation = settle(&ctx, value)?;
            match self.first_unhandled() {
                Some(raised) => Err(raised),
                None => Ok(evaluation),
            }
        })
    }

    /// Run queued promise jobs until the queue is empty or the deadline passes.
    /// Jobs left behind die with the engine.
    fn drain_jobs(&self, deadline: Instant) -> std::result::Result<(), Raised> {
        while self.runtime.is_job_pending() {
            if Instant::now() >= deadline {
                debug!("deadline reached with promise jobs still queued");
                return Err(Raised::new("interrupted"));
            }
            if let Err(job) = self.runtime.execute_pending_job() {
                return Err(job.0.with(|ctx| {
                    let reason = ctx.catch();
                    raised_from_value(&ctx, reason)
                }));
            }
        }
        Ok(())
    }

    fn first_unhandled(&self) -> Option<Raised> {
        self.rejections
            .lock()
            .ok()
            .and_then(|mut rejections| (!rejections.is_empty()).then(|| rejections.remove(0).1))
    }
}

/// Pins the closure to the tracker's higher-ranked signature
fn rejection_tracker<F>(tracker: F) -> RejectionTracker
where
    F: for<'a> Fn(Ctx<'a>, Value<'a>, Value<'a>, bool) + Send + 'static,
{
    Box::new(tracker)
}

fn track_rejection<'js>(
    rejections: &Rejections,
    ctx: &Ctx<'js>,
    promise: Value<'js>,
    reason: Value<'js>,
    handled: bool,
) {
    let mut hasher = DefaultHasher::new();
    promise.hash(&mut hasher);
    let key = hasher.finish();

    let Ok(mut rejections) = rejections.lock() else {
        return;
    };
    if handled {
        rejections.retain(|(tracked, _)| *tracked != key);
    } else {
        rejections.push((key, raised_from_value(ctx, reason)));
    }
}

/// Unwrap a settled promise; anything else is its own result
fn settle<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> std::result::Result<Evaluation, Raised> {
    let value = match value.try_into_promise() {
        Ok(promise) => match promise.result::<Value>() {
            None => return Ok(Evaluation::NoValue),
            Some(Ok(resolved)) => resolved,
            Some(Err(_)) => return Err(raised_from_value(ctx, ctx.catch())),
        },
        Err(value) => value,
    };

    if value.is_undefined() {
        Ok(Evaluation::NoValue)
    } else {
        Ok(Evaluation::Value(format_value(ctx, value)))
    }
}

/// QuickJS behind the `Interpreter` boundary.
///
/// Every run gets a fresh runtime and context, so globals, prototype changes
/// and queued jobs never outlive the run that created them. `boot` prepares
/// the first engine and flips the readiness flag.
pub struct QuickJs {
    ready: AtomicBool,
    engine: Mutex<Option<Engine>>,
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl Default for QuickJs {
    fn default() -> Self {
        Self::new()
    }
}

impl QuickJs {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            engine: Mutex::new(None),
            deadline: Arc::new(Mutex::new(None)),
        }
    }

    /// Build the first engine; flips the readiness flag on success
    pub fn boot(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let started = Instant::now();
        let engine = Engine::build(&self.deadline)?;
        {
            let mut slot = self.slot()?;
            if slot.is_none() {
                *slot = Some(engine);
            }
        }
        self.ready.store(true, Ordering::Release);

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "QuickJS interpreter ready"
        );
        Ok(())
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<Engine>>> {
        self.engine
            .lock()
            .map_err(|_| InterpreterError::Stream("engine lock poisoned".to_string()))
    }

    fn with_engine<R>(&self, f: impl FnOnce(&Engine) -> Result<R>) -> Result<R> {
        if !self.is_ready() {
            return Err(InterpreterError::NotReady);
        }
        let slot = self.slot()?;
        let engine = slot
            .as_ref()
            .ok_or_else(|| InterpreterError::Stream("no capture in progress".to_string()))?;
        f(engine)
    }

    fn arm(&self, deadline: Option<Instant>) {
        if let Ok(mut slot) = self.deadline.lock() {
            *slot = deadline;
        }
    }
}

fn raised_from<'js>(ctx: &Ctx<'js>, caught: CaughtError<'js>) -> Raised {
    match caught {
        CaughtError::Exception(exception) => raised_from_exception(&exception),
        CaughtError::Value(value) => Raised::new(format!("Uncaught {}", format_value(ctx, value))),
        CaughtError::Error(error) => Raised::new(error.to_string()),
    }
}

fn raised_from_value<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> Raised {
    match value.try_into_exception() {
        Ok(exception) => raised_from_exception(&exception),
        Err(value) => Raised::new(format!("Uncaught {}", format_value(ctx, value))),
    }
}

fn raised_from_exception(exception: &Exception<'_>) -> Raised {
    let name: String = exception
        .get::<_, String>("name")
        .unwrap_or_else(|_| "Error".to_string());
    let message = exception.message().unwrap_or_default();
    Raised {
        message: if message.is_empty() {
            name
        } else {
            format!("{}: {}", name, message)
        },
        trace: exception.stack().filter(|s| !s.trim().is_empty()),
    }
}

fn format_value<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> String {
    ctx.globals()
        .get::<_, Function>("__formatValue")
        .and_then(|format| format.call::<_, String>((value,)))
        .unwrap_or_else(|_| "value".to_string())
}

impl Interpreter for QuickJs {
    fn name(&self) -> &str {
        QUICKJS_ID
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn redirect_streams(&self, sink: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(InterpreterError::NotReady);
        }
        let mut slot = self.slot()?;
        if slot.is_none() {
            *slot = Some(Engine::build(&self.deadline)?);
        }
        match slot.as_ref() {
            Some(engine) => engine.call_helper::<()>("__redirectConsole", sink),
            None => Err(InterpreterError::NotReady),
        }
    }

    fn read_sink(&self, sink: &str) -> Result<String> {
        self.with_engine(|engine| engine.call_helper::<String>("__readSink", sink))
    }

    /// Rebinds the host console, then discards the engine with everything the run left in it
    fn restore_streams(&self, sink: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(InterpreterError::NotReady);
        }
        let engine = self.slot()?.take();
        match engine {
            Some(engine) => engine.call_helper::<()>("__restoreConsole", sink),
            None => {
                warn!(sink = %sink, "restore without an active capture");
                Ok(())
            }
        }
    }

    fn evaluate(&self, source: &str, deadline: Instant) -> std::result::Result<Evaluation, Raised> {
        let slot = self
            .slot()
            .map_err(|e| Raised::new(e.to_string()))?;
        let engine = slot
            .as_ref()
            .ok_or_else(|| Raised::new("interpreter is not ready"))?;

        let started = Instant::now();
        self.arm(Some(deadline));
        let evaluated = engine.run(source, deadline);
        self.arm(None);

        evaluated.map_err(|raised| {
            if Instant::now() >= deadline {
                Raised {
                    message: format!(
                        "Execution interrupted: exceeded the {} ms time limit",
                        deadline.saturating_duration_since(started).as_millis()
                    ),
                    trace: None,
                }
            } else {
                raised
            }
        })
    }
}
