// Dispatcher - single entry point from request to normalized result

use crate::capture::CaptureShim;
use crate::chain::{unavailable_message, ChainExecutor, ChainReport, ProviderDescriptor};
use crate::comm::types::{ResponseMeta, UserRequest, UserResponse};
use crate::dispatch::config::DispatchConfig;
use crate::dispatch::types::{
    ExecutionMeta, ExecutionRequest, ExecutionResult, LanguageId, Outcome, LOCAL_ERROR_EXIT_CODE,
    SYNTHETIC_EXIT_CODE,
};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Message for a blank source buffer
pub const EMPTY_SOURCE_MESSAGE: &str = "No code to run";

/// Slack on top of the local deadline before the blocking task is abandoned
const LOCAL_GRACE: Duration = Duration::from_secs(2);

/// Validates, routes by language and turns every failure into a value
pub struct Dispatcher {
    config: DispatchConfig,
    /// Capture shims keyed by local provider id
    locals: HashMap<String, CaptureShim>,
    chain: Arc<ChainExecutor>,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, chain: ChainExecutor) -> Self {
        Self {
            config,
            locals: HashMap::new(),
            chain: Arc::new(chain),
        }
    }

    /// Serve the local provider `provider_id` with `shim`
    pub fn with_local(mut self, provider_id: impl Into<String>, shim: CaptureShim) -> Self {
        self.locals.insert(provider_id.into(), shim);
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Execute one request. Never fails and never panics.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();

        if request.source.trim().is_empty() {
            info!(language = %request.language, "Rejected empty source");
            return Outcome::request_invalid(EMPTY_SOURCE_MESSAGE).into_result(ExecutionMeta {
                attempted_providers: Vec::new(),
                provider_used: None,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }

        let deadline = deadline_after(started, self.config.request_budget());

        info!(
            language = %request.language,
            source_bytes = request.source.len(),
            budget_ms = self.config.request_budget().as_millis() as u64,
            "Dispatching execution"
        );

        let report = match AssertUnwindSafe(self.route(&request, deadline))
            .catch_unwind()
            .await
        {
            Ok(report) => report,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(language = %request.language, panic = %message, "Execution panicked");
                ChainReport {
                    outcome: Outcome::runtime_error(
                        "",
                        format!("Internal error: {}", message),
                        SYNTHETIC_EXIT_CODE,
                    ),
                    attempted: Vec::new(),
                    provider_used: None,
                }
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            language = %request.language,
            status = %report.outcome.status(),
            provider = report.provider_used.as_deref().unwrap_or("none"),
            elapsed_ms = elapsed_ms,
            "Execution finished"
        );

        report.outcome.into_result(ExecutionMeta {
            attempted_providers: report.attempted,
            provider_used: report.provider_used,
            elapsed_ms,
        })
    }

    /// A local head runs first; when it gives no definitive verdict the remote
    /// providers after it take over within the same budget.
    async fn route(&self, request: &ExecutionRequest, deadline: Instant) -> ChainReport {
        let providers = self.config.route(request.language);

        let (local, rest) = match providers.split_first() {
            Some((head, rest)) if head.is_local() => (head, rest),
            _ => {
                return self
                    .chain
                    .run_remote(request.language, &request.source, providers, deadline)
                    .await;
            }
        };

        let mut attempted = Vec::new();
        let mut local_report = None;
        match self.locals.get(&local.provider_id) {
            Some(shim) => {
                let report = self.run_local(shim, request, local, deadline).await;
                if report.provider_used.is_some() || rest.is_empty() {
                    return report;
                }
                info!(
                    provider = %local.provider_id,
                    status = %report.outcome.status(),
                    "local interpreter gave no verdict, falling back to remote providers"
                );
                attempted = report.attempted.clone();
                local_report = Some(report);
            }
            None => warn!(provider = %local.provider_id, "local interpreter not registered, skipping"),
        }

        if rest.is_empty() {
            return ChainReport {
                outcome: Outcome::service_unavailable(unavailable_message(
                    request.language,
                    &[(
                        local.provider_id.clone(),
                        "local interpreter is not available".to_string(),
                    )],
                )),
                attempted,
                provider_used: None,
            };
        }

        let mut report = self
            .chain
            .run_remote(request.language, &request.source, rest, deadline)
            .await;
        if report.provider_used.is_none() && report.attempted.is_empty() {
            if let Some(local_report) = local_report {
                return local_report;
            }
        }
        attempted.append(&mut report.attempted);
        report.attempted = attempted;
        report
    }

    /// The interpreter blocks its thread, so it runs on the blocking pool
    async fn run_local(
        &self,
        shim: &CaptureShim,
        request: &ExecutionRequest,
        descriptor: &ProviderDescriptor,
        deadline: Instant,
    ) -> ChainReport {
        let provider_id = descriptor.provider_id.clone();
        let local_deadline = deadline_after(Instant::now(), descriptor.timeout()).min(deadline);
        let wait = local_deadline
            .saturating_duration_since(Instant::now())
            .saturating_add(LOCAL_GRACE);

        let shim = shim.clone();
        let source = request.source.clone();
        let handle = tokio::task::spawn_blocking(move || shim.run(&source, local_deadline));

        let outcome = match timeout(wait, handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic().as_ref());
                error!(provider = %provider_id, panic = %message, "Local interpreter panicked");
                Outcome::runtime_error(
                    "",
                    format!("Internal error: {}", message),
                    LOCAL_ERROR_EXIT_CODE,
                )
            }
            Ok(Err(join_error)) => {
                warn!(provider = %provider_id, error = %join_error, "Local execution cancelled");
                Outcome::runtime_error(
                    "",
                    format!("Local execution was cancelled: {}", join_error),
                    LOCAL_ERROR_EXIT_CODE,
                )
            }
            Err(_) => {
                warn!(provider = %provider_id, wait_ms = wait.as_millis() as u64, "Local execution abandoned");
                Outcome::runtime_error(
                    "",
                    format!("Execution timed out after {} ms", wait.as_millis()),
                    LOCAL_ERROR_EXIT_CODE,
                )
            }
        };

        let provider_used = outcome.status().is_definitive().then(|| provider_id.clone());
        ChainReport {
            outcome,
            attempted: vec![provider_id],
            provider_used,
        }
    }

    /// Handle a request from Comm and reply on its channel
    pub async fn handle_user_request(&self, req: UserRequest) {
        let started = Instant::now();
        let reply = req.reply;

        info!(
            addr = %req.source_addr,
            language = %req.language,
            source_bytes = req.source.len(),
            "Handling user request"
        );

        let result = match req.language.parse::<LanguageId>() {
            Ok(language) => {
                let guard = self.config.request_budget().saturating_add(LOCAL_GRACE);
                match timeout(guard, self.execute(ExecutionRequest::new(language, req.source))).await
                {
                    Ok(result) => result,
                    Err(_) => {
                        error!(language = %language, "Request exceeded its budget");
                        budget_exceeded(started, guard)
                    }
                }
            }
            Err(message) => {
                warn!(language = %req.language, "Unsupported language");
                let supported: Vec<&str> = LanguageId::ALL.iter().map(|l| l.as_str()).collect();
                Outcome::request_invalid(format!(
                    "{}. Supported languages: {}",
                    message,
                    supported.join(", ")
                ))
                .into_result(ExecutionMeta::default())
            }
        };

        if reply.send(to_user_response(result)).is_err() {
            warn!("Failed to send response to client");
        }
    }
}

/// `start + budget`, or far in the future when that is not representable
fn deadline_after(start: Instant, budget: Duration) -> Instant {
    start
        .checked_add(budget)
        .or_else(|| start.checked_add(Duration::from_secs(u32::MAX as u64)))
        .unwrap_or(start)
}

/// Result for a request abandoned by the outer guard
fn budget_exceeded(started: Instant, guard: Duration) -> ExecutionResult {
    Outcome::service_unavailable(format!("Request timed out after {} ms", guard.as_millis()))
        .into_result(ExecutionMeta {
            attempted_providers: Vec::new(),
            provider_used: None,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
}

fn to_user_response(result: ExecutionResult) -> UserResponse {
    UserResponse {
        status: result.status.as_str().to_string(),
        output: result.output,
        diagnostic: result.diagnostic,
        exit_code: result.exit_code,
        meta: ResponseMeta {
            attempted_providers: result.meta.attempted_providers,
            provider_used: result.meta.provider_used,
            elapsed_ms: result.meta.elapsed_ms,
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
