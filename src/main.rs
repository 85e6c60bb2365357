mod capture;
mod chain;
mod comm;
mod dispatch;
mod provider;

use capture::{CaptureShim, Python, QuickJs, PYTHON_ID, QUICKJS_ID};
use chain::{ChainExecutor, HttpTransport};
use comm::{Comm, CommConfig};
use dispatch::{DispatchConfig, Dispatcher};
use provider::{JdoodleAdapter, JdoodleCredentials, PistonAdapter};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt;

/// Tokio runtime with signal handling
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let level = std::env::var("POLYRUN_LOG")
        .ok()
        .and_then(|v| v.parse::<Level>().ok())
        .unwrap_or(Level::DEBUG);
    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting polyrun daemon...");

    // Initialize config
    let comm_config = CommConfig::from_env();
    let dispatch_config = DispatchConfig::from_env()?;

    info!(
        comm_port = comm_config.listen_port,
        piston = %dispatch_config.piston_endpoint,
        budget_secs = dispatch_config.request_budget_secs,
        "Configuration loaded"
    );

    // Boot the interpreters in the background; requests meanwhile get service_unavailable
    // (Python falls back to the remote providers)
    let quickjs = Arc::new(QuickJs::new());
    let booting = Arc::clone(&quickjs);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = booting.boot() {
            error!(error = %e, "QuickJS boot failed, JavaScript will stay unavailable");
        }
    });
    let python = Arc::new(Python::new());
    let booting = Arc::clone(&python);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = booting.boot() {
            error!(error = %e, "Python boot failed, Python will run remotely only");
        }
    });

    // Initialize providers
    let ceiling = dispatch_config
        .request_budget()
        .saturating_add(Duration::from_secs(1));
    let transport = Arc::new(HttpTransport::new(ceiling)?);
    let mut chain = ChainExecutor::new(transport, dispatch_config.probe_timeout())
        .with_adapter(Arc::new(PistonAdapter::new()));
    match JdoodleCredentials::from_env() {
        Some(credentials) => chain.register(Arc::new(JdoodleAdapter::new(credentials))),
        None => warn!("JDoodle credentials not set, fallback provider disabled"),
    }
    info!(providers = ?chain.provider_ids(), "Chain executor initialized");

    let dispatcher = Dispatcher::new(dispatch_config, chain)
        .with_local(QUICKJS_ID, CaptureShim::new(quickjs))
        .with_local(PYTHON_ID, CaptureShim::new(python));

    // Initialize comm
    let (comm, mut user_rx) = Comm::new(comm_config).await?;
    info!(addr = %comm.local_addr()?, "Comm initialized");

    let comm_handle = tokio::spawn(async move {
        if let Err(e) = comm.run().await {
            error!(error = %e, "Comm server error");
        }
    });

    // One request at a time; the next waits until this one has replied
    info!("Entering main loop...");

    loop {
        tokio::select! {
            Some(req) = user_rx.recv() => {
                dispatcher.handle_user_request(req).await;
            }
            _ = async {
                signal::ctrl_c().await.ok();
            } => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    info!("Shutting down...");
    comm_handle.abort();

    info!("Goodbye!");
    Ok(())
}
