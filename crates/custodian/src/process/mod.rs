pub mod utils;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use common::delivery::run_worker;

use crate::config::{Config, ConfigError};
use crate::delivery::HttpDeliverer;
use crate::http_server;
use crate::state::{State, StateError};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle for gracefully shutting down the custodian service.
pub struct ShutdownHandle {
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_tx: watch::Sender<()>,
}

impl ShutdownHandle {
    /// Block until the service shuts down (via signal or explicit shutdown).
    pub async fn wait(self) {
        shutdown_and_join(self.graceful_waiter, self.handles).await;
    }

    /// Trigger shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Initialize logging and the panic handler.
/// Returns guards that must be kept alive for the duration of the program.
pub fn init_logging(
    config: &Config,
) -> Result<Vec<tracing_appender::non_blocking::WorkerGuard>, ConfigError> {
    let guards = init_tracing(config.log_level()?, config.log_dir.as_deref(), "custodian.log");
    utils::report_build_info();
    Ok(guards)
}

/// Install a compact stdout subscriber, plus a daily-rolling file under
/// `log_dir` when one is given. `RUST_LOG` overrides `log_level`.
pub fn init_tracing(
    log_level: tracing::Level,
    log_dir: Option<&Path>,
    file_name: &str,
) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let mut guards = Vec::new();

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let stdout_env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(stdout_env_filter);

    if let Some(log_dir) = log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, file_name);
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_env_filter = EnvFilter::builder()
            .with_default_directive(log_level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(file_env_filter);

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry().with(stdout_layer).init();
    }

    utils::register_panic_logger();

    guards
}

/// Wait for shutdown and join all handles with timeout.
async fn shutdown_and_join(
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
) {
    let _ = graceful_waiter.await;

    if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .is_err()
    {
        tracing::error!(
            "Failed to shut down within {} seconds",
            FINAL_SHUTDOWN_TIMEOUT.as_secs()
        );
        std::process::exit(4);
    }
}

/// Create state and spawn the delivery worker and API server.
///
/// The returned `ShutdownHandle` must be kept alive; dropping it does not stop the service.
pub async fn start_service(config: &Config) -> Result<(State, ShutdownHandle), StateError> {
    let (graceful_waiter, shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker()?;
    let (state, receiver) = State::from_config(config)?;
    let deliverer = Arc::new(HttpDeliverer::new(config.attempt_timeout())?);

    let mut handles = Vec::new();

    // the state holds a dispatcher for the whole process, so stop on shutdown
    let retry = config.retry_policy();
    let mut worker_rx = shutdown_rx.clone();
    let worker_handle = tokio::spawn(async move {
        tokio::select! {
            _ = run_worker(deliverer, retry, receiver) => {}
            _ = worker_rx.changed() => {
                tracing::info!("Delivery worker stopping on shutdown");
            }
        }
    });
    handles.push(worker_handle);

    let api_config = http_server::Config::new(config.listen_addr);
    let api_state = state.clone();
    let api_rx = shutdown_rx.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = http_server::run_api(api_config, api_state, api_rx).await {
            tracing::error!("API server error: {}", e);
        }
    });
    handles.push(api_handle);

    tracing::info!("Running: custodian API on {}", config.listen_addr);

    let handle = ShutdownHandle {
        graceful_waiter,
        handles,
        shutdown_tx,
    };

    Ok((state, handle))
}

/// Spawns the custodian service and blocks until a shutdown signal is received.
pub async fn spawn_service(config: &Config) -> Result<(), StateError> {
    let _guards = init_logging(config)?;
    let (_, handle) = start_service(config).await?;
    handle.wait().await;
    Ok(())
}
