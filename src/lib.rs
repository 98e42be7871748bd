//! # alpha-batch
//!
//! Batch orchestration for remote alpha backtests.
//!
//! A batch is a list of [`JobSpec`]s, each an alpha expression plus simulation
//! settings. The [`Orchestrator`] submits them to a remote simulation service with
//! bounded concurrency, polls each simulation until it finishes, fetches the resulting
//! metrics and appends one CSV row per finished job. Progress is published as
//! [`Event`]s on a broadcast channel; the crate does no rendering of its own.
//!
//! ## Quick Start
//!
//! ```no_run
//! use alpha_batch::{AuthContext, BatchRun, Config, HttpAlphaApi, JobSpec, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let auth = HttpAlphaApi::authenticate(&config.api, "user@example.com", "secret").await?;
//!     let orchestrator = Orchestrator::with_http(config, auth)?;
//!
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(alpha_batch::cancel_on_signal(cancel.clone()));
//!
//!     let batch = BatchRun::new(vec![
//!         JobSpec::new("momentum", "rank(ts_delta(close, 5))"),
//!         JobSpec::new("reversal", "-rank(returns)"),
//!     ])?;
//!     let report = orchestrator.run(batch, orchestrator.concurrency(), &cancel).await?;
//!     println!("results in {}", report.csv_path.display());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Batch orchestration (decomposed into focused submodules)
pub mod orchestrator;
/// Progress event emission
pub mod progress;
/// Remote simulation API: protocol types, HTTP adapter and per-job driver
pub mod remote;
/// Retry with fixed backoff and cancellation
pub mod retry;
/// CSV and log output
pub mod sink;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{ApiConfig, BatchConfig, Config, OutputConfig, PollConfig, RetryConfig};
pub use error::{ApiError, Error, FailureKind, Result};
pub use orchestrator::{BatchRun, Orchestrator};
pub use progress::ProgressReporter;
pub use remote::{AlphaApi, AuthContext, HttpAlphaApi, JobObserver, RemoteJobClient};
pub use sink::ResultSink;
pub use types::{
    AlphaMetrics, BatchCounters, BatchReport, CorrelationId, Event, JobResult, JobSpec,
    Neutralization, Region, Step, Switch, Universe,
};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Spawn it next to a run; the run winds down as if the caller had cancelled it.
pub async fn cancel_on_signal(token: CancellationToken) {
    tokio::select! {
        _ = wait_for_signal() => {
            tracing::info!("Cancelling batch on signal");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
