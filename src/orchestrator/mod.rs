//! Batch orchestration split into focused submodules.
//!
//! - [`batch`] - [`BatchRun`] validation and output naming
//! - [`worker`] - the run loop: worker pool, cancellation, completion signal

mod batch;
mod worker;


pub use batch::BatchRun;

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::progress::ProgressReporter;
use crate::remote::{AlphaApi, AuthContext, HttpAlphaApi, RemoteJobClient};
use crate::types::Event;

/// Runs batches of simulation jobs against the remote API (cloneable - all fields are shared)
#[derive(Clone)]
pub struct Orchestrator {
    /// Protocol driver shared by all workers
    pub(crate) client: RemoteJobClient,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Event emission surface
    pub(crate) reporter: ProgressReporter,
}

impl Orchestrator {
    /// Create an orchestrator over any [`AlphaApi`] implementation
    pub fn new(api: Arc<dyn AlphaApi>, config: Config) -> Result<Self> {
        config.validate()?;
        let client = RemoteJobClient::new(api, &config);
        let reporter = ProgressReporter::new(config.batch.event_buffer);

        tracing::info!(
            base_url = %config.api.base_url,
            concurrency = config.batch.concurrency,
            max_attempts = config.retry.max_attempts,
            output_dir = %config.output.output_dir.display(),
            "Orchestrator initialized"
        );

        Ok(Self {
            client,
            config: Arc::new(config),
            reporter,
        })
    }

    /// Create an orchestrator talking HTTP to `config.api.base_url` with the given session
    ///
    /// # Example
    ///
    /// ```no_run
    /// use alpha_batch::{AuthContext, BatchRun, Config, JobSpec, Orchestrator};
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = Config::default();
    /// let auth = AuthContext::from_cookie("t", "session-token");
    /// let orchestrator = Orchestrator::with_http(config, auth)?;
    ///
    /// let batch = BatchRun::new(vec![JobSpec::new("job-1", "rank(-returns)")])?;
    /// let cancel = CancellationToken::new();
    /// let report = orchestrator
    ///     .run(batch, orchestrator.concurrency(), &cancel)
    ///     .await?;
    /// println!("{} completed, csv at {}", report.counters.completed, report.csv_path.display());
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_http(config: Config, auth: AuthContext) -> Result<Self> {
        let api = HttpAlphaApi::new(&config.api, auth)?;
        Self::new(Arc::new(api), config)
    }

    /// Subscribe to progress events
    ///
    /// Subscribe before calling [`run`](Self::run) to see a run's first events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.reporter.subscribe()
    }

    /// Configured default concurrency
    pub fn concurrency(&self) -> usize {
        self.config.batch.concurrency
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }
}
