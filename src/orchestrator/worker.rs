//! Run loop: a fixed-size worker pool over an in-memory job queue.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{BatchRun, Orchestrator};
use crate::error::{Error, Result};
use crate::progress::ProgressReporter;
use crate::remote::{JobObserver, RemoteJobClient};
use crate::retry::{AttemptObserver, FailedAttempt};
use crate::sink::{ResultSink, run_file_stem};
use crate::types::{BatchCounters, BatchReport, CorrelationId, JobResult, JobSpec};

/// State shared by the workers of one run
struct RunState {
    queue: Mutex<VecDeque<JobSpec>>,
    sink: ResultSink,
    reporter: ProgressReporter,
    client: RemoteJobClient,
    /// Cancelled by the caller's token, a fatal sink error, or an auth abort
    run_token: CancellationToken,
    abort_on_auth_expired: bool,
    fatal: Mutex<Option<Error>>,
    auth_expired: Mutex<Vec<CorrelationId>>,
}

impl RunState {
    /// Record a fatal output error and stop the run
    ///
    /// Only the first error is kept and reported as `BatchFailed`.
    async fn fail(&self, error: Error) {
        tracing::error!(error = %error, "Writing batch output failed, aborting batch");
        let mut fatal = self.fatal.lock().await;
        if fatal.is_none() {
            self.reporter.batch_failed(&error);
            *fatal = Some(error);
        }
        drop(fatal);
        self.run_token.cancel();
    }
}

impl Orchestrator {
    /// Run a batch to completion or cancellation
    ///
    /// Spawns `concurrency` workers (capped at the batch size) that pull jobs from a
    /// shared queue. Results are written to a fresh CSV/log pair named after the moment
    /// this call starts. Cancelling `cancel` stops unclaimed jobs from starting and makes
    /// in-flight jobs return at their next wait; every job still ends with exactly one
    /// result.
    ///
    /// A `Finished` event is emitted exactly once, after all workers have exited and the
    /// output has been flushed. Per-job failures never fail the run; only output I/O
    /// errors do.
    pub async fn run(
        &self,
        batch: BatchRun,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        if concurrency == 0 {
            return Err(Error::config("batch.concurrency", "must be at least 1"));
        }

        let started_at = Local::now();
        let total = batch.len();
        let stem = run_file_stem(started_at);
        let sink = match ResultSink::create(&self.config.output.output_dir, &stem, total).await {
            Ok(sink) => sink,
            Err(e) => {
                tracing::error!(error = %e, "Could not create batch output");
                self.reporter.batch_failed(&e);
                for job in batch.jobs() {
                    self.reporter.job_finished(&JobResult::Cancelled {
                        correlation_id: job.correlation_id.clone(),
                    });
                }
                self.reporter.finished(
                    BatchCounters {
                        submitted: total,
                        cancelled: total,
                        ..Default::default()
                    },
                    false,
                );
                return Err(e);
            }
        };

        self.run_with_sink(batch, concurrency, cancel, sink, started_at)
            .await
    }

    /// Run a batch into an already opened sink
    pub(crate) async fn run_with_sink(
        &self,
        batch: BatchRun,
        concurrency: usize,
        cancel: &CancellationToken,
        sink: ResultSink,
        started_at: DateTime<Local>,
    ) -> Result<BatchReport> {
        let total = batch.len();
        tracing::info!(
            jobs = total,
            concurrency,
            csv = %sink.csv_path().display(),
            "Batch run started"
        );

        let state = Arc::new(RunState {
            queue: Mutex::new(VecDeque::from(batch.into_jobs())),
            sink,
            reporter: self.reporter.clone(),
            client: self.client.clone(),
            run_token: cancel.child_token(),
            abort_on_auth_expired: self.config.batch.abort_on_auth_expired,
            fatal: Mutex::new(None),
            auth_expired: Mutex::new(Vec::new()),
        });

        let workers: Vec<_> = (0..concurrency.min(total))
            .map(|worker_id| {
                let state = Arc::clone(&state);
                tokio::spawn(async move { run_worker(worker_id, state).await })
            })
            .collect();

        for joined in futures::future::join_all(workers).await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task panicked");
                state.run_token.cancel();
                state
                    .fatal
                    .lock()
                    .await
                    .get_or_insert(Error::Other(format!("worker task failed: {e}")));
            }
        }

        // Jobs nobody claimed still need their terminal marker
        let unclaimed: Vec<JobSpec> = state.queue.lock().await.drain(..).collect();
        for job in unclaimed {
            let result = JobResult::Cancelled {
                correlation_id: job.correlation_id.clone(),
            };
            if let Err(e) = state.sink.record(&job, &result, &state.reporter).await {
                state.fail(e).await;
            }
        }

        let was_cancelled = state.run_token.is_cancelled();
        let counters = state.sink.counters().await;
        let summary = format!(
            "batch {}: {} completed, {} failed, {} cancelled, {} unwritten",
            if was_cancelled { "cancelled" } else { "finished" },
            counters.completed,
            counters.failed,
            counters.cancelled,
            counters.unwritten
        );
        if let Err(e) = state.sink.log_batch(&summary).await {
            state.fail(e).await;
        }
        if let Err(e) = state.sink.flush().await {
            state.fail(e).await;
        }

        state.reporter.finished(counters, was_cancelled);
        tracing::info!(
            completed = counters.completed,
            failed = counters.failed,
            cancelled = counters.cancelled,
            unwritten = counters.unwritten,
            total = counters.submitted,
            was_cancelled,
            "Batch run finished"
        );

        if let Some(e) = state.fatal.lock().await.take() {
            return Err(e);
        }

        Ok(BatchReport {
            started_at,
            counters,
            csv_path: state.sink.csv_path().to_path_buf(),
            log_path: state.sink.log_path().to_path_buf(),
            was_cancelled,
            auth_expired: state.auth_expired.lock().await.clone(),
        })
    }
}

async fn run_worker(worker_id: usize, state: Arc<RunState>) {
    loop {
        if state.run_token.is_cancelled() {
            tracing::debug!(worker_id, "Worker stopping: run cancelled");
            break;
        }

        let next = state.queue.lock().await.pop_front();
        let Some(job) = next else {
            tracing::debug!(worker_id, "Worker stopping: queue empty");
            break;
        };

        state.reporter.job_started(&job.correlation_id);
        tracing::info!(worker_id, correlation_id = %job.correlation_id, "Job started");

        let observer = WorkerObserver {
            correlation_id: &job.correlation_id,
            state: &state,
        };
        let result = state
            .client
            .execute(&job, &observer, &state.run_token)
            .await;

        if let JobResult::Failure { kind, message, .. } = &result {
            tracing::warn!(correlation_id = %job.correlation_id, %kind, error = %message, "Job failed");
        }
        if result.is_auth_expired() {
            state
                .auth_expired
                .lock()
                .await
                .push(job.correlation_id.clone());
            if state.abort_on_auth_expired {
                tracing::warn!(correlation_id = %job.correlation_id, "Credentials expired, aborting batch");
                state.run_token.cancel();
            }
        }

        if let Err(e) = state.sink.record(&job, &result, &state.reporter).await {
            state.fail(e).await;
            break;
        }
    }
}

/// Forwards one job's notifications to the event channel and the run log
struct WorkerObserver<'a> {
    correlation_id: &'a CorrelationId,
    state: &'a RunState,
}

#[async_trait::async_trait]
impl AttemptObserver for WorkerObserver<'_> {
    async fn attempt_failed(&self, attempt: FailedAttempt<'_>) {
        self.state
            .reporter
            .attempt_failed(self.correlation_id, &attempt);

        let message = if attempt.will_retry {
            format!(
                "retrying {}, attempt {}/{} failed: {}",
                attempt.step, attempt.attempt, attempt.max_attempts, attempt.error
            )
        } else {
            format!(
                "{} attempt {}/{} failed: {}; giving up",
                attempt.step, attempt.attempt, attempt.max_attempts, attempt.error
            )
        };
        if let Err(e) = self.state.sink.log(self.correlation_id, &message).await {
            self.state.fail(e).await;
        }
    }
}

#[async_trait::async_trait]
impl JobObserver for WorkerObserver<'_> {
    async fn progress(&self, percent: f32) {
        self.state.reporter.job_progress(self.correlation_id, percent);
    }
}
