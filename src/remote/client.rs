//! Drives one job through submit, poll and fetch.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{AlphaApi, AlphaDetail, PollStatus};
use crate::config::Config;
use crate::error::FailureKind;
use crate::retry::{AttemptObserver, CallFailure, RateLimitedTransport, sleep_or_cancel};
use crate::types::{AlphaMetrics, JobResult, JobSpec, Step};

/// Check whose result feeds the weight column
pub const WEIGHT_CHECK: &str = "CONCENTRATED_WEIGHT";
/// Check whose value feeds the sub-universe sharpe column
pub const SUB_SHARPE_CHECK: &str = "LOW_SUB_UNIVERSE_SHARPE";

/// Receives per-job notifications while a job runs
#[async_trait::async_trait]
pub trait JobObserver: AttemptObserver {
    /// Simulation progress as a percentage (0.0 to 100.0)
    async fn progress(&self, percent: f32);
}

/// Runs the three-step protocol for single jobs
///
/// Each step has its own retry budget; a job is never restarted from an earlier step.
#[derive(Clone)]
pub struct RemoteJobClient {
    api: Arc<dyn AlphaApi>,
    transport: RateLimitedTransport,
    poll_interval: Duration,
    platform_url: String,
}

impl RemoteJobClient {
    /// Create a client over any [`AlphaApi`] implementation
    pub fn new(api: Arc<dyn AlphaApi>, config: &Config) -> Self {
        Self {
            api,
            transport: RateLimitedTransport::new(&config.retry),
            poll_interval: config.poll.interval,
            platform_url: config.api.platform_url.trim_end_matches('/').to_string(),
        }
    }

    /// Execute one job to its terminal result
    ///
    /// Never returns an error: every failure and cancellation is folded into the
    /// returned [`JobResult`].
    pub async fn execute(
        &self,
        job: &JobSpec,
        observer: &dyn JobObserver,
        cancel: &CancellationToken,
    ) -> JobResult {
        let id = &job.correlation_id;

        let handle = match self
            .transport
            .call(Step::Submit, cancel, observer, || self.api.submit(job))
            .await
        {
            Ok(handle) => handle,
            Err(failure) => return self.failed(job, Step::Submit, failure),
        };

        let alpha_id = loop {
            match self
                .transport
                .call(Step::Poll, cancel, observer, || self.api.poll(&handle))
                .await
            {
                Ok(PollStatus::Done { alpha_id }) => break alpha_id,
                Ok(PollStatus::Running { progress }) => {
                    let percent = (progress.clamp(0.0, 1.0) * 100.0) as f32;
                    tracing::debug!(correlation_id = %id, percent, "Simulation running");
                    observer.progress(percent).await;
                    if !sleep_or_cancel(self.poll_interval, cancel).await {
                        return JobResult::Cancelled {
                            correlation_id: id.clone(),
                        };
                    }
                }
                Err(failure) => return self.failed(job, Step::Poll, failure),
            }
        };

        let detail = match self
            .transport
            .call(Step::Fetch, cancel, observer, || self.api.fetch_alpha(&alpha_id))
            .await
        {
            Ok(detail) => detail,
            Err(failure) => return self.failed(job, Step::Fetch, failure),
        };

        let metrics = build_metrics(&alpha_id, &detail, &job.code, &self.platform_url);
        observer.progress(100.0).await;
        tracing::info!(
            correlation_id = %id,
            alpha_id = %alpha_id,
            sharpe = metrics.sharpe,
            fitness = metrics.fitness,
            "Simulation finished"
        );

        JobResult::Success {
            correlation_id: id.clone(),
            metrics,
        }
    }

    fn failed(&self, job: &JobSpec, step: Step, failure: CallFailure) -> JobResult {
        let correlation_id = job.correlation_id.clone();
        match failure {
            CallFailure::Cancelled => {
                tracing::info!(correlation_id = %correlation_id, %step, "Job cancelled");
                JobResult::Cancelled { correlation_id }
            }
            CallFailure::RetryExhausted {
                attempts,
                last_error,
            } => JobResult::Failure {
                correlation_id,
                kind: FailureKind::RetryExhausted,
                message: format!("{step} failed after {attempts} attempts: {last_error}"),
            },
            CallFailure::Fatal(e) => JobResult::Failure {
                correlation_id,
                kind: e.kind(),
                message: format!("{step} failed: {e}"),
            },
        }
    }
}

/// Translate an artifact into result metrics
pub fn build_metrics(
    alpha_id: &str,
    detail: &AlphaDetail,
    code: &str,
    platform_url: &str,
) -> AlphaMetrics {
    let checks = &detail.in_sample.checks;
    let pass_count = checks.iter().filter(|c| c.passed()).count() as u32;

    let weight_check = checks
        .iter()
        .find(|c| c.name == WEIGHT_CHECK)
        .is_some_and(|c| c.passed());
    let sub_sharpe = checks.iter().find(|c| c.name == SUB_SHARPE_CHECK);

    AlphaMetrics {
        alpha_id: alpha_id.to_string(),
        pass_count,
        sharpe: detail.in_sample.sharpe.unwrap_or(0.0),
        fitness: detail.in_sample.fitness.unwrap_or(0.0),
        turnover: round2(detail.in_sample.turnover.unwrap_or(0.0) * 100.0),
        weight_check,
        sub_sharpe: sub_sharpe.and_then(|c| c.numeric_value()),
        sub_sharpe_passed: sub_sharpe.is_some_and(|c| c.passed()),
        correlation: None,
        link: format!("{platform_url}/alpha/{alpha_id}"),
        code: code.to_string(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
