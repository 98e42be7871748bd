//! Scripted in-memory API and observers shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::{AlphaApi, AlphaDetail, Check, InSample, JobObserver, PollHandle, PollStatus};
use crate::config::Config;
use crate::error::ApiError;
use crate::retry::{AttemptObserver, FailedAttempt};
use crate::types::{CorrelationId, JobSpec, Step};

/// Config with millisecond timings
pub(crate) fn fast_config() -> Config {
    let mut config = Config::default();
    config.retry.backoff = Duration::from_millis(10);
    config.poll.interval = Duration::from_millis(10);
    config.api.platform_url = "https://platform.test".to_string();
    config
}

/// Artifact with the given sharpe and checks
pub(crate) fn detail_with(sharpe: f64, checks: Vec<Check>) -> AlphaDetail {
    AlphaDetail {
        in_sample: InSample {
            sharpe: Some(sharpe),
            fitness: Some(0.8),
            turnover: Some(0.25),
            checks,
        },
    }
}

/// [`AlphaApi`] that replays queued responses and falls back to an instant success.
///
/// Queued responses are consumed in call order across all jobs. Per-job submit errors
/// registered with [`ScriptedApi::fail_submit_for`] apply to every attempt of that job.
#[derive(Default)]
pub(crate) struct ScriptedApi {
    submits: Mutex<VecDeque<Result<PollHandle, ApiError>>>,
    polls: Mutex<VecDeque<Result<PollStatus, ApiError>>>,
    fetches: Mutex<VecDeque<Result<AlphaDetail, ApiError>>>,
    submit_errors: Mutex<HashMap<CorrelationId, ApiError>>,
    running_forever: bool,
    latency: Duration,
    submit_calls: AtomicU32,
    poll_calls: AtomicU32,
    fetch_calls: AtomicU32,
    submitted: Mutex<Vec<CorrelationId>>,
    polled: Mutex<Vec<PollHandle>>,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

impl ScriptedApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every poll reports the job still running
    pub(crate) fn running_forever(mut self) -> Self {
        self.running_forever = true;
        self
    }

    /// Every call takes `latency` before answering
    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn push_submit(&self, response: Result<PollHandle, ApiError>) {
        self.submits.lock().unwrap().push_back(response);
    }

    pub(crate) fn push_poll(&self, response: Result<PollStatus, ApiError>) {
        self.polls.lock().unwrap().push_back(response);
    }

    pub(crate) fn push_fetch(&self, response: Result<AlphaDetail, ApiError>) {
        self.fetches.lock().unwrap().push_back(response);
    }

    pub(crate) fn fail_submit_for(&self, id: impl Into<CorrelationId>, error: ApiError) {
        self.submit_errors.lock().unwrap().insert(id.into(), error);
    }

    pub(crate) fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn poll_calls(&self) -> u32 {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Correlation ids that reached the submit endpoint, in call order
    pub(crate) fn submitted(&self) -> Vec<CorrelationId> {
        self.submitted.lock().unwrap().clone()
    }

    pub(crate) fn polled_handles(&self) -> Vec<PollHandle> {
        self.polled.lock().unwrap().clone()
    }

    /// Highest number of submit calls seen running at once
    pub(crate) fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait::async_trait]
impl AlphaApi for ScriptedApi {
    async fn submit(&self, job: &JobSpec) -> Result<PollHandle, ApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submitted
            .lock()
            .unwrap()
            .push(job.correlation_id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.delay().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted_error = self
            .submit_errors
            .lock()
            .unwrap()
            .get(&job.correlation_id)
            .cloned();
        if let Some(error) = scripted_error {
            return Err(error);
        }
        let queued = self.submits.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            Ok(PollHandle(format!(
                "https://api.test/simulations/{}",
                job.correlation_id
            )))
        })
    }

    async fn poll(&self, handle: &PollHandle) -> Result<PollStatus, ApiError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.polled.lock().unwrap().push(handle.clone());
        self.delay().await;

        if self.running_forever {
            return Ok(PollStatus::Running { progress: 0.3 });
        }
        let queued = self.polls.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            let tail = handle.0.rsplit('/').next().unwrap_or_default();
            Ok(PollStatus::Done {
                alpha_id: format!("alpha-{tail}"),
            })
        })
    }

    async fn fetch_alpha(&self, _alpha_id: &str) -> Result<AlphaDetail, ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        let queued = self.fetches.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            Ok(detail_with(
                1.0,
                vec![Check {
                    name: "LOW_SHARPE".to_string(),
                    result: "PASS".to_string(),
                    value: None,
                }],
            ))
        })
    }
}

/// [`JobObserver`] that records everything it is told
#[derive(Default)]
pub(crate) struct RecordingJobObserver {
    percents: Mutex<Vec<f32>>,
    attempts: Mutex<Vec<(Step, u32, bool)>>,
}

impl RecordingJobObserver {
    pub(crate) fn percents(&self) -> Vec<f32> {
        self.percents.lock().unwrap().clone()
    }

    pub(crate) fn attempts(&self) -> Vec<(Step, u32, bool)> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AttemptObserver for RecordingJobObserver {
    async fn attempt_failed(&self, attempt: FailedAttempt<'_>) {
        self.attempts
            .lock()
            .unwrap()
            .push((attempt.step, attempt.attempt, attempt.will_retry));
    }
}

#[async_trait::async_trait]
impl JobObserver for RecordingJobObserver {
    async fn progress(&self, percent: f32) {
        self.percents.lock().unwrap().push(percent);
    }
}
