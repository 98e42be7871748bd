//! Progress events for the consuming UI.
//!
//! [`ProgressReporter`] is a thin wrapper over a `tokio::sync::broadcast` channel. It
//! keeps no state of its own; subscribers own all rendering. Events are delivered in
//! send order, so a job's `JobStarted` always reaches a subscriber before the job's
//! terminal event.

use tokio::sync::broadcast;

use crate::error::Error;
use crate::retry::FailedAttempt;
use crate::types::{BatchCounters, CorrelationId, Event, JobResult};

/// Event emission surface shared by workers and the result sink
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    event_tx: broadcast::Sender<Event>,
}

impl ProgressReporter {
    /// Create a reporter buffering up to `capacity` events per lagging subscriber
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _rx) = broadcast::channel(capacity.max(1));
        Self { event_tx }
    }

    /// Subscribe to events
    ///
    /// Multiple subscribers are supported. A subscriber that falls more than the
    /// channel capacity behind receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// With no subscribers the event is dropped; the batch does not depend on anyone
    /// listening.
    pub fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// A worker claimed the job
    pub fn job_started(&self, correlation_id: &CorrelationId) {
        self.emit(Event::JobStarted {
            correlation_id: correlation_id.clone(),
        });
    }

    /// Per-job percentage
    pub fn job_progress(&self, correlation_id: &CorrelationId, percent: f32) {
        self.emit(Event::JobProgress {
            correlation_id: correlation_id.clone(),
            percent: percent.clamp(0.0, 100.0),
        });
    }

    /// A remote call attempt failed
    pub fn attempt_failed(&self, correlation_id: &CorrelationId, attempt: &FailedAttempt<'_>) {
        self.emit(Event::AttemptFailed {
            correlation_id: correlation_id.clone(),
            step: attempt.step,
            attempt: attempt.attempt,
            max_attempts: attempt.max_attempts,
            error: attempt.error.to_string(),
            will_retry: attempt.will_retry,
        });
    }

    /// Terminal state of a job
    pub fn job_finished(&self, result: &JobResult) {
        let event = match result {
            JobResult::Success {
                correlation_id,
                metrics,
            } => Event::JobCompleted {
                correlation_id: correlation_id.clone(),
                alpha_id: metrics.alpha_id.clone(),
                sharpe: metrics.sharpe,
                fitness: metrics.fitness,
            },
            JobResult::Failure {
                correlation_id,
                kind,
                message,
            } => Event::JobFailed {
                correlation_id: correlation_id.clone(),
                kind: *kind,
                error: message.clone(),
            },
            JobResult::Cancelled { correlation_id } => Event::JobCancelled {
                correlation_id: correlation_id.clone(),
            },
        };
        self.emit(event);
    }

    /// Aggregate "completed / total", where completed counts successes and failures
    pub fn batch_progress(&self, counters: &BatchCounters) {
        self.emit(Event::BatchProgress {
            completed: counters.finished(),
            total: counters.submitted,
        });
    }

    /// Fatal batch error
    pub fn batch_failed(&self, error: &Error) {
        self.emit(Event::BatchFailed {
            error: error.to_string(),
        });
    }

    /// Run finished; emitted once per run
    pub fn finished(&self, counters: BatchCounters, cancelled: bool) {
        self.emit(Event::Finished {
            counters,
            cancelled,
        });
    }
}
