//! Core types for alpha-batch: job parameters, job results, counters and events

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, FailureKind};

/// Client-assigned token mapping an asynchronous result back to its job
///
/// Unique within one batch run; completion order is unspecified, so every event and
/// every output row is attributed through this id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Create a new CorrelationId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Neutralization group applied to the alpha vector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Neutralization {
    /// No neutralization
    None,
    /// Market-wide
    Market,
    /// Per sector
    Sector,
    /// Per industry
    Industry,
    /// Per sub-industry
    #[default]
    Subindustry,
}

impl Neutralization {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Neutralization::None => "NONE",
            Neutralization::Market => "MARKET",
            Neutralization::Sector => "SECTOR",
            Neutralization::Industry => "INDUSTRY",
            Neutralization::Subindustry => "SUBINDUSTRY",
        }
    }
}

/// Market region the simulation runs in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    /// United States
    #[default]
    Usa,
    /// China
    Chn,
    /// Europe
    Eur,
    /// Asia
    Asi,
    /// Global
    Glb,
}

impl Region {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Usa => "USA",
            Region::Chn => "CHN",
            Region::Eur => "EUR",
            Region::Asi => "ASI",
            Region::Glb => "GLB",
        }
    }
}

/// Instrument universe the alpha trades
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Universe {
    /// Top 3000 by liquidity
    #[default]
    #[serde(rename = "TOP3000")]
    Top3000,
    /// Top 1000 by liquidity
    #[serde(rename = "TOP1000")]
    Top1000,
    /// Top 500 by liquidity
    #[serde(rename = "TOP500")]
    Top500,
    /// Top 200 by liquidity
    #[serde(rename = "TOP200")]
    Top200,
    /// S&P 500 constituents
    #[serde(rename = "TOPSP500")]
    TopSp500,
    /// Minimum 1M daily volume
    #[serde(rename = "MINVOL1M")]
    MinVol1M,
    /// Illiquid names with minimum 1M daily volume
    #[serde(rename = "ILLIQUID_MINVOL1M")]
    IlliquidMinVol1M,
}

impl Universe {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Universe::Top3000 => "TOP3000",
            Universe::Top1000 => "TOP1000",
            Universe::Top500 => "TOP500",
            Universe::Top200 => "TOP200",
            Universe::TopSp500 => "TOPSP500",
            Universe::MinVol1M => "MINVOL1M",
            Universe::IlliquidMinVol1M => "ILLIQUID_MINVOL1M",
        }
    }
}

/// ON/OFF simulation switch (pasteurization, NaN handling)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Switch {
    /// Enabled
    On,
    /// Disabled
    Off,
}

impl Switch {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Switch::On => "ON",
            Switch::Off => "OFF",
        }
    }
}

/// Delays accepted by the simulator
pub const ALLOWED_DELAYS: [u8; 2] = [0, 1];

/// Upper bound for truncation
pub const MAX_TRUNCATION: f64 = 0.5;

/// One simulation request
///
/// Immutable once handed to a [`BatchRun`](crate::orchestrator::BatchRun).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Client-assigned id, unique within the batch
    pub correlation_id: CorrelationId,
    /// Alpha expression
    pub code: String,
    /// Linear decay window in days
    pub decay: u32,
    /// Data delay, one of [`ALLOWED_DELAYS`]
    pub delay: u8,
    /// Neutralization group
    pub neutralization: Neutralization,
    /// Market region
    pub region: Region,
    /// Maximum weight per instrument, in [0, 0.5]
    pub truncation: f64,
    /// Instrument universe
    pub universe: Universe,
    /// Pasteurization switch
    pub pasteurization: Switch,
    /// NaN handling switch
    pub nan_handling: Switch,
}

impl JobSpec {
    /// Create a job with the platform's usual default settings
    pub fn new(correlation_id: impl Into<CorrelationId>, code: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            code: code.into(),
            decay: 0,
            delay: 1,
            neutralization: Neutralization::default(),
            region: Region::default(),
            truncation: 0.08,
            universe: Universe::default(),
            pasteurization: Switch::On,
            nan_handling: Switch::Off,
        }
    }

    /// Reject parameter combinations the simulator would refuse
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |reason: String| Error::InvalidJob {
            correlation_id: self.correlation_id.to_string(),
            reason,
        };

        if self.code.trim().is_empty() {
            return Err(invalid("code must not be empty".to_string()));
        }
        if !ALLOWED_DELAYS.contains(&self.delay) {
            return Err(invalid(format!(
                "delay {} not in {:?}",
                self.delay, ALLOWED_DELAYS
            )));
        }
        if !(0.0..=MAX_TRUNCATION).contains(&self.truncation) {
            return Err(invalid(format!(
                "truncation {} outside [0, {}]",
                self.truncation, MAX_TRUNCATION
            )));
        }
        Ok(())
    }
}

/// Metrics of a finished simulation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlphaMetrics {
    /// Remote artifact id
    pub alpha_id: String,
    /// Number of checks reporting PASS
    pub pass_count: u32,
    /// In-sample sharpe
    pub sharpe: f64,
    /// In-sample fitness
    pub fitness: f64,
    /// In-sample turnover as a percentage, rounded to 2 decimals
    pub turnover: f64,
    /// Whether the concentrated-weight check passed
    pub weight_check: bool,
    /// Value reported by the sub-universe sharpe check, when it carries one
    pub sub_sharpe: Option<f64>,
    /// Whether the sub-universe sharpe check passed
    pub sub_sharpe_passed: bool,
    /// Self-correlation, not computed by the simulator at this stage
    pub correlation: Option<f64>,
    /// Link to the result on the web platform
    pub link: String,
    /// The simulated expression
    pub code: String,
}

/// Terminal outcome of one job
///
/// Every job in a batch ends in exactly one of these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobResult {
    /// Simulation finished and its metrics were fetched
    Success {
        /// Job the result belongs to
        correlation_id: CorrelationId,
        /// Fetched metrics
        metrics: AlphaMetrics,
    },
    /// The job could not be completed
    Failure {
        /// Job the result belongs to
        correlation_id: CorrelationId,
        /// Failure classification
        kind: FailureKind,
        /// Human-readable cause
        message: String,
    },
    /// The batch was cancelled before this job finished
    Cancelled {
        /// Job the result belongs to
        correlation_id: CorrelationId,
    },
}

impl JobResult {
    /// Correlation id of the originating job
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            JobResult::Success { correlation_id, .. }
            | JobResult::Failure { correlation_id, .. }
            | JobResult::Cancelled { correlation_id } => correlation_id,
        }
    }

    /// True for a failure caused by rejected credentials
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            JobResult::Failure {
                kind: FailureKind::AuthExpired,
                ..
            }
        )
    }
}

/// Protocol step a remote call belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// POST the simulation
    Submit,
    /// GET the status resource
    Poll,
    /// GET the finished alpha
    Fetch,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Step::Submit => "submit",
            Step::Poll => "poll",
            Step::Fetch => "fetch",
        })
    }
}

/// Per-batch outcome counters
///
/// At the end of every run `completed + failed + cancelled + unwritten == submitted`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounters {
    /// Jobs in the batch
    pub submitted: usize,
    /// Jobs that finished with metrics
    pub completed: usize,
    /// Jobs that finished with a failure
    pub failed: usize,
    /// Jobs that ended cancelled, started or not
    pub cancelled: usize,
    /// Jobs that finished but whose result could not be written to the output
    #[serde(default)]
    pub unwritten: usize,
}

impl BatchCounters {
    /// Jobs that reached success or failure, written or not
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.unwritten
    }

    /// Whether every submitted job is accounted for
    pub fn is_balanced(&self) -> bool {
        self.finished() + self.cancelled == self.submitted
    }
}

/// Summary returned by [`Orchestrator::run`](crate::Orchestrator::run)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// When the run started; also names the output files
    pub started_at: DateTime<Local>,
    /// Final counters
    pub counters: BatchCounters,
    /// CSV file holding one row per finished job
    pub csv_path: PathBuf,
    /// Free-text log of the run
    pub log_path: PathBuf,
    /// Whether the run was cut short by cancellation
    pub was_cancelled: bool,
    /// Jobs that failed with expired credentials
    pub auth_expired: Vec<CorrelationId>,
}

/// Event emitted while a batch runs
///
/// Per job, `JobStarted` always precedes the job's terminal event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A worker claimed the job and is about to submit it
    JobStarted {
        /// Job id
        correlation_id: CorrelationId,
    },

    /// Simulation progress of one job
    JobProgress {
        /// Job id
        correlation_id: CorrelationId,
        /// Progress percentage (0.0 to 100.0)
        percent: f32,
    },

    /// A remote call attempt failed with a retryable error
    AttemptFailed {
        /// Job id
        correlation_id: CorrelationId,
        /// Protocol step of the failed call
        step: Step,
        /// Attempt number, starting at 1
        attempt: u32,
        /// Attempt budget for the call
        max_attempts: u32,
        /// Error message
        error: String,
        /// Whether another attempt follows after the backoff
        will_retry: bool,
    },

    /// Job finished with metrics
    JobCompleted {
        /// Job id
        correlation_id: CorrelationId,
        /// Remote artifact id
        alpha_id: String,
        /// In-sample sharpe
        sharpe: f64,
        /// In-sample fitness
        fitness: f64,
    },

    /// Job finished with a failure
    JobFailed {
        /// Job id
        correlation_id: CorrelationId,
        /// Failure classification
        kind: FailureKind,
        /// Human-readable cause
        error: String,
    },

    /// Job ended by cancellation (started or never claimed)
    JobCancelled {
        /// Job id
        correlation_id: CorrelationId,
    },

    /// Aggregate progress after each finished job
    BatchProgress {
        /// Successes plus failures so far
        completed: usize,
        /// Jobs in the batch
        total: usize,
    },

    /// Fatal batch-level failure; the run is aborting
    BatchFailed {
        /// Error message
        error: String,
    },

    /// Emitted exactly once per run, after all workers exited and output was flushed
    Finished {
        /// Final counters
        counters: BatchCounters,
        /// Whether the run was cut short by cancellation
        cancelled: bool,
    },
}
