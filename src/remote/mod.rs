//! Simulation API access.
//!
//! - [`AlphaApi`] - the three-call asynchronous job protocol (submit, poll, fetch)
//! - [`http`] - production implementation over `reqwest`, plus sign-in and [`AuthContext`]
//! - [`client`] - [`RemoteJobClient`], which drives one job through the protocol with retries

pub mod client;
pub mod http;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_support;

pub use client::{JobObserver, RemoteJobClient};
pub use http::{AuthContext, HttpAlphaApi};

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::types::{JobSpec, Switch};

/// Instrument type sent with every simulation
pub const INSTRUMENT_TYPE: &str = "EQUITY";
/// Unit handling mode sent with every simulation
pub const UNIT_HANDLING: &str = "VERIFY";
/// Expression language sent with every simulation
pub const LANGUAGE: &str = "FASTEXPR";
/// Simulation type sent with every simulation
pub const SIMULATION_TYPE: &str = "REGULAR";

/// Opaque status resource returned by a submit call
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollHandle(pub String);

impl std::fmt::Display for PollHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of a submitted simulation
#[derive(Clone, Debug, PartialEq)]
pub enum PollStatus {
    /// Still running; `progress` is a fraction in [0, 1]
    Running {
        /// Fraction complete
        progress: f64,
    },
    /// Finished; the artifact can be fetched
    Done {
        /// Remote artifact id
        alpha_id: String,
    },
}

/// Abstraction over the simulation API, enabling testability.
#[async_trait::async_trait]
pub trait AlphaApi: Send + Sync {
    /// POST one simulation and return its status resource
    async fn submit(&self, job: &JobSpec) -> Result<PollHandle, ApiError>;

    /// GET the status resource once
    async fn poll(&self, handle: &PollHandle) -> Result<PollStatus, ApiError>;

    /// GET the finished artifact
    async fn fetch_alpha(&self, alpha_id: &str) -> Result<AlphaDetail, ApiError>;
}

/// Request body of a submit call
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationRequest<'a> {
    /// Simulation type, always [`SIMULATION_TYPE`]
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Simulation settings
    pub settings: SimulationSettings,
    /// The expression
    pub regular: &'a str,
}

/// Settings object of a submit call
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSettings {
    /// NaN handling switch
    pub nan_handling: Switch,
    /// Always [`INSTRUMENT_TYPE`]
    pub instrument_type: &'static str,
    /// Data delay
    pub delay: u8,
    /// Universe wire name
    pub universe: &'static str,
    /// Truncation
    pub truncation: f64,
    /// Always [`UNIT_HANDLING`]
    pub unit_handling: &'static str,
    /// Pasteurization switch
    pub pasteurization: Switch,
    /// Region wire name
    pub region: &'static str,
    /// Always [`LANGUAGE`]
    pub language: &'static str,
    /// Decay window
    pub decay: u32,
    /// Neutralization wire name
    pub neutralization: &'static str,
    /// Always false
    pub visualization: bool,
}

impl<'a> SimulationRequest<'a> {
    /// Build the submit body for a job
    pub fn from_job(job: &'a JobSpec) -> Self {
        Self {
            kind: SIMULATION_TYPE,
            settings: SimulationSettings {
                nan_handling: job.nan_handling,
                instrument_type: INSTRUMENT_TYPE,
                delay: job.delay,
                universe: job.universe.as_str(),
                truncation: job.truncation,
                unit_handling: UNIT_HANDLING,
                pasteurization: job.pasteurization,
                region: job.region.as_str(),
                language: LANGUAGE,
                decay: job.decay,
                neutralization: job.neutralization.as_str(),
                visualization: false,
            },
            regular: &job.code,
        }
    }
}

/// Body of a poll response
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct PollBody {
    #[serde(default)]
    pub(crate) alpha: Option<String>,
    #[serde(default)]
    pub(crate) progress: Option<f64>,
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

impl PollBody {
    /// Interpret a poll body: finished, running, or refused by the simulator
    pub(crate) fn into_status(self) -> Result<PollStatus, ApiError> {
        if let Some(alpha_id) = self.alpha {
            return Ok(PollStatus::Done { alpha_id });
        }
        if let Some(progress) = self.progress {
            return Ok(PollStatus::Running { progress });
        }
        match self.status.as_deref() {
            Some("ERROR") | Some("FAIL") => Err(ApiError::Rejected {
                status: 200,
                message: self
                    .message
                    .unwrap_or_else(|| "simulation reported an error".to_string()),
            }),
            Some(other) => Err(ApiError::MalformedResponse(format!(
                "poll status {other} without alpha or progress"
            ))),
            None => Err(ApiError::MalformedResponse(
                "poll response has neither alpha nor progress".to_string(),
            )),
        }
    }
}

/// Finished artifact as returned by the detail endpoint
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct AlphaDetail {
    /// In-sample statistics
    #[serde(rename = "is")]
    pub in_sample: InSample,
}

/// In-sample block of an artifact
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct InSample {
    /// Sharpe ratio (null for degenerate alphas)
    #[serde(default)]
    pub sharpe: Option<f64>,
    /// Fitness (null for degenerate alphas)
    #[serde(default)]
    pub fitness: Option<f64>,
    /// Turnover as a fraction
    #[serde(default)]
    pub turnover: Option<f64>,
    /// Submission checks
    #[serde(default)]
    pub checks: Vec<Check>,
}

/// One submission check of an artifact
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Check {
    /// Check name, e.g. `CONCENTRATED_WEIGHT`
    pub name: String,
    /// `PASS`, `FAIL`, `WARNING`, `PENDING`, ...
    pub result: String,
    /// Measured value, when the check reports one
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl Check {
    /// Whether the check passed
    pub fn passed(&self) -> bool {
        self.result == "PASS"
    }

    /// Numeric value, if present and numeric
    pub fn numeric_value(&self) -> Option<f64> {
        self.value.as_ref().and_then(serde_json::Value::as_f64)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Neutralization, Region, Universe};

    #[test]
    fn submit_body_matches_wire_contract() {
        let mut job = JobSpec::new("j1", "rank(-returns)");
        job.decay = 4;
        job.delay = 0;
        job.truncation = 0.05;
        job.neutralization = Neutralization::Market;
        job.region = Region::Usa;
        job.universe = Universe::Top500;
        job.nan_handling = Switch::On;

        let body = serde_json::to_value(SimulationRequest::from_job(&job)).unwrap();
        assert_eq!(body["type"], "REGULAR");
        assert_eq!(body["regular"], "rank(-returns)");
        let settings = &body["settings"];
        assert_eq!(settings["nanHandling"], "ON");
        assert_eq!(settings["instrumentType"], "EQUITY");
        assert_eq!(settings["delay"], 0);
        assert_eq!(settings["universe"], "TOP500");
        assert_eq!(settings["truncation"], 0.05);
        assert_eq!(settings["unitHandling"], "VERIFY");
        assert_eq!(settings["pasteurization"], "ON");
        assert_eq!(settings["region"], "USA");
        assert_eq!(settings["language"], "FASTEXPR");
        assert_eq!(settings["decay"], 4);
        assert_eq!(settings["neutralization"], "MARKET");
        assert_eq!(settings["visualization"], false);
    }

    #[test]
    fn poll_body_alpha_wins_over_progress() {
        let body: PollBody = serde_json::from_str(r#"{"alpha": "X", "progress": 0.9}"#).unwrap();
        assert_eq!(
            body.into_status().unwrap(),
            PollStatus::Done {
                alpha_id: "X".to_string()
            }
        );
    }

    #[test]
    fn poll_body_progress_is_running() {
        let body: PollBody = serde_json::from_str(r#"{"progress": 0.5}"#).unwrap();
        assert_eq!(
            body.into_status().unwrap(),
            PollStatus::Running { progress: 0.5 }
        );
    }

    #[test]
    fn poll_body_error_status_is_rejected() {
        let body: PollBody =
            serde_json::from_str(r#"{"status": "ERROR", "message": "unknown variable foo"}"#)
                .unwrap();
        match body.into_status() {
            Err(ApiError::Rejected { message, .. }) => assert_eq!(message, "unknown variable foo"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn poll_body_without_keys_is_malformed() {
        let body: PollBody = serde_json::from_str("{}").unwrap();
        assert!(matches!(
            body.into_status(),
            Err(ApiError::MalformedResponse(_))
        ));
    }

    #[test]
    fn alpha_detail_tolerates_nulls_and_missing_values() {
        let detail: AlphaDetail = serde_json::from_str(
            r#"{"id": "X", "is": {"sharpe": 1.2, "fitness": null, "turnover": 0.1234,
                "checks": [{"name": "A", "result": "PASS"},
                           {"name": "LOW_SUB_UNIVERSE_SHARPE", "result": "FAIL", "value": 0.4}]}}"#,
        )
        .unwrap();
        assert_eq!(detail.in_sample.sharpe, Some(1.2));
        assert_eq!(detail.in_sample.fitness, None);
        assert_eq!(detail.in_sample.checks.len(), 2);
        assert!(detail.in_sample.checks[0].passed());
        assert_eq!(detail.in_sample.checks[0].numeric_value(), None);
        assert_eq!(detail.in_sample.checks[1].numeric_value(), Some(0.4));
    }
}
