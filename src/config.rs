//! Configuration types for alpha-batch

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Simulation API endpoints and HTTP behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API root that serves `/simulations`, `/alphas/{id}` and `/authentication`
    /// (default: "https://api.worldquantbrain.com")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Web platform root used to build result links (default: "https://platform.worldquantbrain.com")
    #[serde(default = "default_platform_url")]
    pub platform_url: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            platform_url: default_platform_url(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Retry policy applied to every remote call, with a fixed backoff
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per call, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait between attempts (default: 15 seconds)
    #[serde(default = "default_backoff", with = "duration_serde")]
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
        }
    }
}

/// Status polling behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Wait between status polls of one job (default: 10 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
        }
    }
}

/// Where batch results are written
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving one CSV and one log file per batch run (default: "./output")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

/// Batch execution behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Number of jobs in flight at once (default: 3)
    ///
    /// The API enforces an undocumented per-credential rate limit; raising this mostly
    /// produces more 429 responses rather than more throughput.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Cancel the remaining batch when a job reports expired credentials (default: false)
    #[serde(default)]
    pub abort_on_auth_expired: bool,

    /// Capacity of the progress event channel (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            abort_on_auth_expired: false,
            event_buffer: default_event_buffer(),
        }
    }
}

/// Main configuration for the [`Orchestrator`](crate::Orchestrator)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// API endpoints and timeouts
    #[serde(default)]
    pub api: ApiConfig,

    /// Retry policy for remote calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Poll loop timing
    #[serde(default)]
    pub poll: PollConfig,

    /// Output location
    #[serde(default)]
    pub output: OutputConfig,

    /// Worker pool and batch policy
    #[serde(default)]
    pub batch: BatchConfig,
}

impl Config {
    /// Load a configuration from a JSON file, filling omitted fields with defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot reject on its own
    pub fn validate(&self) -> Result<()> {
        if self.batch.concurrency == 0 {
            return Err(Error::config("batch.concurrency", "must be at least 1"));
        }
        if self.batch.event_buffer == 0 {
            return Err(Error::config("batch.event_buffer", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts", "must be at least 1"));
        }
        url::Url::parse(&self.api.base_url)
            .map_err(|e| Error::config("api.base_url", format!("invalid URL: {e}")))?;
        url::Url::parse(&self.api.platform_url)
            .map_err(|e| Error::config("api.platform_url", format!("invalid URL: {e}")))?;
        Ok(())
    }
}

fn default_base_url() -> String {
    "https://api.worldquantbrain.com".to_string()
}

fn default_platform_url() -> String {
    "https://platform.worldquantbrain.com".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> Duration {
    Duration::from_secs(15)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_concurrency() -> usize {
    3
}

fn default_event_buffer() -> usize {
    1000
}

// Durations as fractional seconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
