//! Durable output for one batch run: a CSV of finished jobs and a free-text log.
//!
//! Results arrive out of order from several workers. [`ResultSink`] serialises them
//! behind one async mutex, so rows land in completion order, the header is written
//! exactly once (right before the first row), and the batch counters move in step with
//! the rows on disk.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::progress::ProgressReporter;
use crate::types::{AlphaMetrics, BatchCounters, CorrelationId, JobResult, JobSpec};

/// CSV columns, in order
pub const CSV_HEADER: [&str; 15] = [
    "pass_count",
    "delay",
    "region",
    "neutralization",
    "decay",
    "truncation",
    "sharpe",
    "fitness",
    "turnover",
    "weight_check",
    "sub_sharpe",
    "correlation",
    "universe",
    "link",
    "code",
];

/// Marker written for failed checks and in failure rows
pub const FAIL_MARKER: &str = "FAIL";
/// Marker written for passed checks
pub const PASS_MARKER: &str = "PASS";
/// Highest numeric suffix tried when a run's file names are taken
const MAX_STEM_SUFFIX: usize = 1000;

/// Correlation column placeholder; self-correlation is computed later by the UI
pub const CORRELATION_PLACEHOLDER: &str = "N/A";

struct SinkState {
    csv: File,
    log: File,
    header_written: bool,
    rows: usize,
    counters: BatchCounters,
}

/// Append-only CSV + log pair owned by exactly one batch run
pub struct ResultSink {
    csv_path: PathBuf,
    log_path: PathBuf,
    state: Mutex<SinkState>,
}

impl ResultSink {
    /// Create `<stem>.csv` and `<stem>.log` inside `output_dir`
    ///
    /// Existing files are never reused: when either name is taken, the stem gets a
    /// `_1`, `_2`, ... suffix until a free pair is found.
    pub async fn create(output_dir: &Path, stem: &str, total: usize) -> Result<Self> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| Error::Sink {
                path: output_dir.to_path_buf(),
                source,
            })?;

        for suffix in 0..=MAX_STEM_SUFFIX {
            let name = match suffix {
                0 => stem.to_string(),
                n => format!("{stem}_{n}"),
            };
            let csv_path = output_dir.join(format!("{name}.csv"));
            let log_path = output_dir.join(format!("{name}.log"));

            let Some(csv) = create_new(&csv_path).await? else {
                continue;
            };
            let Some(log) = create_new(&log_path).await? else {
                drop(csv);
                tokio::fs::remove_file(&csv_path)
                    .await
                    .map_err(|source| Error::Sink {
                        path: csv_path.clone(),
                        source,
                    })?;
                continue;
            };

            let sink = Self::from_files(csv_path, csv, log_path, log, total);
            sink.log_batch(&format!("batch started: {total} jobs")).await?;
            return Ok(sink);
        }

        Err(Error::Sink {
            path: output_dir.join(format!("{stem}.csv")),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("no free output name after {MAX_STEM_SUFFIX} suffixes"),
            ),
        })
    }

    pub(crate) fn from_files(
        csv_path: PathBuf,
        csv: File,
        log_path: PathBuf,
        log: File,
        total: usize,
    ) -> Self {
        Self {
            csv_path,
            log_path,
            state: Mutex::new(SinkState {
                csv,
                log,
                header_written: false,
                rows: 0,
                counters: BatchCounters {
                    submitted: total,
                    ..Default::default()
                },
            }),
        }
    }

    /// Path of the CSV file
    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    /// Path of the log file
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Current counters
    pub async fn counters(&self) -> BatchCounters {
        self.state.lock().await.counters
    }

    /// Persist one job result and publish it
    ///
    /// Successes and failures become a CSV row plus a log line; cancellations only a log
    /// line. The job's terminal event and the aggregate progress event are emitted while
    /// the lock is held, so subscribers see counters in the same order as the file.
    ///
    /// A write error is returned, but the job is still counted (as `unwritten` when its
    /// row is missing) and its terminal event still goes out.
    pub async fn record(
        &self,
        job: &JobSpec,
        result: &JobResult,
        reporter: &ProgressReporter,
    ) -> Result<BatchCounters> {
        let mut state = self.state.lock().await;

        let written = match result {
            JobResult::Success { metrics, .. } => self
                .write_row(&mut state, &success_row(job, metrics))
                .await
                .map(|rows| {
                    format!(
                        "row {rows} <- completed: alpha {} sharpe {} fitness {}",
                        metrics.alpha_id, metrics.sharpe, metrics.fitness
                    )
                }),
            JobResult::Failure { kind, message, .. } => self
                .write_row(&mut state, &failure_row(job))
                .await
                .map(|rows| format!("row {rows} <- failed ({kind}): {message}")),
            JobResult::Cancelled { .. } => Ok("cancelled".to_string()),
        };

        let outcome = match written {
            Ok(log_message) => {
                match result {
                    JobResult::Success { .. } => state.counters.completed += 1,
                    JobResult::Failure { .. } => state.counters.failed += 1,
                    JobResult::Cancelled { .. } => state.counters.cancelled += 1,
                }
                let line = log_line(Some(result.correlation_id()), &log_message);
                write_all(&mut state.log, &self.log_path, line.as_bytes()).await
            }
            Err(e) => {
                state.counters.unwritten += 1;
                Err(e)
            }
        };

        reporter.job_finished(result);
        reporter.batch_progress(&state.counters);
        outcome.map(|()| state.counters)
    }

    /// Append a free-text line attributed to one job
    pub async fn log(&self, correlation_id: &CorrelationId, message: &str) -> Result<()> {
        let line = log_line(Some(correlation_id), message);
        let mut state = self.state.lock().await;
        write_all(&mut state.log, &self.log_path, line.as_bytes()).await
    }

    /// Append a free-text line about the whole batch
    pub async fn log_batch(&self, message: &str) -> Result<()> {
        let line = log_line(None, message);
        let mut state = self.state.lock().await;
        write_all(&mut state.log, &self.log_path, line.as_bytes()).await
    }

    /// Flush both files to disk
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        sync(&mut state.csv, &self.csv_path).await?;
        sync(&mut state.log, &self.log_path).await
    }

    /// Append one row, header first if needed; returns the row number
    async fn write_row(&self, state: &mut SinkState, row: &[String]) -> Result<usize> {
        let mut buf = String::new();
        if !state.header_written {
            buf.push_str(&CSV_HEADER.join(","));
            buf.push('\n');
        }
        let fields: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
        buf.push_str(&fields.join(","));
        buf.push('\n');

        write_all(&mut state.csv, &self.csv_path, buf.as_bytes()).await?;
        state.header_written = true;
        state.rows += 1;
        Ok(state.rows)
    }
}

/// Base name of a run's output files, from its start time
pub fn run_file_stem(started_at: DateTime<Local>) -> String {
    started_at.format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Open `path` only if it does not exist yet; `None` when it does
async fn create_new(path: &Path) -> Result<Option<File>> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(source) => Err(Error::Sink {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn write_all(file: &mut File, path: &Path, bytes: &[u8]) -> Result<()> {
    let to_sink_error = |source| Error::Sink {
        path: path.to_path_buf(),
        source,
    };
    file.write_all(bytes).await.map_err(to_sink_error)?;
    file.flush().await.map_err(to_sink_error)
}

async fn sync(file: &mut File, path: &Path) -> Result<()> {
    file.flush().await.map_err(|source| Error::Sink {
        path: path.to_path_buf(),
        source,
    })?;
    file.sync_data().await.map_err(|source| Error::Sink {
        path: path.to_path_buf(),
        source,
    })
}

fn log_line(correlation_id: Option<&CorrelationId>, message: &str) -> String {
    let now = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    match correlation_id {
        Some(id) => format!("{now} [{id}] {message}\n"),
        None => format!("{now} {message}\n"),
    }
}

fn settings_fields(job: &JobSpec) -> [String; 5] {
    [
        job.delay.to_string(),
        job.region.as_str().to_string(),
        job.neutralization.as_str().to_string(),
        job.decay.to_string(),
        job.truncation.to_string(),
    ]
}

fn marker(passed: bool) -> &'static str {
    if passed { PASS_MARKER } else { FAIL_MARKER }
}

fn success_row(job: &JobSpec, metrics: &AlphaMetrics) -> Vec<String> {
    let [delay, region, neutralization, decay, truncation] = settings_fields(job);
    let sub_sharpe = match metrics.sub_sharpe {
        Some(value) => value.to_string(),
        None => marker(metrics.sub_sharpe_passed).to_string(),
    };
    let correlation = metrics
        .correlation
        .map(|c| c.to_string())
        .unwrap_or_else(|| CORRELATION_PLACEHOLDER.to_string());

    vec![
        metrics.pass_count.to_string(),
        delay,
        region,
        neutralization,
        decay,
        truncation,
        metrics.sharpe.to_string(),
        metrics.fitness.to_string(),
        format!("{:.2}", metrics.turnover),
        marker(metrics.weight_check).to_string(),
        sub_sharpe,
        correlation,
        job.universe.as_str().to_string(),
        metrics.link.clone(),
        metrics.code.clone(),
    ]
}

/// Sentinel row for a failed job: zero metrics, FAIL markers, settings preserved
fn failure_row(job: &JobSpec) -> Vec<String> {
    let [delay, region, neutralization, decay, truncation] = settings_fields(job);
    vec![
        "0".to_string(),
        delay,
        region,
        neutralization,
        decay,
        truncation,
        "0".to_string(),
        "0".to_string(),
        "0.00".to_string(),
        FAIL_MARKER.to_string(),
        FAIL_MARKER.to_string(),
        CORRELATION_PLACEHOLDER.to_string(),
        job.universe.as_str().to_string(),
        FAIL_MARKER.to_string(),
        job.code.clone(),
    ]
}

/// Quote a field when it contains a delimiter, quote or line break
pub(crate) fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
