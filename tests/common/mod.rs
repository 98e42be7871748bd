//! Common helpers for the HTTP batch tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alpha_batch::{AuthContext, Config, Event, HttpAlphaApi, Orchestrator};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast;

pub const PLATFORM_URL: &str = "https://platform.test";

/// Config pointing at a mock server, with millisecond retry and poll timings
pub fn test_config(server_uri: &str, output: &TempDir) -> Config {
    let mut config = Config::default();
    config.api.base_url = server_uri.to_string();
    config.api.platform_url = PLATFORM_URL.to_string();
    config.api.request_timeout = Duration::from_secs(5);
    config.retry.backoff = Duration::from_millis(20);
    config.poll.interval = Duration::from_millis(20);
    config.output.output_dir = output.path().to_path_buf();
    config
}

pub fn http_orchestrator(config: Config) -> Orchestrator {
    let api = HttpAlphaApi::new(&config.api, AuthContext::from_cookie("t", "test-session"))
        .expect("client should build");
    Orchestrator::new(Arc::new(api), config).expect("config should validate")
}

/// Alpha detail body in the shape the service returns
pub fn alpha_body(sharpe: f64, checks: serde_json::Value) -> serde_json::Value {
    json!({
        "id": "ignored",
        "is": {
            "sharpe": sharpe,
            "fitness": 0.9,
            "turnover": 0.1,
            "checks": checks,
        }
    })
}

/// CSV data rows split into fields (header skipped)
pub fn csv_rows(path: &Path) -> Vec<Vec<String>> {
    let content = std::fs::read_to_string(path).expect("csv should exist");
    let mut lines = content.lines();
    if let Some(header) = lines.next() {
        assert!(header.starts_with("pass_count,delay,region"), "{header}");
    }
    lines
        .map(|l| l.split(',').map(str::to_string).collect())
        .collect()
}

pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
