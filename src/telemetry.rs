//! Append-only JSONL telemetry sink: `OpenOptions::append` plus one JSON
//! object per line, so downstream tooling (cockpit, metrics aggregation) can
//! consume it without a bespoke parser.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

/// One telemetry event: an epoch identifier, an RFC3339 timestamp, a kind
/// tag, and an arbitrary JSON payload.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct TelemetryEvent {
    pub epoch: String,
    pub ts: String,
    pub kind: String,
    pub payload: Value,
}

pub struct TelemetrySink {
    path: PathBuf,
}

impl TelemetrySink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn record(&self, epoch: &str, kind: &str, payload: Value) -> Result<()> {
        self.append(&TelemetryEvent {
            epoch: epoch.to_string(),
            ts: Utc::now().to_rfc3339(),
            kind: kind.to_string(),
            payload,
        })
    }

    fn append(&self, event: &TelemetryEvent) -> Result<()> {
        let line = serde_json::to_string(event).context("failed to serialize telemetry event")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("failed to create telemetry directory")?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open telemetry file {}", self.path.display()))?;

        writeln!(file, "{line}").context("failed to write telemetry event")
    }

    /// Phase-started event, one of the common kinds the dispatch loop emits.
    pub fn phase_started(&self, epoch: &str, phase_id: &str) -> Result<()> {
        self.record(epoch, "phase_started", json!({ "phase_id": phase_id }))
    }

    pub fn phase_completed(&self, epoch: &str, phase_id: &str, success: bool, cost_usd: f64) -> Result<()> {
        self.record(
            epoch,
            "phase_completed",
            json!({ "phase_id": phase_id, "success": success, "cost_usd": cost_usd }),
        )
    }

    pub fn deadlock_escalated(&self, epoch: &str, blocked: &[String]) -> Result<()> {
        self.record(epoch, "deadlock_escalated", json!({ "blocked": blocked }))
    }

    /// Read every event currently on disk, in write order. Intended for
    /// tests and the `nebula status` verb, not the hot dispatch path.
    pub fn read_all(&self) -> Result<Vec<TelemetryEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read telemetry file {}", self.path.display()))?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("failed to parse telemetry line"))
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn records_one_json_line_per_event() {
        let dir = tempdir().unwrap();
        let sink = TelemetrySink::new(dir.path().join("telemetry.jsonl"));
        sink.phase_started("epoch-1", "01").unwrap();
        sink.phase_completed("epoch-1", "01", true, 0.42).unwrap();

        let content = fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.lines().next().unwrap().starts_with('{'));
    }

    #[test]
    fn read_all_parses_events_back_in_order() {
        let dir = tempdir().unwrap();
        let sink = TelemetrySink::new(dir.path().join("telemetry.jsonl"));
        sink.phase_started("epoch-1", "01").unwrap();
        sink.deadlock_escalated("epoch-1", &["02".to_string(), "03".to_string()]).unwrap();

        let events = sink.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "phase_started");
        assert_eq!(events[1].kind, "deadlock_escalated");
        assert_eq!(events[1].payload["blocked"][0], "02");
    }

    #[test]
    fn read_all_on_missing_file_returns_empty() {
        let dir = tempdir().unwrap();
        let sink = TelemetrySink::new(dir.path().join("nope.jsonl"));
        assert!(sink.read_all().unwrap().is_empty());
    }

    #[test]
    fn creates_parent_directory_on_first_write() {
        let dir = tempdir().unwrap();
        let sink = TelemetrySink::new(dir.path().join("nested/telemetry.jsonl"));
        sink.phase_started("epoch-1", "01").unwrap();
        assert!(sink.path().exists());
    }
}
