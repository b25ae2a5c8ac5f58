//! Persisted row types for the fabric coordination store.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parse a timestamp that may use either the `T`-separated RFC3339 form or
/// the space-separated form some tools emit. Always round-trips to the
/// `T`-separated form via [`format_timestamp`].
pub fn parse_flexible_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let normalized = raw.replacen(' ', "T", 1);
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Ready,
    Scanning,
    Running,
    Blocked,
    HumanDecision,
    Done,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PhaseStatus::Done | PhaseStatus::Failed | PhaseStatus::Skipped)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub satisfaction: Option<f64>,
    pub risk: Option<String>,
    pub needs_human_review: bool,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase_id: String,
    pub status: PhaseStatus,
    pub bead_id: Option<String>,
    pub cycles_used: u32,
    pub cost_usd: f64,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub wave_number: Option<u32>,
    pub report: PhaseReport,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntanglementKind {
    Type,
    Function,
    Method,
    Interface,
    Package,
    File,
}

impl EntanglementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntanglementKind::Type => "type",
            EntanglementKind::Function => "function",
            EntanglementKind::Method => "method",
            EntanglementKind::Interface => "interface",
            EntanglementKind::Package => "package",
            EntanglementKind::File => "file",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "type" => EntanglementKind::Type,
            "function" => EntanglementKind::Function,
            "method" => EntanglementKind::Method,
            "interface" => EntanglementKind::Interface,
            "package" => EntanglementKind::Package,
            "file" => EntanglementKind::File,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntanglementStatus {
    Fulfilled,
    Disputed,
}

impl EntanglementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntanglementStatus::Fulfilled => "fulfilled",
            EntanglementStatus::Disputed => "disputed",
        }
    }
}

/// A published contract: a producer phase vouching for a named symbol.
/// Unique on `(producer, kind, name)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entanglement {
    pub producer: String,
    pub kind: EntanglementKind,
    pub name: String,
    pub signature: Option<String>,
    pub package: Option<String>,
    pub status: EntanglementStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileClaim {
    pub filepath: String,
    pub owner_phase_id: String,
    pub claimed_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    pub id: i64,
    pub phase_id: String,
    pub summary: String,
    pub detail: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    pub id: i64,
    pub phase_id: String,
    pub kind: String,
    pub payload: String,
    pub created_at: String,
}
