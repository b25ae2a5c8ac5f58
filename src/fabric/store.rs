use std::collections::{HashMap, HashSet};
use std::path::Path;

use rusqlite::{params, Connection};

use crate::errors::FabricError;

use super::models::{
    format_timestamp, Discovery, Entanglement, EntanglementKind, EntanglementStatus, FileClaim,
    PhaseReport, PhaseState, PhaseStatus, Pulse,
};
use super::snapshot::Snapshot;

/// Transactional local coordination store: phase states, file claims,
/// published contracts, discoveries and pulses. Single writer, many readers.
pub struct FabricStore {
    conn: Connection,
}

impl FabricStore {
    pub fn open(path: &Path) -> Result<Self, FabricError> {
        let conn = Connection::open(path).map_err(FabricError::from)?;
        let store = Self { conn };
        store.configure_and_migrate(true)?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, FabricError> {
        let conn = Connection::open_in_memory().map_err(FabricError::from)?;
        let store = Self { conn };
        store.configure_and_migrate(false)?;
        Ok(store)
    }

    fn configure_and_migrate(&self, file_backed: bool) -> Result<(), FabricError> {
        if file_backed {
            self.conn
                .execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        } else {
            self.conn.execute_batch("PRAGMA busy_timeout=5000;")?;
        }
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS phase_states (
                phase_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                bead_id TEXT,
                cycles_used INTEGER NOT NULL DEFAULT 0,
                cost_usd REAL NOT NULL DEFAULT 0.0,
                started_at TEXT,
                ended_at TEXT,
                wave_number INTEGER,
                satisfaction REAL,
                risk TEXT,
                needs_human_review INTEGER NOT NULL DEFAULT 0,
                summary TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS file_claims (
                filepath TEXT PRIMARY KEY,
                owner_phase_id TEXT NOT NULL,
                claimed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entanglements (
                producer TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                signature TEXT,
                package TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (producer, kind, name)
            );

            CREATE TABLE IF NOT EXISTS discoveries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phase_id TEXT NOT NULL,
                summary TEXT NOT NULL,
                detail TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pulses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                phase_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entanglements_kind_name ON entanglements(kind, name);
            ",
        )?;
        Ok(())
    }

    // ── Phase states ──────────────────────────────────────────────────

    pub fn set_phase_state(&self, state: &PhaseState) -> Result<(), FabricError> {
        let now = format_timestamp(chrono::Utc::now());
        self.conn.execute(
            "INSERT INTO phase_states
                (phase_id, status, bead_id, cycles_used, cost_usd, started_at, ended_at,
                 wave_number, satisfaction, risk, needs_human_review, summary, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(phase_id) DO UPDATE SET
                status = ?2, bead_id = ?3, cycles_used = ?4, cost_usd = ?5,
                started_at = ?6, ended_at = ?7, wave_number = ?8, satisfaction = ?9,
                risk = ?10, needs_human_review = ?11, summary = ?12, updated_at = ?13",
            params![
                state.phase_id,
                status_str(state.status),
                state.bead_id,
                state.cycles_used,
                state.cost_usd,
                state.started_at,
                state.ended_at,
                state.wave_number,
                state.report.satisfaction,
                state.report.risk,
                state.report.needs_human_review as i64,
                state.report.summary,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get_phase_state(&self, id: &str) -> Result<Option<PhaseState>, FabricError> {
        let mut stmt = self.conn.prepare(
            "SELECT phase_id, status, bead_id, cycles_used, cost_usd, started_at, ended_at,
                    wave_number, satisfaction, risk, needs_human_review, summary, updated_at
             FROM phase_states WHERE phase_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], row_to_phase_state)?;
        match rows.next() {
            Some(r) => Ok(Some(r?)),
            None => Ok(None),
        }
    }

    pub fn all_phase_states(&self) -> Result<Vec<PhaseState>, FabricError> {
        let mut stmt = self.conn.prepare(
            "SELECT phase_id, status, bead_id, cycles_used, cost_usd, started_at, ended_at,
                    wave_number, satisfaction, risk, needs_human_review, summary, updated_at
             FROM phase_states ORDER BY phase_id",
        )?;
        let rows = stmt.query_map([], row_to_phase_state)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn in_progress(&self) -> Result<HashSet<String>, FabricError> {
        Ok(self
            .all_phase_states()?
            .into_iter()
            .filter(|s| s.status == PhaseStatus::Running)
            .map(|s| s.phase_id)
            .collect())
    }

    // ── Contracts ─────────────────────────────────────────────────────

    pub fn publish_contract(&self, e: &Entanglement) -> Result<(), FabricError> {
        self.conn.execute(
            "INSERT INTO entanglements (producer, kind, name, signature, package, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(producer, kind, name) DO UPDATE SET
                signature = ?4, package = ?5, status = ?6, created_at = ?7",
            params![
                e.producer,
                e.kind.as_str(),
                e.name,
                e.signature,
                e.package,
                e.status.as_str(),
                e.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn publish_contracts(&mut self, batch: &[Entanglement]) -> Result<(), FabricError> {
        let tx = self.conn.transaction()?;
        for e in batch {
            tx.execute(
                "INSERT INTO entanglements (producer, kind, name, signature, package, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(producer, kind, name) DO UPDATE SET
                    signature = ?4, package = ?5, status = ?6, created_at = ?7",
                params![
                    e.producer,
                    e.kind.as_str(),
                    e.name,
                    e.signature,
                    e.package,
                    e.status.as_str(),
                    e.created_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn contracts_for(&self, producer: &str) -> Result<Vec<Entanglement>, FabricError> {
        let mut stmt = self.conn.prepare(
            "SELECT producer, kind, name, signature, package, status, created_at
             FROM entanglements WHERE producer = ?1 ORDER BY kind, name",
        )?;
        let rows = stmt.query_map(params![producer], row_to_entanglement)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn all_contracts(&self) -> Result<Vec<Entanglement>, FabricError> {
        let mut stmt = self.conn.prepare(
            "SELECT producer, kind, name, signature, package, status, created_at
             FROM entanglements ORDER BY producer, kind, name",
        )?;
        let rows = stmt.query_map([], row_to_entanglement)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn contracts_by_kind_name(
        &self,
        kind: EntanglementKind,
        name: &str,
    ) -> Result<Vec<Entanglement>, FabricError> {
        let mut stmt = self.conn.prepare(
            "SELECT producer, kind, name, signature, package, status, created_at
             FROM entanglements WHERE kind = ?1 AND name = ?2 ORDER BY producer",
        )?;
        let rows = stmt.query_map(params![kind.as_str(), name], row_to_entanglement)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // ── File claims ───────────────────────────────────────────────────

    /// Inserts a claim if absent. No-op if `owner` already holds it. Fails
    /// with `FileAlreadyClaimed` (carrying the conflicting owner) otherwise.
    pub fn claim_file(&self, path: &str, owner: &str) -> Result<(), FabricError> {
        if let Some(existing) = self.file_owner(path)? {
            if existing == owner {
                return Ok(());
            }
            return Err(FabricError::FileAlreadyClaimed {
                path: path.to_string(),
                owner: existing,
            });
        }
        let now = format_timestamp(chrono::Utc::now());
        self.conn.execute(
            "INSERT INTO file_claims (filepath, owner_phase_id, claimed_at) VALUES (?1, ?2, ?3)",
            params![path, owner, now],
        )?;
        Ok(())
    }

    pub fn release_claims(&self, owner: &str) -> Result<(), FabricError> {
        self.conn
            .execute("DELETE FROM file_claims WHERE owner_phase_id = ?1", params![owner])?;
        Ok(())
    }

    pub fn file_owner(&self, path: &str) -> Result<Option<String>, FabricError> {
        let mut stmt = self
            .conn
            .prepare("SELECT owner_phase_id FROM file_claims WHERE filepath = ?1")?;
        let mut rows = stmt.query_map(params![path], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(r) => Ok(Some(r?)),
            None => Ok(None),
        }
    }

    pub fn claims_for(&self, owner: &str) -> Result<Vec<FileClaim>, FabricError> {
        let mut stmt = self.conn.prepare(
            "SELECT filepath, owner_phase_id, claimed_at FROM file_claims WHERE owner_phase_id = ?1 ORDER BY filepath",
        )?;
        let rows = stmt.query_map(params![owner], row_to_file_claim)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn all_claims(&self) -> Result<Vec<FileClaim>, FabricError> {
        let mut stmt = self
            .conn
            .prepare("SELECT filepath, owner_phase_id, claimed_at FROM file_claims ORDER BY filepath")?;
        let rows = stmt.query_map([], row_to_file_claim)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // ── Discoveries & pulses ──────────────────────────────────────────

    pub fn post_discovery(&self, phase_id: &str, summary: &str, detail: Option<&str>) -> Result<i64, FabricError> {
        let now = format_timestamp(chrono::Utc::now());
        self.conn.execute(
            "INSERT INTO discoveries (phase_id, summary, detail, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![phase_id, summary, detail, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn post_pulse(&self, phase_id: &str, kind: &str, payload: &str) -> Result<i64, FabricError> {
        let now = format_timestamp(chrono::Utc::now());
        self.conn.execute(
            "INSERT INTO pulses (phase_id, kind, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![phase_id, kind, payload, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_pulses(&self, phase_id: Option<&str>) -> Result<Vec<Pulse>, FabricError> {
        let mut out = Vec::new();
        match phase_id {
            Some(id) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, phase_id, kind, payload, created_at FROM pulses WHERE phase_id = ?1 ORDER BY id",
                )?;
                let rows = stmt.query_map(params![id], row_to_pulse)?;
                for r in rows {
                    out.push(r?);
                }
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare("SELECT id, phase_id, kind, payload, created_at FROM pulses ORDER BY id")?;
                let rows = stmt.query_map([], row_to_pulse)?;
                for r in rows {
                    out.push(r?);
                }
            }
        }
        Ok(out)
    }

    // ── Snapshot ──────────────────────────────────────────────────────

    /// Consistent point-in-time read across phase_states, claims,
    /// entanglements, and discoveries.
    pub fn snapshot(&self) -> Result<Snapshot, FabricError> {
        let phase_states: HashMap<String, PhaseStatus> = self
            .all_phase_states()?
            .into_iter()
            .map(|s| (s.phase_id, s.status))
            .collect();
        let in_progress: HashSet<String> = phase_states
            .iter()
            .filter(|(_, s)| **s == PhaseStatus::Running)
            .map(|(id, _)| id.clone())
            .collect();
        let completed: HashSet<String> = phase_states
            .iter()
            .filter(|(_, s)| **s == PhaseStatus::Done)
            .map(|(id, _)| id.clone())
            .collect();
        let file_claims: HashMap<String, String> = self
            .all_claims()?
            .into_iter()
            .map(|c| (c.filepath, c.owner_phase_id))
            .collect();
        let entanglements = self.all_contracts()?;
        let mut stmt = self
            .conn
            .prepare("SELECT id, phase_id, summary, detail, created_at FROM discoveries ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Discovery {
                id: row.get(0)?,
                phase_id: row.get(1)?,
                summary: row.get(2)?,
                detail: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        let mut discoveries = Vec::new();
        for r in rows {
            discoveries.push(r?);
        }

        Ok(Snapshot {
            phase_states,
            file_claims,
            entanglements,
            in_progress,
            completed,
            discoveries,
        })
    }
}

fn status_str(status: PhaseStatus) -> &'static str {
    match status {
        PhaseStatus::Pending => "pending",
        PhaseStatus::Ready => "ready",
        PhaseStatus::Scanning => "scanning",
        PhaseStatus::Running => "running",
        PhaseStatus::Blocked => "blocked",
        PhaseStatus::HumanDecision => "human_decision",
        PhaseStatus::Done => "done",
        PhaseStatus::Failed => "failed",
        PhaseStatus::Skipped => "skipped",
    }
}

fn status_from_str(s: &str) -> PhaseStatus {
    match s {
        "pending" => PhaseStatus::Pending,
        "ready" => PhaseStatus::Ready,
        "scanning" => PhaseStatus::Scanning,
        "running" => PhaseStatus::Running,
        "blocked" => PhaseStatus::Blocked,
        "human_decision" => PhaseStatus::HumanDecision,
        "done" => PhaseStatus::Done,
        "failed" => PhaseStatus::Failed,
        _ => PhaseStatus::Skipped,
    }
}

fn row_to_phase_state(row: &rusqlite::Row) -> rusqlite::Result<PhaseState> {
    let status_raw: String = row.get(1)?;
    Ok(PhaseState {
        phase_id: row.get(0)?,
        status: status_from_str(&status_raw),
        bead_id: row.get(2)?,
        cycles_used: row.get(3)?,
        cost_usd: row.get(4)?,
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
        wave_number: row.get(7)?,
        report: PhaseReport {
            satisfaction: row.get(8)?,
            risk: row.get(9)?,
            needs_human_review: row.get::<_, i64>(10)? != 0,
            summary: row.get(11)?,
        },
        updated_at: row.get(12)?,
    })
}

fn row_to_entanglement(row: &rusqlite::Row) -> rusqlite::Result<Entanglement> {
    let kind_raw: String = row.get(1)?;
    let status_raw: String = row.get(5)?;
    Ok(Entanglement {
        producer: row.get(0)?,
        kind: EntanglementKind::from_str(&kind_raw).unwrap_or(EntanglementKind::File),
        name: row.get(2)?,
        signature: row.get(3)?,
        package: row.get(4)?,
        status: if status_raw == "disputed" {
            EntanglementStatus::Disputed
        } else {
            EntanglementStatus::Fulfilled
        },
        created_at: row.get(6)?,
    })
}

fn row_to_file_claim(row: &rusqlite::Row) -> rusqlite::Result<FileClaim> {
    Ok(FileClaim {
        filepath: row.get(0)?,
        owner_phase_id: row.get(1)?,
        claimed_at: row.get(2)?,
    })
}

fn row_to_pulse(row: &rusqlite::Row) -> rusqlite::Result<Pulse> {
    Ok(Pulse {
        id: row.get(0)?,
        phase_id: row.get(1)?,
        kind: row.get(2)?,
        payload: row.get(3)?,
        created_at: row.get(4)?,
    })
}
