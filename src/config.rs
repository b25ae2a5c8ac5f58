//! Global configuration for Quasar.
//!
//! Four layers, highest wins:
//! 1. CLI flags
//! 2. `QUASAR_*` environment variables
//! 3. project config file `.quasar.yaml`
//! 4. built-in defaults
//!
//! The per-phase cascade (phase frontmatter > nebula `[execution]` > this
//! global config > built-in default) lives in `nebula::phase_spec`, which
//! consults `QuasarConfig::execution` as its third layer.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Gate policy for hails raised by coder/reviewer agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    /// Auto-approve, no hail surfaced.
    Trust,
    /// Emit hail but proceed without waiting.
    #[default]
    Review,
    /// Require human ok before continuing.
    Approve,
    /// Observation only, never blocks.
    Watch,
}

impl std::str::FromStr for GateMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trust" => Ok(GateMode::Trust),
            "review" => Ok(GateMode::Review),
            "approve" => Ok(GateMode::Approve),
            "watch" => Ok(GateMode::Watch),
            _ => anyhow::bail!("invalid gate mode '{s}', expected trust|review|approve|watch"),
        }
    }
}

/// Execution caps and defaults, the third layer of the per-phase cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDefaults {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_max_review_cycles")]
    pub max_review_cycles: u32,
    #[serde(default = "default_max_budget_usd")]
    pub max_budget_usd: f64,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub gate: GateMode,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,
    #[serde(default = "default_stale_task_secs")]
    pub stale_task_secs: u64,
}

fn default_max_workers() -> usize {
    4
}
fn default_max_review_cycles() -> u32 {
    5
}
fn default_max_budget_usd() -> f64 {
    5.0
}
fn default_model() -> String {
    "claude".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_stale_claim_secs() -> u64 {
    900
}
fn default_stale_task_secs() -> u64 {
    1800
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_review_cycles: default_max_review_cycles(),
            max_budget_usd: default_max_budget_usd(),
            model: default_model(),
            gate: GateMode::default(),
            max_retries: default_max_retries(),
            stale_claim_secs: default_stale_claim_secs(),
            stale_task_secs: default_stale_task_secs(),
        }
    }
}

/// Review-cycle strictness, resolves §9's minor-severity open question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStrictness {
    /// Minor-only issues keep cycling (the documented default).
    #[default]
    Continue,
    /// Minor-only issues are treated as approval.
    AutoApprove,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilitySection {
    #[serde(default)]
    pub log_format: LogFormat,
}

/// The `.quasar.yaml` project config file schema (layer 3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuasarYaml {
    #[serde(default)]
    pub execution: ExecutionDefaults,
    #[serde(default)]
    pub review_strictness: ReviewStrictness,
    #[serde(default)]
    pub observability: ObservabilitySection,
    #[serde(default)]
    pub agent_cmd: Option<String>,
}

impl QuasarYaml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load_or_default(project_dir: &Path) -> Result<Self, ConfigError> {
        let path = project_dir.join(".quasar.yaml");
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}

/// CLI-sourced overrides (layer 1, highest precedence).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub max_workers: Option<usize>,
    pub max_review_cycles: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub model: Option<String>,
    pub gate: Option<GateMode>,
    pub verbose: bool,
}

/// Fully resolved runtime configuration — the result of merging all four
/// layers. `QuasarConfig::resolve` is the merge function; everything else is
/// plain data.
#[derive(Debug, Clone)]
pub struct QuasarConfig {
    pub project_dir: PathBuf,
    pub quasar_dir: PathBuf,
    pub execution: ExecutionDefaults,
    pub review_strictness: ReviewStrictness,
    pub log_format: LogFormat,
    pub agent_cmd: String,
    pub verbose: bool,
}

impl QuasarConfig {
    /// Merge defaults < `.quasar.yaml` < `QUASAR_*` env < CLI flags.
    pub fn resolve(project_dir: PathBuf, cli: CliOverrides) -> Result<Self, ConfigError> {
        let project_dir = project_dir.canonicalize().map_err(|source| ConfigError::Io {
            path: project_dir.clone(),
            source,
        })?;
        let yaml = QuasarYaml::load_or_default(&project_dir)?;
        let mut execution = yaml.execution;

        if let Some(v) = env_usize("QUASAR_MAX_WORKERS")? {
            execution.max_workers = v;
        }
        if let Some(v) = env_u32("QUASAR_MAX_REVIEW_CYCLES")? {
            execution.max_review_cycles = v;
        }
        if let Some(v) = env_f64("QUASAR_MAX_BUDGET_USD")? {
            execution.max_budget_usd = v;
        }
        if let Ok(v) = std::env::var("QUASAR_MODEL") {
            execution.model = v;
        }
        if let Ok(v) = std::env::var("QUASAR_GATE") {
            execution.gate = v.parse().map_err(|e: anyhow::Error| ConfigError::InvalidEnv {
                name: "QUASAR_GATE".into(),
                message: e.to_string(),
            })?;
        }

        if let Some(v) = cli.max_workers {
            execution.max_workers = v;
        }
        if let Some(v) = cli.max_review_cycles {
            execution.max_review_cycles = v;
        }
        if let Some(v) = cli.max_budget_usd {
            execution.max_budget_usd = v;
        }
        if let Some(v) = cli.model {
            execution.model = v;
        }
        if let Some(v) = cli.gate {
            execution.gate = v;
        }

        let agent_cmd = std::env::var("QUASAR_AGENT_CMD")
            .ok()
            .or(yaml.agent_cmd)
            .unwrap_or_else(|| "claude".to_string());

        let quasar_dir = project_dir.join(".quasar");

        Ok(Self {
            project_dir,
            quasar_dir,
            execution,
            review_strictness: yaml.review_strictness,
            log_format: yaml.observability.log_format,
            agent_cmd,
            verbose: cli.verbose,
        })
    }

    pub fn fabric_db_path(&self) -> PathBuf {
        self.quasar_dir.join("fabric.sqlite3")
    }

    pub fn telemetry_path(&self) -> PathBuf {
        self.quasar_dir.join("telemetry.jsonl")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.quasar_dir.join("snapshots")
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.quasar_dir)?;
        std::fs::create_dir_all(self.snapshots_dir())?;
        Ok(())
    }
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                message: format!("'{v}' is not a non-negative integer"),
            }),
        Err(_) => Ok(None),
    }
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                message: format!("'{v}' is not a non-negative integer"),
            }),
        Err(_) => Ok(None),
    }
}

fn env_f64(name: &str) -> Result<Option<f64>, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                message: format!("'{v}' is not a number"),
            }),
        Err(_) => Ok(None),
    }
}

/// Pure cascade resolution for one per-phase setting: phase frontmatter >
/// nebula `[execution]` > global config > built-in default.
pub fn cascade<T: Clone>(
    phase_override: Option<&T>,
    nebula_override: Option<&T>,
    global: &T,
) -> T {
    phase_override
        .or(nebula_override)
        .cloned()
        .unwrap_or_else(|| global.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn gate_mode_parses_case_insensitively() {
        assert_eq!("TRUST".parse::<GateMode>().unwrap(), GateMode::Trust);
        assert_eq!("Approve".parse::<GateMode>().unwrap(), GateMode::Approve);
        assert!("bogus".parse::<GateMode>().is_err());
    }

    #[test]
    fn cascade_prefers_phase_then_nebula_then_global() {
        let global = 8u32;
        assert_eq!(cascade(Some(&3u32), Some(&5u32), &global), 3);
        assert_eq!(cascade(None, Some(&5u32), &global), 5);
        assert_eq!(cascade(None, None, &global), 8);
    }

    #[test]
    fn quasar_yaml_load_or_default_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let yaml = QuasarYaml::load_or_default(dir.path()).unwrap();
        assert_eq!(yaml.execution.max_workers, 4);
    }

    #[test]
    fn quasar_yaml_parses_execution_section() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(".quasar.yaml"),
            "execution:\n  max_workers: 10\n  max_budget_usd: 12.5\n",
        )
        .unwrap();
        let yaml = QuasarYaml::load_or_default(dir.path()).unwrap();
        assert_eq!(yaml.execution.max_workers, 10);
        assert!((yaml.execution.max_budget_usd - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn resolve_applies_cli_override_over_yaml_and_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(".quasar.yaml"),
            "execution:\n  max_workers: 2\n",
        )
        .unwrap();

        unsafe { std::env::set_var("QUASAR_MAX_WORKERS", "6") };
        let cfg = QuasarConfig::resolve(
            dir.path().to_path_buf(),
            CliOverrides {
                max_workers: Some(9),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.execution.max_workers, 9);
        unsafe { std::env::remove_var("QUASAR_MAX_WORKERS") };
    }

    #[test]
    fn resolve_falls_back_to_env_when_no_cli_override() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempdir().unwrap();
        unsafe { std::env::set_var("QUASAR_MAX_REVIEW_CYCLES", "11") };
        let cfg = QuasarConfig::resolve(dir.path().to_path_buf(), CliOverrides::default()).unwrap();
        assert_eq!(cfg.execution.max_review_cycles, 11);
        unsafe { std::env::remove_var("QUASAR_MAX_REVIEW_CYCLES") };
    }

    #[test]
    fn resolve_uses_builtin_defaults_when_nothing_set() {
        let dir = tempdir().unwrap();
        let cfg = QuasarConfig::resolve(dir.path().to_path_buf(), CliOverrides::default()).unwrap();
        assert_eq!(cfg.execution.max_workers, 4);
        assert_eq!(cfg.execution.max_retries, 3);
        assert_eq!(cfg.agent_cmd, "claude");
    }

    #[test]
    fn ensure_directories_creates_quasar_dir() {
        let dir = tempdir().unwrap();
        let cfg = QuasarConfig::resolve(dir.path().to_path_buf(), CliOverrides::default()).unwrap();
        cfg.ensure_directories().unwrap();
        assert!(cfg.quasar_dir.exists());
        assert!(cfg.snapshots_dir().exists());
    }
}
