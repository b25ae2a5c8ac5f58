//! `nebula.toml` manifest parsing: the sectioned `[nebula]` table that names
//! a nebula and carries its top-level defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::GateMode;
use crate::errors::NebulaError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NebulaSection {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsSection {
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignee: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSection {
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub max_review_cycles: Option<u32>,
    #[serde(default)]
    pub max_budget_usd: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub gate: Option<GateMode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextSection {
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependenciesSection {
    #[serde(default)]
    pub requires_beads: Vec<String>,
    #[serde(default)]
    pub requires_nebulae: Vec<String>,
}

/// `nebula.toml`. Only `[nebula] name` is required; every other section is
/// optional, matching §6.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NebulaManifest {
    pub nebula: NebulaSection,
    #[serde(default)]
    pub defaults: DefaultsSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub dependencies: DependenciesSection,
}

impl NebulaManifest {
    pub fn load(path: &Path) -> Result<Self, NebulaError> {
        let content = std::fs::read_to_string(path).map_err(|source| NebulaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| NebulaError::InvalidManifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), NebulaError> {
        let content = toml::to_string_pretty(self).map_err(|e| NebulaError::InvalidManifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|source| NebulaError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_manifest_with_only_required_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nebula.toml");
        std::fs::write(&path, "[nebula]\nname = \"auth-rewrite\"\n").unwrap();

        let manifest = NebulaManifest::load(&path).unwrap();
        assert_eq!(manifest.nebula.name, "auth-rewrite");
        assert!(manifest.execution.max_workers.is_none());
        assert!(manifest.dependencies.requires_beads.is_empty());
    }

    #[test]
    fn loads_manifest_with_all_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nebula.toml");
        std::fs::write(
            &path,
            r#"
            [nebula]
            name = "auth-rewrite"
            description = "rewrite auth middleware"

            [defaults]
            type = "feature"
            priority = 5
            labels = ["auth"]

            [execution]
            max_workers = 6
            gate = "approve"

            [context]
            repo = "git@example.com:org/repo.git"
            goals = ["remove legacy session storage"]

            [dependencies]
            requires_beads = ["bd-1"]
            "#,
        )
        .unwrap();

        let manifest = NebulaManifest::load(&path).unwrap();
        assert_eq!(manifest.defaults.priority, Some(5));
        assert_eq!(manifest.execution.max_workers, Some(6));
        assert_eq!(manifest.execution.gate, Some(GateMode::Approve));
        assert_eq!(manifest.context.goals, vec!["remove legacy session storage"]);
        assert_eq!(manifest.dependencies.requires_beads, vec!["bd-1"]);
    }

    #[test]
    fn missing_name_field_fails_to_parse() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nebula.toml");
        std::fs::write(&path, "[nebula]\ndescription = \"no name\"\n").unwrap();
        assert!(NebulaManifest::load(&path).is_err());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nebula.toml");
        let manifest = NebulaManifest {
            nebula: NebulaSection {
                name: "roundtrip".into(),
                description: String::new(),
            },
            defaults: DefaultsSection::default(),
            execution: ExecutionSection {
                max_workers: Some(3),
                ..Default::default()
            },
            context: ContextSection::default(),
            dependencies: DependenciesSection::default(),
        };
        manifest.save(&path).unwrap();
        let loaded = NebulaManifest::load(&path).unwrap();
        assert_eq!(loaded.nebula.name, "roundtrip");
        assert_eq!(loaded.execution.max_workers, Some(3));
    }
}
