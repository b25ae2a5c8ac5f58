//! `+++`-delimited frontmatter phase files: TOML frontmatter plus a markdown
//! body, one file per phase.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::GateMode;
use crate::errors::NebulaError;

const DELIM: &str = "+++";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Frontmatter {
    id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    priority: Option<i64>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    assignee: Option<String>,
    #[serde(default)]
    max_review_cycles: Option<u32>,
    #[serde(default)]
    max_budget_usd: Option<f64>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    gate: Option<GateMode>,
    #[serde(default)]
    blocks: Vec<String>,
    #[serde(default)]
    scope: Vec<String>,
    #[serde(default)]
    allow_scope_overlap: bool,
}

/// One phase: required `id`/`title`, the parsed per-phase overrides, and
/// the markdown plan body. `blocks` is the author-facing reverse-dependency
/// list; `nebula::lifecycle` injects it into the DAG as forward edges from
/// listed phase ids onto this one.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSpec {
    pub id: String,
    pub title: String,
    pub phase_type: Option<String>,
    pub priority: Option<i64>,
    pub depends_on: Vec<String>,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
    pub max_review_cycles: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub model: Option<String>,
    pub gate: Option<GateMode>,
    pub blocks: Vec<String>,
    pub scope: Vec<String>,
    pub allow_scope_overlap: bool,
    pub body: String,
}

impl PhaseSpec {
    pub fn parse(path: &Path, content: &str) -> Result<Self, NebulaError> {
        let (frontmatter_raw, body) = split_frontmatter(path, content)?;
        let fm: Frontmatter = toml::from_str(frontmatter_raw).map_err(|e| NebulaError::InvalidPhaseFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let id = fm.id.ok_or_else(|| NebulaError::MissingField("<unknown>".into(), "id".into()))?;
        let title = fm
            .title
            .ok_or_else(|| NebulaError::MissingField(id.clone(), "title".into()))?;

        Ok(PhaseSpec {
            id,
            title,
            phase_type: fm.r#type,
            priority: fm.priority,
            depends_on: fm.depends_on,
            labels: fm.labels,
            assignee: fm.assignee,
            max_review_cycles: fm.max_review_cycles,
            max_budget_usd: fm.max_budget_usd,
            model: fm.model,
            gate: fm.gate,
            blocks: fm.blocks,
            scope: fm.scope,
            allow_scope_overlap: fm.allow_scope_overlap,
            body: body.trim_start_matches('\n').to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, NebulaError> {
        let content = std::fs::read_to_string(path).map_err(|source| NebulaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }
}

fn split_frontmatter<'a>(path: &Path, content: &'a str) -> Result<(&'a str, &'a str), NebulaError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let rest = content.strip_prefix(DELIM).ok_or_else(|| NebulaError::InvalidPhaseFile {
        path: path.to_path_buf(),
        message: format!("file does not start with '{DELIM}' frontmatter delimiter"),
    })?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);

    let end = rest.find(DELIM).ok_or_else(|| NebulaError::InvalidPhaseFile {
        path: path.to_path_buf(),
        message: format!("no closing '{DELIM}' frontmatter delimiter found"),
    })?;

    let frontmatter = &rest[..end];
    let body = &rest[end + DELIM.len()..];
    Ok((frontmatter, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn p() -> PathBuf {
        PathBuf::from("01-scaffold.md")
    }

    #[test]
    fn parses_minimal_phase() {
        let content = "+++\nid = \"01\"\ntitle = \"Scaffold\"\n+++\nBuild the skeleton.\n";
        let spec = PhaseSpec::parse(&p(), content).unwrap();
        assert_eq!(spec.id, "01");
        assert_eq!(spec.title, "Scaffold");
        assert_eq!(spec.body, "Build the skeleton.\n");
        assert!(spec.depends_on.is_empty());
        assert!(!spec.allow_scope_overlap);
    }

    #[test]
    fn parses_full_overrides() {
        let content = r#"+++
id = "07"
title = "Auth basic"
type = "feature"
priority = 3
depends_on = ["02", "04"]
max_review_cycles = 6
max_budget_usd = 12.5
model = "claude-opus"
gate = "approve"
blocks = ["08"]
scope = ["src/auth/**"]
allow_scope_overlap = false
+++
## Plan

Implement register and login.
"#;
        let spec = PhaseSpec::parse(&p(), content).unwrap();
        assert_eq!(spec.depends_on, vec!["02", "04"]);
        assert_eq!(spec.max_review_cycles, Some(6));
        assert_eq!(spec.gate, Some(GateMode::Approve));
        assert_eq!(spec.scope, vec!["src/auth/**"]);
        assert!(spec.body.starts_with("## Plan"));
    }

    #[test]
    fn missing_id_is_an_error() {
        let content = "+++\ntitle = \"No id\"\n+++\nbody\n";
        let err = PhaseSpec::parse(&p(), content).unwrap_err();
        assert!(matches!(err, NebulaError::MissingField(_, field) if field == "id"));
    }

    #[test]
    fn missing_closing_delimiter_is_an_error() {
        let content = "+++\nid = \"01\"\ntitle = \"x\"\nno closer here\n";
        assert!(PhaseSpec::parse(&p(), content).is_err());
    }

    #[test]
    fn missing_opening_delimiter_is_an_error() {
        let content = "id = \"01\"\ntitle = \"x\"\n+++\nbody\n";
        assert!(PhaseSpec::parse(&p(), content).is_err());
    }
}
