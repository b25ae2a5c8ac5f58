//! Wrapper around an external issue-tracker CLI (`create`, `close`,
//! `update`, `add_comment`, `create_child`, `list`, `show`). The CLI's
//! human-readable output is never consumed, only its exit code and a
//! parsed JSON envelope.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

#[derive(Debug, Clone, Deserialize)]
pub struct BeadSummary {
    pub id: String,
    pub title: String,
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BeadDetail {
    pub id: String,
    pub title: String,
    pub state: String,
    #[serde(default)]
    pub body: Option<String>,
}

pub struct BeadClient {
    cmd: String,
    working_dir: PathBuf,
}

impl BeadClient {
    pub fn new(cmd: impl Into<String>, working_dir: impl AsRef<Path>) -> Self {
        Self {
            cmd: cmd.into(),
            working_dir: working_dir.as_ref().to_path_buf(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Value> {
        let output = Command::new(&self.cmd)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("failed to spawn tracker command '{}'", self.cmd))?;

        if !output.status.success() {
            anyhow::bail!(
                "tracker command '{} {}' exited with {}: {}",
                self.cmd,
                args.join(" "),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(stdout.trim()).context("failed to parse tracker JSON output")
    }

    fn parse_id(value: &Value) -> Result<String> {
        value
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .context("tracker output missing 'id' field")
    }

    pub async fn create(&self, title: &str, body: &str, labels: &[String]) -> Result<String> {
        let mut args = vec!["create", "--title", title, "--body", body];
        let label_args: Vec<String> = labels.iter().flat_map(|l| vec!["--label".to_string(), l.clone()]).collect();
        let label_refs: Vec<&str> = label_args.iter().map(String::as_str).collect();
        args.extend(label_refs.iter());
        let value = self.run(&args).await?;
        Self::parse_id(&value)
    }

    pub async fn create_child(&self, parent_id: &str, title: &str, body: &str) -> Result<String> {
        let value = self
            .run(&["create-child", "--parent", parent_id, "--title", title, "--body", body])
            .await?;
        Self::parse_id(&value)
    }

    pub async fn close(&self, id: &str) -> Result<()> {
        self.run(&["close", id]).await?;
        Ok(())
    }

    pub async fn update(&self, id: &str, fields: &HashMap<String, String>) -> Result<()> {
        let mut args = vec!["update".to_string(), id.to_string()];
        for (k, v) in fields {
            args.push(format!("--{k}"));
            args.push(v.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&arg_refs).await?;
        Ok(())
    }

    pub async fn add_comment(&self, id: &str, comment: &str) -> Result<()> {
        self.run(&["add-comment", id, "--body", comment]).await?;
        Ok(())
    }

    pub async fn list(&self, filter: Option<&str>) -> Result<Vec<BeadSummary>> {
        let value = match filter {
            Some(f) => self.run(&["list", "--filter", f]).await?,
            None => self.run(&["list"]).await?,
        };
        serde_json::from_value(value).context("failed to parse tracker list output")
    }

    pub async fn show(&self, id: &str) -> Result<BeadDetail> {
        let value = self.run(&["show", id]).await?;
        serde_json::from_value(value).context("failed to parse tracker show output")
    }
}
