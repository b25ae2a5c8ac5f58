//! LLM CLI subprocess wrapper, driven through the `phase_loop::AgentInvoker`
//! seam: a stdin prompt and streamed stdout JSON, scoped by role (coder vs.
//! reviewer) and returning a cost/duration/session envelope rather than
//! writing prompt/output files for a human to read later.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{instrument, warn};

use crate::phase_loop::{AgentInvocation, AgentInvoker, AgentResult, AgentRole, Hail, HailKind};

/// JSON envelope the agent CLI prints as its last line of stdout.
#[derive(Debug, Deserialize, Default)]
struct ClaudeEnvelope {
    #[serde(default)]
    total_cost_usd: f64,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: Option<String>,
}

pub struct ClaudeInvoker {
    cmd: String,
    working_dir: PathBuf,
    model: String,
}

impl ClaudeInvoker {
    pub fn new(cmd: impl Into<String>, working_dir: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            working_dir: working_dir.into(),
            model: model.into(),
        }
    }

    fn render_prompt(&self, invocation: &AgentInvocation) -> String {
        let role_instructions = match invocation.role {
            AgentRole::Coder => {
                "You are the coder. Implement the phase body below. Address every finding \
                 listed under PRIOR FINDINGS before adding new work."
            }
            AgentRole::Reviewer => {
                "You are the reviewer. Re-read the actual files on disk (never a supplied \
                 diff) and end your response with either an APPROVED: line or one or more \
                 ISSUE: blocks, followed by a REPORT: block, per the output contract."
            }
        };

        let findings_section = if invocation.findings.is_empty() {
            String::new()
        } else {
            let lines: Vec<String> = invocation
                .findings
                .iter()
                .map(|f| format!("- [{:?}] ({:?}) {}", f.severity, f.status, f.description))
                .collect();
            format!("\n## PRIOR FINDINGS\n{}\n", lines.join("\n"))
        };

        format!(
            "{}\n\n## CONTEXT\n{}\n{}\n## PHASE\n{}\n\nBudget for this invocation: ${:.4}\n",
            role_instructions, invocation.context_prefix, findings_section, invocation.phase_body, invocation.budget_usd
        )
    }

    fn extract_hail(text: &str) -> Option<Hail> {
        let start = text.find("<hail")?;
        let tag_end = text[start..].find('>')? + start;
        let close = text[tag_end..].find("</hail>")? + tag_end;
        let tag = &text[start..tag_end];
        let message = text[tag_end + 1..close].trim().to_string();
        let kind = if tag.contains("decision_needed") {
            HailKind::DecisionNeeded
        } else {
            HailKind::Ambiguity
        };
        Some(Hail { kind, message })
    }
}

#[async_trait]
impl AgentInvoker for ClaudeInvoker {
    #[instrument(skip(self, invocation), fields(role = ?invocation.role))]
    async fn invoke(&self, invocation: &AgentInvocation) -> Result<AgentResult> {
        let prompt = self.render_prompt(invocation);
        let start = Instant::now();

        let mut cmd = Command::new(&self.cmd);
        cmd.arg("-p")
            .arg("--model")
            .arg(&self.model)
            .arg("--output-format")
            .arg("stream-json")
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Isolate the child in its own session/process group so it cannot
        // steal the controlling terminal or receive signals meant for us.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn().context("failed to spawn agent process")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await.context("failed to close agent stdin")?;
        }

        let stdout = child.stdout.take().context("failed to capture agent stdout")?;
        let mut reader = BufReader::new(stdout).lines();

        let mut accumulated = String::new();
        let mut envelope: Option<ClaudeEnvelope> = None;

        while let Some(line) = reader.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ClaudeEnvelope>(&line) {
                Ok(env) => envelope = Some(env),
                Err(_) => {
                    accumulated.push_str(&line);
                    accumulated.push('\n');
                }
            }
        }

        let status = child.wait().await.context("failed waiting on agent process")?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let envelope = envelope.unwrap_or_default();
        let result_text = envelope.result.clone().unwrap_or(accumulated);

        if !status.success() && !envelope.is_error {
            // Exit code says failure but the envelope never set is_error —
            // trust the exit code, per the subprocess contract.
            warn!(exit_code = status.code().unwrap_or(-1), "agent process exited non-zero");
            anyhow::bail!("agent process exited with non-zero code {}", status.code().unwrap_or(-1));
        }

        let hail = Self::extract_hail(&result_text);

        Ok(AgentResult {
            result_text,
            cost_usd: envelope.total_cost_usd,
            duration_ms: if envelope.duration_ms > 0 { envelope.duration_ms } else { duration_ms },
            session_id: envelope.session_id,
            is_error: envelope.is_error,
            hail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_hail_parses_kind_and_message() {
        let text = "some output <hail kind=\"decision_needed\">which DB driver?</hail> more text";
        let hail = ClaudeInvoker::extract_hail(text).unwrap();
        assert_eq!(hail.kind, HailKind::DecisionNeeded);
        assert_eq!(hail.message, "which DB driver?");
    }

    #[test]
    fn extract_hail_returns_none_without_tag() {
        assert!(ClaudeInvoker::extract_hail("nothing to see here").is_none());
    }

    #[test]
    fn extract_hail_defaults_to_ambiguity() {
        let hail = ClaudeInvoker::extract_hail("<hail>not sure about this</hail>").unwrap();
        assert_eq!(hail.kind, HailKind::Ambiguity);
    }
}
