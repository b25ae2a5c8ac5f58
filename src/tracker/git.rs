use anyhow::{Context, Result};
use git2::{Repository, Signature};
use std::path::Path;

/// Commits the working tree as-is and hands back the resulting SHA, so a
/// `PhaseExecutor` can snapshot both sides of a phase (`base_commit` before
/// the coder/reviewer loop, `final_commit` after) without needing the repo
/// to already be clean.
pub struct GitTracker {
    repo: Repository,
}

impl GitTracker {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        Ok(Self { repo })
    }

    /// Stage everything and commit, returning the new commit's SHA.
    pub fn snapshot_before(&self, phase: &str) -> Result<String> {
        let mut index = self.repo.index()?;

        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let sig = Signature::now("quasar", "quasar@localhost")?;

        let commit_id = if let Some(parent) = self.get_head_commit() {
            self.repo.commit(
                Some("HEAD"),
                &sig,
                &sig,
                &format!("[quasar] snapshot for phase {}", phase),
                &tree,
                &[&parent],
            )?
        } else {
            self.repo.commit(
                Some("HEAD"),
                &sig,
                &sig,
                &format!("[quasar] snapshot for phase {}", phase),
                &tree,
                &[],
            )?
        };

        Ok(commit_id.to_string())
    }

    /// Get the HEAD commit if it exists (returns None for unborn branches)
    fn get_head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    /// Get current HEAD SHA (returns None for unborn branches)
    pub fn head_sha(&self) -> Option<String> {
        self.get_head_commit().map(|c| c.id().to_string())
    }
}
