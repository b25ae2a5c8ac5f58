//! Filesystem watch over a nebula directory: `.md` phase-body edits and the
//! `PAUSE`/`STOP` control files. Generalizes the `notify`-backed
//! `ConfigWatcher` poll loop from the wider example pack (hot-reload
//! watching for a config directory) to the nebula directory's own
//! file-kind classification.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::errors::NebulaError;
use crate::worker_pool::{PAUSE_FILE, STOP_FILE};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NebulaChange {
    /// A phase body (`<id>.md`) was created or modified.
    PhaseBodyChanged(PathBuf),
    /// The `PAUSE` control file appeared or was removed.
    Pause(bool),
    /// The `STOP` control file appeared.
    Stop,
}

fn classify(path: &Path, nebula_dir: &Path) -> Option<NebulaChange> {
    let file_name = path.file_name()?.to_str()?;

    if file_name.starts_with('.') || file_name == crate::nebula::STATE_FILE_NAME {
        return None;
    }
    if file_name == STOP_FILE {
        return path.exists().then_some(NebulaChange::Stop);
    }
    if file_name == PAUSE_FILE {
        return Some(NebulaChange::Pause(path.exists()));
    }
    if path.extension().and_then(|e| e.to_str()) == Some("md") && path.parent() == Some(nebula_dir) {
        return Some(NebulaChange::PhaseBodyChanged(path.to_path_buf()));
    }
    None
}

/// Watches a nebula directory, surfacing phase-body edits and control-file
/// transitions to the Worker Pool. Holds the underlying `notify` watcher
/// alive for its RAII lifetime; events drain via a non-blocking `poll()`.
pub struct InterventionWatcher {
    nebula_dir: PathBuf,
    rx: Receiver<notify::Result<Event>>,
    _watcher: RecommendedWatcher,
}

impl InterventionWatcher {
    pub fn new(nebula_dir: impl Into<PathBuf>) -> Result<Self, NebulaError> {
        let nebula_dir = nebula_dir.into();
        let (tx, rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| NebulaError::Other(anyhow::anyhow!("failed to start watcher: {e}")))?;

        if nebula_dir.exists() {
            watcher
                .watch(&nebula_dir, RecursiveMode::NonRecursive)
                .map_err(|e| NebulaError::Other(anyhow::anyhow!("failed to watch {}: {e}", nebula_dir.display())))?;
        }

        Ok(Self {
            nebula_dir,
            rx,
            _watcher: watcher,
        })
    }

    /// Drain pending filesystem events without blocking. Each distinct
    /// change surfaces at most once per poll.
    pub fn poll(&self) -> Vec<NebulaChange> {
        let mut changes = Vec::new();
        let mut seen = HashSet::new();

        while let Ok(Ok(event)) = self.rx.try_recv() {
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)) {
                continue;
            }
            for path in event.paths {
                if let Some(change) = classify(&path, &self.nebula_dir) {
                    if seen.insert(change.clone()) {
                        changes.push(change);
                    }
                }
            }
        }

        changes
    }

    pub fn nebula_dir(&self) -> &Path {
        &self.nebula_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn classifies_phase_body_control_files_and_ignores_hidden() {
        let dir = tempdir().unwrap();
        let nebula_dir = dir.path();

        assert_eq!(
            classify(&nebula_dir.join("01.md"), nebula_dir),
            Some(NebulaChange::PhaseBodyChanged(nebula_dir.join("01.md")))
        );
        assert!(classify(&nebula_dir.join(".hidden.md"), nebula_dir).is_none());
        assert!(classify(&nebula_dir.join(crate::nebula::STATE_FILE_NAME), nebula_dir).is_none());
    }

    #[test]
    fn watcher_creation_on_existing_dir_succeeds() {
        let dir = tempdir().unwrap();
        assert!(InterventionWatcher::new(dir.path()).is_ok());
    }

    #[test]
    fn watcher_detects_phase_body_edit() {
        let dir = tempdir().unwrap();
        let phase_path = dir.path().join("01.md");
        std::fs::write(&phase_path, "+++\nid = \"01\"\ntitle = \"x\"\n+++\nbody\n").unwrap();

        let watcher = InterventionWatcher::new(dir.path()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        std::fs::write(&phase_path, "+++\nid = \"01\"\ntitle = \"x\"\n+++\nchanged\n").unwrap();

        for _ in 0..20 {
            std::thread::sleep(Duration::from_millis(50));
            if watcher.poll().iter().any(|c| matches!(c, NebulaChange::PhaseBodyChanged(_))) {
                return;
            }
        }
        panic!("expected a PhaseBodyChanged event");
    }

    #[test]
    fn watcher_detects_stop_file() {
        let dir = tempdir().unwrap();
        let watcher = InterventionWatcher::new(dir.path()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        std::fs::write(dir.path().join(STOP_FILE), "").unwrap();

        for _ in 0..20 {
            std::thread::sleep(Duration::from_millis(50));
            if watcher.poll().iter().any(|c| matches!(c, NebulaChange::Stop)) {
                return;
            }
        }
        panic!("expected a Stop event");
    }
}
