//! # Workspace Manager
//!
//! Every job gets a private directory `job-<uuid>` under the configured root.
//! The directory holds the raw input, the normalized audio, tier scratch files
//! and the formatted output, and is removed when the job ends.
//!
//! ## Lifecycle:
//! 1. `acquire_scope` creates the directory and writes the `.job-active` marker
//! 2. the orchestrator owns the [`Workspace`] guard while the job runs
//! 3. `release` (or `Drop`, on panic or cancellation) deletes payload files,
//!    then the marker, then the directory
//!
//! At startup `sweep_orphans` removes whatever a crashed process left behind:
//! a directory whose marker still exists never finished its release.

use crate::job::JobId;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const WORKSPACE_PREFIX: &str = "job-";
pub const MARKER_FILE: &str = ".job-active";

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("cannot prepare workspace root {path}: {source}")]
    Root { path: PathBuf, source: io::Error },

    #[error("cannot create workspace {path}: {source}")]
    Create { path: PathBuf, source: io::Error },
}

/// Allocates and sweeps per-job directories under one root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

/// Result of the startup sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub orphaned: usize,
    pub husks: usize,
    pub failed: usize,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| WorkspaceError::Root {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the isolated directory for `job_id`.
    pub fn acquire_scope(&self, job_id: &JobId) -> Result<Workspace, WorkspaceError> {
        let path = self.root.join(format!("{}{}", WORKSPACE_PREFIX, job_id));
        fs::create_dir(&path).map_err(|source| WorkspaceError::Create {
            path: path.clone(),
            source,
        })?;

        let workspace = Workspace { path, released: false };
        let marker = format!("job_id={}\ncreated_at={}\n", job_id, chrono::Utc::now().to_rfc3339());
        // On failure the guard drops here and takes the directory with it.
        fs::write(workspace.marker_path(), marker).map_err(|source| WorkspaceError::Create {
            path: workspace.path.clone(),
            source,
        })?;

        debug!(job_id = %job_id, path = %workspace.path.display(), "workspace created");
        Ok(workspace)
    }

    /// Release a workspace explicitly. Safe to call any number of times.
    pub fn release_scope(&self, workspace: &mut Workspace) {
        workspace.release();
    }

    /// Delete every workspace left behind by a previous process.
    ///
    /// Directories are recognised by the `job-` prefix. If the marker is still
    /// present the job never completed its release and the whole tree goes;
    /// without a marker only an empty husk of an interrupted release can
    /// remain, so a non-recursive removal is enough.
    pub fn sweep_orphans(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "workspace sweep skipped");
                return report;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let is_workspace = entry.file_name().to_string_lossy().starts_with(WORKSPACE_PREFIX)
                && entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_workspace {
                continue;
            }

            if path.join(MARKER_FILE).exists() {
                match remove_tree(&path) {
                    Ok(()) => {
                        report.orphaned += 1;
                        info!(path = %path.display(), "removed orphaned workspace");
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(path = %path.display(), error = %e, "failed to remove orphaned workspace");
                    }
                }
            } else {
                match fs::remove_dir(&path) {
                    Ok(()) => report.husks += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!(path = %path.display(), error = %e, "unmarked workspace is not empty, leaving it");
                    }
                }
            }
        }

        if report.orphaned + report.husks > 0 {
            info!(orphaned = report.orphaned, husks = report.husks, "workspace sweep finished");
        }
        report
    }
}

/// Exclusively owned scratch directory of one job.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    released: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn marker_path(&self) -> PathBuf {
        self.path.join(MARKER_FILE)
    }

    /// Remove the directory. Idempotent; errors are logged, a directory that
    /// survives keeps its marker and is picked up by the next startup sweep.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match remove_tree(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "workspace released"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "workspace release incomplete"),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.is_released() {
            debug!(path = %self.path.display(), "workspace dropped before release, cleaning up");
            self.release();
        }
    }
}

/// Payload first, marker second, directory last.
fn remove_tree(dir: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        if entry.file_name() == MARKER_FILE {
            continue;
        }
        let path = entry.path();
        let result = if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
    }

    match fs::remove_file(dir.join(MARKER_FILE)) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    match fs::remove_dir(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Unique scratch root for a test.
    pub(crate) fn test_root(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("transkriptor-test-{}-{}", label, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_acquire_and_release() {
        let root = test_root("ws");
        let manager = WorkspaceManager::new(&root).unwrap();
        let job_id = JobId::new();

        let mut workspace = manager.acquire_scope(&job_id).unwrap();
        let path = workspace.path().to_path_buf();
        assert!(path.join(MARKER_FILE).exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with(WORKSPACE_PREFIX));

        fs::write(workspace.file("source.mp3"), b"data").unwrap();
        fs::create_dir(workspace.file("tier-1")).unwrap();
        fs::write(workspace.file("tier-1").join("out.json"), b"{}").unwrap();

        manager.release_scope(&mut workspace);
        assert!(!path.exists());

        // Idempotent
        manager.release_scope(&mut workspace);
        workspace.release();
        assert!(workspace.is_released());

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_drop_releases() {
        let root = test_root("drop");
        let manager = WorkspaceManager::new(&root).unwrap();
        let path = {
            let workspace = manager.acquire_scope(&JobId::new()).unwrap();
            fs::write(workspace.file("audio.wav"), b"RIFF").unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_sweep_removes_marked_directories_only() {
        let root = test_root("sweep");
        let manager = WorkspaceManager::new(&root).unwrap();

        // Crashed job: marker and payload still there
        let orphan = root.join(format!("{}{}", WORKSPACE_PREFIX, uuid::Uuid::new_v4()));
        fs::create_dir(&orphan).unwrap();
        fs::write(orphan.join(MARKER_FILE), b"job_id=x").unwrap();
        fs::write(orphan.join("source.mkv"), b"partial").unwrap();

        // Interrupted release: empty, no marker
        let husk = root.join(format!("{}{}", WORKSPACE_PREFIX, uuid::Uuid::new_v4()));
        fs::create_dir(&husk).unwrap();

        // Not ours
        let foreign = root.join("cache");
        fs::create_dir(&foreign).unwrap();

        let report = manager.sweep_orphans();
        assert_eq!(report.orphaned, 1);
        assert_eq!(report.husks, 1);
        assert!(!orphan.exists());
        assert!(!husk.exists());
        assert!(foreign.exists());

        fs::remove_dir_all(root).ok();
    }
}
