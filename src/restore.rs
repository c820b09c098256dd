//! Restore coordination
//!
//! Every restore first captures the current working tree into a
//! `before-restore-{session}-{ts}` backup ref, so the state being thrown
//! away is always recoverable. Only the most recent backup is kept per
//! session. Paths currently staged in the user's git index are left
//! untouched during the overwrite; the user has signalled intent to commit
//! them.

use crate::error::Result;
use crate::scanner::WorktreeScanner;
use crate::store::SnapshotStore;
use crate::types::{backup_ref_name, timestamp_ms, RefData, RestoreStats, SessionId, TreeId};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct RestoreCoordinator;

impl RestoreCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Restore the working tree to `target`, taking a safety backup first.
    pub async fn restore(
        &self,
        store: &SnapshotStore,
        scanner: &WorktreeScanner,
        session: &SessionId,
        target: &TreeId,
    ) -> Result<RestoreStats> {
        let backup = store.capture(scanner)?;
        let now = Utc::now();
        let backup_name = backup_ref_name(session, timestamp_ms(now));
        store.write_ref(
            &backup_name,
            &RefData {
                tree_id: backup.tree_id.clone(),
                created_at: now,
            },
        )?;
        debug!("wrote backup ref {}", backup_name);

        // One backup per session; older ones are superseded
        for name in store.list_refs(&format!("before-restore-{}-", session))? {
            if name != backup_name {
                store.delete_ref(&name).ok();
            }
        }

        let staged = staged_paths(scanner.root()).await;
        if !staged.is_empty() {
            debug!("excluding {} staged path(s) from restore", staged.len());
        }

        let stats = store.materialize(target, scanner, &staged)?;
        info!(
            "restored {} ({} files written, {} deleted)",
            target.short(),
            stats.files_restored,
            stats.files_deleted
        );
        Ok(stats)
    }

    /// Latest backup ref name for the session, if one exists
    pub fn latest_backup(&self, store: &SnapshotStore, session: &SessionId) -> Option<String> {
        store
            .list_refs(&format!("before-restore-{}-", session))
            .ok()?
            .into_iter()
            .max()
    }
}

/// Paths staged in the git index of `worktree`, relative to its root.
/// `--relative` keeps the output worktree-relative even when the worktree
/// sits below the repository root, so the set matches scanner paths.
/// Returns an empty set when git is unavailable or the directory is not a
/// repository; restores then overwrite everything.
pub async fn staged_paths(worktree: &Path) -> HashSet<PathBuf> {
    let output = tokio::process::Command::new("git")
        .args(["diff", "--cached", "--name-only", "--relative"])
        .current_dir(worktree)
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect(),
        Ok(output) => {
            warn!(
                "git diff --cached failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            HashSet::new()
        }
        Err(e) => {
            warn!("could not run git: {}", e);
            HashSet::new()
        }
    }
}
