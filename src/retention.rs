//! Checkpoint retention
//!
//! Keeps a session's checkpoint count under a fixed cap by deleting the
//! oldest checkpoints first. Before-restore backups are exempt; they are
//! replaced on every restore and never accumulate. After a prune the store
//! is swept, which also reclaims snapshots no ref ever pointed at, such as
//! the baselines of turns that changed nothing. Pruning is best-effort: a
//! failed ref deletion or sweep is logged and skipped, never surfaced to
//! the turn that triggered it.

use crate::registry::CheckpointRegistry;
use crate::store::SnapshotStore;
use crate::types::CheckpointKind;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetentionManager {
    cap: usize,
}

impl RetentionManager {
    pub fn new(cap: usize) -> Self {
        Self { cap }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Delete oldest user checkpoints until the session is at or under the
    /// cap. The assistant checkpoint is singular and never pruned. Returns
    /// the number of checkpoints removed.
    pub fn prune(&self, store: &SnapshotStore, registry: &mut CheckpointRegistry) -> usize {
        if self.cap == 0 || registry.len() <= self.cap {
            return 0;
        }
        let excess = registry.len() - self.cap;
        let oldest: Vec<_> = registry
            .records()
            .into_iter()
            .filter(|r| r.kind == CheckpointKind::User)
            .take(excess)
            .map(|r| r.id)
            .collect();

        let mut pruned = 0usize;
        for id in oldest {
            match registry.remove(store, &id) {
                Ok(()) => pruned += 1,
                Err(e) => warn!("failed to prune checkpoint {}: {}", id, e),
            }
        }
        if pruned > 0 {
            debug!("pruned {} checkpoint(s) over cap {}", pruned, self.cap);
            if let Err(e) = store.sweep_unreferenced() {
                warn!("post-prune sweep failed: {}", e);
            }
        }
        pruned
    }
}
