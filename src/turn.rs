//! Turn capture state machine
//!
//! A turn starts when the user submits a message and ends when the
//! assistant's reply lands. The baseline snapshot taken at turn start is
//! held as `Pending` until turn end consumes it; both boundaries may fire
//! more than once for a single turn (streamed tool use re-enters the start
//! hook), so `begin` is first-trigger-wins and `take` clears
//! unconditionally.

use crate::conversation::{ConversationEntry, ConversationSource, EntryRole};
use crate::types::Snapshot;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, trace};

/// Baseline captured at turn start, waiting for the matching turn end
#[derive(Debug, Clone)]
pub struct PendingBaseline {
    /// Working tree as it was before the turn
    pub snapshot: Snapshot,
    /// When the baseline was captured
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct TurnCapture {
    pending: Option<PendingBaseline>,
}

impl TurnCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the pending baseline. Returns `false` if a baseline is already
    /// pending; the first capture of a turn wins.
    pub fn begin(&mut self, snapshot: Snapshot) -> bool {
        if self.pending.is_some() {
            trace!("baseline already pending, ignoring re-entrant turn start");
            return false;
        }
        debug!("pending baseline {}", snapshot.tree_id.short());
        self.pending = Some(PendingBaseline {
            snapshot,
            taken_at: Utc::now(),
        });
        true
    }

    /// Consume the pending baseline. Always clears, even when `None`.
    pub fn take(&mut self) -> Option<PendingBaseline> {
        self.pending.take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// The user entry that started the current turn: the most recent user-role
/// entry on the branch. Tool results and system notes in between are skipped.
pub fn resolve_turn_user_entry(branch: &[ConversationEntry]) -> Option<&ConversationEntry> {
    branch.iter().rev().find(|e| e.role == EntryRole::User)
}

/// The assistant entry that ended the turn, identified by its timestamp.
///
/// Transcripts are often written asynchronously, so the entry may not be
/// visible yet when the turn-end hook fires. Polls up to `attempts` times
/// with `delay` between reads, then falls back to the newest assistant
/// entry on the branch.
pub async fn resolve_assistant_entry(
    conversation: &dyn ConversationSource,
    timestamp: DateTime<Utc>,
    attempts: usize,
    delay: Duration,
) -> Option<ConversationEntry> {
    for attempt in 0..attempts.max(1) {
        let branch = conversation.branch_entries();
        if let Some(entry) = branch
            .iter()
            .rev()
            .find(|e| e.role == EntryRole::Assistant && e.timestamp == timestamp)
        {
            return Some(entry.clone());
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(delay).await;
        }
    }

    let fallback = conversation
        .branch_entries()
        .into_iter()
        .rev()
        .find(|e| e.role == EntryRole::Assistant);
    if fallback.is_some() {
        debug!("assistant entry not found by timestamp, using branch tail");
    }
    fallback
}
