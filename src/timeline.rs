//! Session timeline and history cursor
//!
//! A flat, chronological view of one session's checkpoints with a movable
//! cursor. The cursor tracks which checkpoint the working tree currently
//! corresponds to; when unset (fresh session, or after new checkpoints were
//! added) it implicitly sits on the newest checkpoint. Undo restores the
//! checkpoint before the cursor, redo the one after. The timeline itself is
//! pure bookkeeping; it never touches the store or the working tree.

use crate::types::{Boundary, CheckpointId, CheckpointRecord};
use tracing::trace;

#[derive(Debug, Default)]
pub struct SessionTimeline {
    /// Checkpoints in chronological order
    entries: Vec<CheckpointRecord>,
    /// Cursor position by id; `None` means "at the newest checkpoint"
    cursor: Option<CheckpointId>,
}

impl SessionTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry list (already chronologically sorted). The cursor
    /// survives as long as its checkpoint still exists; otherwise it snaps
    /// back to the implicit newest position.
    pub fn rebuild(&mut self, records: Vec<CheckpointRecord>) {
        self.entries = records;
        if let Some(cursor) = &self.cursor {
            if !self.entries.iter().any(|r| &r.id == cursor) {
                trace!("cursor checkpoint vanished, resetting to newest");
                self.cursor = None;
            }
        }
    }

    pub fn entries(&self) -> &[CheckpointRecord] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current cursor position as an index, defaulting to the last entry
    fn cursor_index(&self) -> Option<usize> {
        match &self.cursor {
            Some(id) => self.entries.iter().position(|r| &r.id == id),
            None => self.entries.len().checked_sub(1),
        }
    }

    /// The checkpoint the cursor currently sits on
    pub fn cursor_record(&self) -> Option<&CheckpointRecord> {
        self.cursor_index().map(|i| &self.entries[i])
    }

    /// The checkpoint an undo would restore, without moving anything
    pub fn undo_target(&self) -> Result<&CheckpointRecord, Boundary> {
        let idx = self.cursor_index().ok_or(Boundary::NoOlder)?;
        if idx == 0 {
            return Err(Boundary::NoOlder);
        }
        Ok(&self.entries[idx - 1])
    }

    /// The checkpoint a redo would restore, without moving anything
    pub fn redo_target(&self) -> Result<&CheckpointRecord, Boundary> {
        let idx = self.cursor_index().ok_or(Boundary::NoNewer)?;
        if idx + 1 >= self.entries.len() {
            return Err(Boundary::NoNewer);
        }
        Ok(&self.entries[idx + 1])
    }

    /// Pin the cursor on a checkpoint, after its restore succeeded
    pub fn set_cursor_to(&mut self, id: &CheckpointId) {
        if self.entries.iter().any(|r| &r.id == id) {
            trace!("cursor -> {}", id);
            self.cursor = Some(id.clone());
        }
    }

    /// Drop the explicit cursor; it reverts to the implicit newest position
    pub fn reset_cursor(&mut self) {
        self.cursor = None;
    }
}
