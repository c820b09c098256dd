//! Checkpoint registry
//!
//! Tracks the checkpoints of one session: at most one user-kind checkpoint
//! per conversation entry, and at most one assistant-kind checkpoint for the
//! whole session. Refs on disk are the source of truth; the registry is an
//! in-memory index over them that can always be rebuilt by listing and
//! parsing the session's ref names.

use crate::conversation::ConversationSource;
use crate::error::Result;
use crate::store::SnapshotStore;
use crate::types::{
    assistant_ref_name, from_timestamp_ms, parse_session_ref, session_ref_prefixes, timestamp_ms,
    user_ref_name, CheckpointId, CheckpointKind, CheckpointRecord, EntryId, ParsedRef, RefData,
    SessionId, Snapshot,
};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

pub struct CheckpointRegistry {
    session: SessionId,
    /// sanitized entry id -> user-kind record
    by_entry: HashMap<String, CheckpointRecord>,
    assistant: Option<CheckpointRecord>,
}

impl CheckpointRegistry {
    pub fn new(session: SessionId) -> Self {
        Self {
            session,
            by_entry: HashMap::new(),
            assistant: None,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Re-index this session's checkpoints from refs on disk. Stale
    /// duplicates (older user refs for the same entry, older assistant refs)
    /// are deleted as they are found.
    pub fn rebuild(&mut self, store: &SnapshotStore) -> Result<()> {
        self.by_entry.clear();
        self.assistant = None;

        for prefix in session_ref_prefixes(&self.session) {
            for name in store.list_refs(&prefix)? {
                let parsed = match parse_session_ref(&name, &self.session) {
                    Some(parsed) => parsed,
                    None => continue,
                };
                let (kind, ts, entry) = match parsed {
                    ParsedRef::Checkpoint {
                        kind,
                        timestamp_ms,
                        entry,
                    } => (kind, timestamp_ms, entry),
                    // Backups are the restore coordinator's concern
                    ParsedRef::Backup { .. } => continue,
                };
                let tree_id = match store.tree_id_of(&name) {
                    Some(tree_id) => tree_id,
                    None => {
                        warn!("dropping dangling checkpoint ref {}", name);
                        store.delete_ref(&name).ok();
                        continue;
                    }
                };
                let record = CheckpointRecord {
                    id: CheckpointId(name),
                    entry,
                    kind,
                    timestamp: from_timestamp_ms(ts),
                    tree_id,
                };
                match kind {
                    CheckpointKind::User => self.index_user(store, record),
                    CheckpointKind::Assistant => self.index_assistant(store, record),
                }
            }
        }

        debug!(
            "rebuilt registry for session {}: {} user checkpoint(s), assistant={}",
            self.session,
            self.by_entry.len(),
            self.assistant.is_some()
        );
        Ok(())
    }

    fn index_user(&mut self, store: &SnapshotStore, record: CheckpointRecord) {
        match self.by_entry.get(&record.entry) {
            Some(existing) if existing.timestamp >= record.timestamp => {
                store.delete_ref(record.id.as_str()).ok();
            }
            Some(existing) => {
                store.delete_ref(existing.id.as_str()).ok();
                self.by_entry.insert(record.entry.clone(), record);
            }
            None => {
                self.by_entry.insert(record.entry.clone(), record);
            }
        }
    }

    fn index_assistant(&mut self, store: &SnapshotStore, record: CheckpointRecord) {
        match &self.assistant {
            Some(existing) if existing.timestamp >= record.timestamp => {
                store.delete_ref(record.id.as_str()).ok();
            }
            Some(existing) => {
                store.delete_ref(existing.id.as_str()).ok();
                self.assistant = Some(record);
            }
            None => self.assistant = Some(record),
        }
    }

    /// Record a user-kind checkpoint for `entry`. A second call for the same
    /// entry is a no-op returning `Ok(None)`; the first checkpoint of an
    /// entry always wins.
    pub fn record_user(
        &mut self,
        store: &SnapshotStore,
        entry: &EntryId,
        snapshot: &Snapshot,
    ) -> Result<Option<CheckpointRecord>> {
        let sanitized = entry.sanitized();
        if self.by_entry.contains_key(&sanitized) {
            trace!("entry {} already has a checkpoint", sanitized);
            return Ok(None);
        }

        let now = chrono::Utc::now();
        let name = user_ref_name(&self.session, timestamp_ms(now), entry);
        store.write_ref(
            &name,
            &RefData {
                tree_id: snapshot.tree_id.clone(),
                created_at: now,
            },
        )?;

        let record = CheckpointRecord {
            id: CheckpointId(name),
            entry: sanitized.clone(),
            kind: CheckpointKind::User,
            timestamp: now,
            tree_id: snapshot.tree_id.clone(),
        };
        self.by_entry.insert(sanitized, record.clone());
        debug!("recorded user checkpoint {}", record.id);
        Ok(Some(record))
    }

    /// Record the assistant-kind checkpoint for `entry`, replacing any
    /// previous one. The new ref is written before the old one is deleted so
    /// a crash in between leaves at least one in place.
    pub fn record_assistant(
        &mut self,
        store: &SnapshotStore,
        entry: &EntryId,
        snapshot: &Snapshot,
    ) -> Result<CheckpointRecord> {
        let now = chrono::Utc::now();
        let name = assistant_ref_name(&self.session, timestamp_ms(now), entry);
        store.write_ref(
            &name,
            &RefData {
                tree_id: snapshot.tree_id.clone(),
                created_at: now,
            },
        )?;

        let record = CheckpointRecord {
            id: CheckpointId(name),
            entry: entry.sanitized(),
            kind: CheckpointKind::Assistant,
            timestamp: now,
            tree_id: snapshot.tree_id.clone(),
        };
        if let Some(previous) = self.assistant.replace(record.clone()) {
            if previous.id != record.id {
                store.delete_ref(previous.id.as_str()).ok();
            }
        }
        debug!("recorded assistant checkpoint {}", record.id);
        Ok(record)
    }

    pub fn lookup(&self, id: &CheckpointId) -> Option<&CheckpointRecord> {
        self.by_entry
            .values()
            .find(|r| &r.id == id)
            .or(self.assistant.as_ref().filter(|r| &r.id == id))
    }

    /// User checkpoint for a sanitized entry id, if one exists
    pub fn user_for_entry(&self, sanitized: &str) -> Option<&CheckpointRecord> {
        self.by_entry.get(sanitized)
    }

    pub fn assistant(&self) -> Option<&CheckpointRecord> {
        self.assistant.as_ref()
    }

    /// All records in chronological order. User-kind sorts before
    /// assistant-kind at equal timestamps, matching the order they are
    /// created within one turn.
    pub fn records(&self) -> Vec<CheckpointRecord> {
        let mut all: Vec<CheckpointRecord> = self.by_entry.values().cloned().collect();
        if let Some(assistant) = &self.assistant {
            all.push(assistant.clone());
        }
        all.sort_by(|a, b| {
            (a.timestamp, kind_rank(a.kind), &a.id.0).cmp(&(b.timestamp, kind_rank(b.kind), &b.id.0))
        });
        all
    }

    /// Number of user-kind checkpoints
    pub fn user_count(&self) -> usize {
        self.by_entry.len()
    }

    /// Total number of checkpoints
    pub fn len(&self) -> usize {
        self.by_entry.len() + usize::from(self.assistant.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget a record, deleting its ref
    pub fn remove(&mut self, store: &SnapshotStore, id: &CheckpointId) -> Result<()> {
        store.delete_ref(id.as_str())?;
        self.by_entry.retain(|_, r| &r.id != id);
        if self.assistant.as_ref().map(|r| &r.id) == Some(id) {
            self.assistant = None;
        }
        Ok(())
    }

    /// Forget everything; refs must be deleted by the caller
    pub fn clear(&mut self) {
        self.by_entry.clear();
        self.assistant = None;
    }

    /// Display labels keyed by sanitized entry id: `U1`, `U2`, ... in
    /// chronological order for user checkpoints, and `A{n}` for the
    /// assistant checkpoint, where `n` is the count of user checkpoints that
    /// precede it.
    pub fn labels(&self) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        let mut user_count = 0usize;
        for record in self.records() {
            let label = match record.kind {
                CheckpointKind::User => {
                    user_count += 1;
                    format!("U{}", user_count)
                }
                CheckpointKind::Assistant => format!("A{}", user_count.max(1)),
            };
            labels.insert(record.entry.clone(), label);
        }
        labels
    }

    /// Push labels onto the conversation, clearing entries without a
    /// checkpoint. Best-effort: entries no longer on the branch are skipped.
    pub fn sync_labels(&self, conversation: &dyn ConversationSource) {
        let labels = self.labels();
        for entry in conversation.branch_entries() {
            let label = labels.get(&entry.id.sanitized()).cloned();
            conversation.set_entry_label(&entry.id, label);
        }
        // Entries referenced by checkpoints but absent from the branch are
        // left alone; they may belong to a sibling fork
    }
}

fn kind_rank(kind: CheckpointKind) -> u8 {
    match kind {
        CheckpointKind::User => 0,
        CheckpointKind::Assistant => 1,
    }
}
