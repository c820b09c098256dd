//! Conversation access seam
//!
//! The engine anchors checkpoints to conversation entries but never owns the
//! transcript itself. [`ConversationSource`] is the narrow view it needs:
//! the entries on the current branch, the branch leaf, and a write path for
//! checkpoint labels. [`MemoryConversation`] is a complete in-process
//! implementation, used by the test suite and by embedders without a
//! persistent transcript.

use crate::types::EntryId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Role of a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRole {
    User,
    Assistant,
    ToolResult,
    Other,
}

/// One entry on a conversation branch
#[derive(Debug, Clone)]
pub struct ConversationEntry {
    /// Stable identifier of the entry
    pub id: EntryId,
    /// Parent entry on the tree, `None` for the root
    pub parent_id: Option<EntryId>,
    /// Who produced the entry
    pub role: EntryRole,
    /// When the entry was appended
    pub timestamp: DateTime<Utc>,
    /// Rendered text of the entry (used for list previews)
    pub text: String,
}

/// Read access to the active conversation branch, plus label writes.
///
/// Implementations must be cheap to call repeatedly; the engine queries the
/// branch on every turn boundary and during assistant-entry resolution.
pub trait ConversationSource: Send + Sync {
    /// Entries on the active branch, root first
    fn branch_entries(&self) -> Vec<ConversationEntry>;

    /// Id of the branch leaf, if the conversation is non-empty
    fn leaf_entry_id(&self) -> Option<EntryId>;

    /// Attach or clear a checkpoint label on an entry. Implementations may
    /// ignore labels they cannot persist.
    fn set_entry_label(&self, id: &EntryId, label: Option<String>);

    /// Current checkpoint label of an entry. Implementations that do not
    /// persist labels may always answer `None`.
    fn entry_label(&self, id: &EntryId) -> Option<String> {
        let _ = id;
        None
    }

    /// Look up a single entry by id
    fn entry(&self, id: &EntryId) -> Option<ConversationEntry> {
        self.branch_entries().into_iter().find(|e| &e.id == id)
    }
}

/// Recover the original entry id from its sanitized ref-name form.
///
/// Sanitization is lossy (every non `[A-Za-z0-9-]` byte becomes `_`), so the
/// original is found by sanitizing each live entry id and comparing. Falls
/// back to `None` when no live entry matches, e.g. after the branch moved.
pub fn resolve_entry_id(sanitized: &str, entries: &[ConversationEntry]) -> Option<EntryId> {
    entries
        .iter()
        .rev()
        .find(|e| e.id.sanitized() == sanitized)
        .map(|e| e.id.clone())
}

#[derive(Default)]
struct MemoryInner {
    entries: Vec<ConversationEntry>,
    labels: HashMap<EntryId, String>,
}

/// A linear in-memory conversation. Clones share the same underlying
/// transcript, which lets one handle append entries while another (inside
/// the engine) observes them.
#[derive(Clone, Default)]
pub struct MemoryConversation {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryConversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry with an explicit timestamp
    pub fn push(&self, id: impl Into<String>, role: EntryRole, timestamp: DateTime<Utc>, text: impl Into<String>) -> EntryId {
        let mut inner = self.inner.write();
        let parent_id = inner.entries.last().map(|e| e.id.clone());
        let entry = ConversationEntry {
            id: EntryId::new(id),
            parent_id,
            role,
            timestamp,
            text: text.into(),
        };
        let id = entry.id.clone();
        inner.entries.push(entry);
        id
    }

    /// Append a user entry timestamped now
    pub fn push_user(&self, id: impl Into<String>, text: impl Into<String>) -> EntryId {
        self.push(id, EntryRole::User, Utc::now(), text)
    }

    /// Append an assistant entry timestamped now
    pub fn push_assistant(&self, id: impl Into<String>, text: impl Into<String>) -> EntryId {
        self.push(id, EntryRole::Assistant, Utc::now(), text)
    }

    /// Current label of an entry, if any
    pub fn label_of(&self, id: &EntryId) -> Option<String> {
        self.inner.read().labels.get(id).cloned()
    }
}

impl ConversationSource for MemoryConversation {
    fn branch_entries(&self) -> Vec<ConversationEntry> {
        self.inner.read().entries.clone()
    }

    fn leaf_entry_id(&self) -> Option<EntryId> {
        self.inner.read().entries.last().map(|e| e.id.clone())
    }

    fn set_entry_label(&self, id: &EntryId, label: Option<String>) {
        let mut inner = self.inner.write();
        match label {
            Some(label) => {
                inner.labels.insert(id.clone(), label);
            }
            None => {
                inner.labels.remove(id);
            }
        }
    }

    fn entry_label(&self, id: &EntryId) -> Option<String> {
        self.inner.read().labels.get(id).cloned()
    }
}
