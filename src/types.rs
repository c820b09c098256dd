//! Core data types shared across the rewind engine
//!
//! This module contains the identifiers, snapshot/manifest structures, the
//! checkpoint reference naming convention, and operation results used by the
//! other components.
//!
//! ## Reference naming
//!
//! Checkpoints live in one flat, namespace-scoped key space:
//!
//! ```text
//! checkpoint-{sessionId}-{timestampMs}-{sanitizedEntryId}            user kind
//! checkpoint-assistant-{sessionId}-{timestampMs}-{sanitizedEntryId}  assistant kind
//! before-restore-{sessionId}-{timestampMs}                           backup
//! ```
//!
//! Entry ids are sanitized by replacing every character outside
//! `[A-Za-z0-9-]` with `_`; the reverse mapping is recovered at lookup time by
//! sanitizing every live entry id and matching.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use crate::compression::CompressionStrategy;

/// Identifier of one continuous branching conversation tied to a working
/// directory. Sanitized on construction so it can always appear in ref names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id from a host-supplied string
    pub fn new(id: impl Into<String>) -> Self {
        Self(sanitize_id(&id.into()))
    }

    /// Generate a fresh random session id
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a conversation entry, owned by the external runtime.
/// Stored verbatim; sanitized only when embedded in ref names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(String);

impl EntryId {
    /// Wrap a runtime entry id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Storage-safe form of this id
    pub fn sanitized(&self) -> String {
        sanitize_id(&self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content hash identifying a stored working-tree state. Two snapshots of
/// identical content yield equal tree ids, which is what makes no-op
/// detection cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeId(pub String);

impl TreeId {
    /// Short form for logs (first 8 hex chars)
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replace every character outside `[A-Za-z0-9-]` with `_`
pub fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// An immutable, content-addressable snapshot of the full working tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Content hash of the file tree
    pub tree_id: TreeId,
    /// Number of entries captured
    pub file_count: usize,
    /// Total uncompressed size of all files
    pub total_size: u64,
    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,
}

/// Kind of conversation entry a checkpoint is anchored to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointKind {
    /// Pre-turn state, anchored to the user entry that started the turn
    User,
    /// Post-turn state, anchored to the assistant entry; singular per session
    Assistant,
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointKind::User => f.write_str("user"),
            CheckpointKind::Assistant => f.write_str("assistant"),
        }
    }
}

/// Name of a checkpoint reference in the store's flat ref namespace.
/// The ref name doubles as the checkpoint's identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId(pub String);

impl CheckpointId {
    /// The ref name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload stored in a ref file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefData {
    /// Tree id the ref points at
    pub tree_id: TreeId,
    /// When the ref was written
    pub created_at: DateTime<Utc>,
}

/// Build the ref name for a user-kind checkpoint
pub fn user_ref_name(session: &SessionId, timestamp_ms: i64, entry: &EntryId) -> String {
    format!("checkpoint-{}-{}-{}", session, timestamp_ms, entry.sanitized())
}

/// Build the ref name for the assistant-kind checkpoint
pub fn assistant_ref_name(session: &SessionId, timestamp_ms: i64, entry: &EntryId) -> String {
    format!(
        "checkpoint-assistant-{}-{}-{}",
        session,
        timestamp_ms,
        entry.sanitized()
    )
}

/// Build the ref name for the before-restore backup snapshot
pub fn backup_ref_name(session: &SessionId, timestamp_ms: i64) -> String {
    format!("before-restore-{}-{}", session, timestamp_ms)
}

/// Prefix matching every checkpoint/backup ref of a session
pub fn session_ref_prefixes(session: &SessionId) -> [String; 3] {
    [
        format!("checkpoint-assistant-{}-", session),
        format!("checkpoint-{}-", session),
        format!("before-restore-{}-", session),
    ]
}

/// A ref name decomposed against a known session id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedRef {
    /// A user- or assistant-kind checkpoint ref
    Checkpoint {
        /// Which kind of checkpoint
        kind: CheckpointKind,
        /// Millisecond timestamp embedded in the name
        timestamp_ms: i64,
        /// Sanitized entry id segment
        entry: String,
    },
    /// A before-restore backup ref
    Backup {
        /// Millisecond timestamp embedded in the name
        timestamp_ms: i64,
    },
}

/// Parse a ref name scoped to `session`. Returns `None` for refs belonging to
/// other sessions or malformed names (not an error: foreign refs are simply
/// skipped during rebuild).
pub fn parse_session_ref(name: &str, session: &SessionId) -> Option<ParsedRef> {
    let assistant_prefix = format!("checkpoint-assistant-{}-", session);
    let user_prefix = format!("checkpoint-{}-", session);
    let backup_prefix = format!("before-restore-{}-", session);

    if let Some(rest) = name.strip_prefix(&assistant_prefix) {
        let (ts, entry) = rest.split_once('-')?;
        return Some(ParsedRef::Checkpoint {
            kind: CheckpointKind::Assistant,
            timestamp_ms: ts.parse().ok()?,
            entry: entry.to_string(),
        });
    }
    if let Some(rest) = name.strip_prefix(&backup_prefix) {
        return Some(ParsedRef::Backup {
            timestamp_ms: rest.parse().ok()?,
        });
    }
    // Assistant refs also start with "checkpoint-", so this arm must come last
    if let Some(rest) = name.strip_prefix(&user_prefix) {
        if rest.starts_with("assistant-") && name.starts_with("checkpoint-assistant-") {
            return None;
        }
        let (ts, entry) = rest.split_once('-')?;
        return Some(ParsedRef::Checkpoint {
            kind: CheckpointKind::User,
            timestamp_ms: ts.parse().ok()?,
            entry: entry.to_string(),
        });
    }
    None
}

/// One checkpoint as tracked in memory: a named ref plus the fields parsed
/// out of its name and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Ref name, which is also the checkpoint id
    pub id: CheckpointId,
    /// Sanitized id of the anchoring conversation entry
    pub entry: String,
    /// User or assistant kind
    pub kind: CheckpointKind,
    /// Creation time (from the ref name's millisecond timestamp)
    pub timestamp: DateTime<Utc>,
    /// Snapshot the checkpoint points at
    pub tree_id: TreeId,
}

/// Millisecond timestamp of a `DateTime`
pub fn timestamp_ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// `DateTime` from a millisecond timestamp (clamped on overflow)
pub fn from_timestamp_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// Represents a file entry in a snapshot manifest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    /// Relative path from the working-tree root
    pub path: PathBuf,
    /// SHA-256 hash of file content (empty for directories)
    pub content_hash: String,
    /// File size in bytes
    pub size: u64,
    /// Unix file permissions
    pub permissions: u32,
    /// Whether this is a symbolic link
    pub is_symlink: bool,
    /// Target of symbolic link (if `is_symlink`)
    pub symlink_target: Option<PathBuf>,
    /// Whether this is a directory
    pub is_directory: bool,
}

/// Manifest containing all files of one snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    /// Tree id this manifest belongs to
    pub tree_id: TreeId,
    /// All entries, sorted by path
    pub files: Vec<FileEntry>,
    /// Total uncompressed size
    pub total_size: u64,
    /// Number of entries
    pub file_count: usize,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Metadata stored at the snapshot store root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Version of the on-disk format
    pub format_version: u32,
    /// Crate version that created the store
    pub rewind_version: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last accessed timestamp
    pub last_accessed: DateTime<Utc>,
}

/// Result of a restore operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreStats {
    /// Number of files written
    pub files_restored: usize,
    /// Number of files deleted (present before, absent in the snapshot)
    pub files_deleted: usize,
    /// Total bytes written
    pub bytes_written: u64,
    /// Paths skipped because they were staged in the user's git index
    pub files_excluded: usize,
    /// Wall time in milliseconds
    pub duration_ms: u64,
    /// Non-fatal problems encountered along the way
    pub warnings: Vec<String>,
}

/// Result of `clear_checkpoints`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearStats {
    /// Checkpoint refs deleted
    pub checkpoints_deleted: usize,
    /// Backup refs deleted
    pub backups_deleted: usize,
    /// Unreferenced storage objects swept afterwards
    pub objects_swept: usize,
}

/// Ordering for `checkpoint_list`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListOrder {
    /// Oldest checkpoint first
    #[default]
    OldestFirst,
    /// Newest checkpoint first
    NewestFirst,
}

/// One row of the interactive checkpoint picker
#[derive(Debug, Clone)]
pub struct CheckpointListItem {
    /// Checkpoint id (ref name)
    pub id: CheckpointId,
    /// Badge like `U3` or `A3`
    pub badge: String,
    /// Checkpoint kind
    pub kind: CheckpointKind,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Live entry id, when the anchoring entry is still on the branch
    pub entry_id: Option<EntryId>,
    /// One-line preview of the associated entry's text
    pub preview: Option<String>,
}

/// Signal returned by undo/redo when the cursor is already at an edge of the
/// timeline. State is left untouched in that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// No older checkpoint to move to
    NoOlder,
    /// No newer checkpoint to move to
    NoNewer,
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::NoOlder => f.write_str("no older checkpoint"),
            Boundary::NoNewer => f.write_str("no newer checkpoint"),
        }
    }
}

/// Outcome of an undo/redo step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryStep {
    /// The target checkpoint was restored; `entry_id` is resolved against the
    /// live branch so the caller can sync the displayed conversation position
    Restored {
        /// Checkpoint that was restored
        checkpoint: CheckpointId,
        /// Anchoring entry, when still resolvable on the live branch
        entry_id: Option<EntryId>,
    },
    /// The cursor was already at the timeline edge; nothing changed
    Boundary(Boundary),
}

/// What a finalized turn produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    /// User checkpoint created this turn, if any
    pub user: Option<CheckpointId>,
    /// Assistant checkpoint created or replaced this turn, if any
    pub assistant: Option<CheckpointId>,
}

impl TurnOutcome {
    /// Whether the turn created or replaced anything
    pub fn created_any(&self) -> bool {
        self.user.is_some() || self.assistant.is_some()
    }
}

/// Configuration for a [`RewindEngine`](crate::engine::RewindEngine)
///
/// Built with setter methods in the builder style:
///
/// ```rust
/// use rewind::types::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_max_checkpoints(20)
///     .with_ignore_patterns(vec!["*.log".to_string()]);
/// assert_eq!(config.max_checkpoints, 20);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cap on retained checkpoints per session (backups exempt)
    pub max_checkpoints: usize,
    /// Bounded retry attempts when resolving a late assistant entry
    pub resolve_attempts: u32,
    /// Fixed delay between resolution attempts
    pub resolve_delay: Duration,
    /// Suppress the status-line checkpoint counter; `None` falls back to the
    /// `REWIND_SILENT_CHECKPOINTS` env var, read once per process and cached
    pub silent_checkpoints: Option<bool>,
    /// Extra ignore patterns for worktree scanning (gitignore style)
    pub ignore_patterns: Vec<String>,
    /// Maximum file size to snapshot (0 = unlimited)
    pub max_file_size: u64,
    /// Compression strategy for stored objects
    pub compression: CompressionStrategy,
    /// Name of the store directory created inside the worktree
    pub store_dir_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_checkpoints: 50,
            resolve_attempts: 10,
            resolve_delay: Duration::from_millis(150),
            silent_checkpoints: None,
            ignore_patterns: Vec::new(),
            max_file_size: 0,
            compression: CompressionStrategy::Fast,
            store_dir_name: ".rewind".to_string(),
        }
    }
}

static ENV_SILENT: OnceLock<bool> = OnceLock::new();

impl EngineConfig {
    /// Set the checkpoint cap
    pub fn with_max_checkpoints(mut self, cap: usize) -> Self {
        self.max_checkpoints = cap;
        self
    }

    /// Set the bounded-retry parameters for assistant-entry resolution
    pub fn with_resolve_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.resolve_attempts = attempts;
        self.resolve_delay = delay;
        self
    }

    /// Explicitly enable or disable the status-line counter
    pub fn with_silent_checkpoints(mut self, silent: bool) -> Self {
        self.silent_checkpoints = Some(silent);
        self
    }

    /// Set additional scan ignore patterns
    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    /// Set the maximum file size to snapshot (0 = unlimited)
    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Set the compression strategy
    pub fn with_compression(mut self, strategy: CompressionStrategy) -> Self {
        self.compression = strategy;
        self
    }

    /// Resolve the effective silent-checkpoints flag
    pub fn silent(&self) -> bool {
        self.silent_checkpoints.unwrap_or_else(|| {
            *ENV_SILENT.get_or_init(|| {
                std::env::var("REWIND_SILENT_CHECKPOINTS")
                    .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                    .unwrap_or(false)
            })
        })
    }
}
