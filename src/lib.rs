//! # rewind
//!
//! Checkpoint and rewind engine for AI coding sessions: every conversation
//! turn that changes the working directory gets an automatic, content-
//! addressable snapshot, and the user can undo, redo, or jump the directory
//! back to any of them without touching git history.
//!
//! ## Features
//!
//! - **Turn-boundary capture**: a baseline snapshot at turn start, finalized
//!   into user/assistant checkpoints at turn end, deduplicated by content
//! - **Content-addressable storage**: files stored once by SHA-256, LZ4
//!   compressed, with manifests and named refs layered on top
//! - **History navigation**: undo/redo over a per-session timeline, jumps to
//!   arbitrary checkpoints, and a gate for cross-branch conversation moves
//! - **Safety**: every restore writes a before-restore backup first, and
//!   paths staged in the user's git index are never overwritten
//! - **Silent degradation**: capture failures log and disable rather than
//!   interrupt the conversation
//!
//! ## Example
//!
//! ```no_run
//! use rewind::conversation::MemoryConversation;
//! use rewind::engine::RewindEngine;
//! use rewind::types::{EngineConfig, HistoryStep, SessionId};
//!
//! # async fn demo() -> rewind::Result<()> {
//! let conversation = MemoryConversation::new();
//! let mut engine = RewindEngine::new(EngineConfig::default(), conversation.clone());
//! engine.session_start(SessionId::new("session-1"), "/path/to/project".into());
//!
//! // Driven by the host runtime at turn boundaries:
//! engine.turn_start();
//! conversation.push_user("u1", "add a readme");
//! // ... assistant works, files change ...
//! let assistant_ts = chrono::Utc::now();
//! conversation.push("a1", rewind::conversation::EntryRole::Assistant, assistant_ts, "done");
//! engine.turn_end(assistant_ts).await;
//!
//! // Later, on user request:
//! if let HistoryStep::Restored { checkpoint, .. } = engine.undo().await? {
//!     println!("restored {}", checkpoint);
//! }
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod gate;
pub mod registry;
pub mod restore;
pub mod retention;
pub mod scanner;
pub mod store;
pub mod timeline;
pub mod turn;
pub mod types;
pub mod utils;

pub use compression::CompressionStrategy;
pub use conversation::{ConversationEntry, ConversationSource, EntryRole, MemoryConversation};
pub use engine::RewindEngine;
pub use error::{Result, RewindError};
pub use gate::{FixedChoice, GateOutcome, NavigationChoice, NavigationChooser};
pub use store::SnapshotStore;
pub use types::{
    Boundary, CheckpointId, CheckpointKind, CheckpointListItem, ClearStats, EngineConfig, EntryId,
    HistoryStep, ListOrder, RestoreStats, SessionId, Snapshot, TurnOutcome,
};
