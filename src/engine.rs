//! Rewind engine
//!
//! The engine wires the snapshot store, checkpoint registry, timeline,
//! retention, and restore coordination behind the event surface an embedding
//! runtime drives: session lifecycle, turn boundaries, and the user-facing
//! undo/redo/jump/list/clear commands.
//!
//! Checkpointing is background machinery, so its failure posture is
//! asymmetric. Capture-side problems degrade silently: the turn proceeds,
//! the problem is logged, and a disabling storage failure turns the engine
//! off for the rest of the session rather than breaking the conversation.
//! Once disabled, the user commands degrade too: undo and redo report a
//! timeline boundary, the list is empty, clear has nothing to delete.
//! Restore-side problems are surfaced, because the user asked for them
//! explicitly and the working tree is at stake.

use crate::conversation::{resolve_entry_id, ConversationSource};
use crate::error::{Result, RewindError};
use crate::gate::{GateOutcome, NavigationChoice, NavigationChooser};
use crate::registry::CheckpointRegistry;
use crate::restore::RestoreCoordinator;
use crate::retention::RetentionManager;
use crate::scanner::WorktreeScanner;
use crate::store::SnapshotStore;
use crate::timeline::SessionTimeline;
use crate::turn::{resolve_assistant_entry, resolve_turn_user_entry, TurnCapture};
use crate::types::{
    session_ref_prefixes, Boundary, CheckpointId, CheckpointListItem, CheckpointRecord,
    ClearStats, EngineConfig, EntryId, HistoryStep, ListOrder, SessionId, TurnOutcome,
};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const PREVIEW_MAX_CHARS: usize = 80;

/// Everything owned by one active session
struct SessionContext {
    session: SessionId,
    store: SnapshotStore,
    scanner: WorktreeScanner,
    registry: CheckpointRegistry,
    timeline: SessionTimeline,
    capture: TurnCapture,
    retention: RetentionManager,
    restorer: RestoreCoordinator,
}

enum EngineState {
    /// No session has started yet
    Inactive,
    Active(Box<SessionContext>),
    /// A disabling failure occurred; checkpointing is off until the next
    /// session start
    Disabled,
}

pub struct RewindEngine<C: ConversationSource> {
    config: EngineConfig,
    conversation: C,
    state: EngineState,
}

impl<C: ConversationSource> RewindEngine<C> {
    pub fn new(config: EngineConfig, conversation: C) -> Self {
        Self {
            config,
            conversation,
            state: EngineState::Inactive,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn conversation(&self) -> &C {
        &self.conversation
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, EngineState::Active(_))
    }

    // ---- session lifecycle ------------------------------------------------

    /// Begin (or resume) a session rooted at `worktree`. Opens the store,
    /// re-indexes the session's checkpoints, and pushes labels onto the
    /// conversation. A failure here disables checkpointing for the session;
    /// it never propagates.
    pub fn session_start(&mut self, session: SessionId, worktree: PathBuf) {
        match self.open_session(session, worktree) {
            Ok(ctx) => {
                info!(
                    "session {} active with {} checkpoint(s)",
                    ctx.session,
                    ctx.registry.len()
                );
                ctx.registry.sync_labels(&self.conversation);
                self.state = EngineState::Active(Box::new(ctx));
            }
            Err(e) => self.disable(e),
        }
    }

    /// Switch to a different session over the same or another worktree.
    /// Also the recovery path out of the disabled state.
    pub fn session_switch(&mut self, session: SessionId, worktree: PathBuf) {
        self.session_start(session, worktree);
    }

    fn open_session(&self, session: SessionId, worktree: PathBuf) -> Result<SessionContext> {
        if !worktree.is_dir() {
            return Err(RewindError::UnsupportedWorktree(worktree));
        }
        let store = SnapshotStore::open_or_init(
            worktree.join(&self.config.store_dir_name),
            self.config.compression.clone(),
        )?;
        let scanner = WorktreeScanner::new(worktree)
            .with_ignore_patterns(self.config.ignore_patterns.clone())
            .with_max_file_size(self.config.max_file_size)
            .with_store_dir_name(self.config.store_dir_name.clone());

        let mut registry = CheckpointRegistry::new(session.clone());
        registry.rebuild(&store)?;
        let mut timeline = SessionTimeline::new();
        timeline.rebuild(registry.records());

        Ok(SessionContext {
            session,
            store,
            scanner,
            registry,
            timeline,
            capture: TurnCapture::new(),
            retention: RetentionManager::new(self.config.max_checkpoints),
            restorer: RestoreCoordinator::new(),
        })
    }

    fn disable(&mut self, e: RewindError) {
        warn!("checkpointing disabled for this session: {}", e);
        self.state = EngineState::Disabled;
    }

    // ---- turn boundaries --------------------------------------------------

    /// Turn start: capture the working tree as the pending baseline. May
    /// fire more than once per turn; only the first capture is kept. Never
    /// fails outward.
    pub fn turn_start(&mut self) {
        let ctx = match &mut self.state {
            EngineState::Active(ctx) => ctx,
            _ => return,
        };
        if ctx.capture.is_pending() {
            return;
        }
        match ctx.store.capture(&ctx.scanner) {
            Ok(snapshot) => {
                ctx.capture.begin(snapshot);
            }
            Err(e) if e.is_disabling() => self.disable(e),
            Err(e) => warn!("baseline capture failed, turn continues: {}", e),
        }
    }

    /// Fallback baseline trigger for runtimes whose turn-start hook can be
    /// skipped (e.g. slash commands): fires when the user message is first
    /// observed. Identical to [`turn_start`](Self::turn_start), and inert
    /// when a baseline is already pending.
    pub fn message_start(&mut self) {
        self.turn_start();
    }

    /// Turn end: finalize checkpoints for the turn that just completed.
    ///
    /// The pending baseline is consumed unconditionally, then:
    /// the user-kind checkpoint (pointing at the *baseline*, the state the
    /// user's message applied to) is recorded when the turn changed the
    /// tree; the assistant-kind checkpoint (pointing at the turn-end state)
    /// is recorded when that state differs from everything already
    /// reachable. Retention pruning and label sync run afterwards.
    ///
    /// `assistant_ts` is the transcript timestamp of the assistant entry
    /// that ended the turn, used to anchor the assistant checkpoint.
    pub async fn turn_end(&mut self, assistant_ts: DateTime<Utc>) -> TurnOutcome {
        let (outcome, disabling) = match self.finalize_turn(assistant_ts).await {
            Ok(outcome) => (outcome, None),
            Err(e) if e.is_disabling() => (TurnOutcome::default(), Some(e)),
            Err(e) => {
                warn!("turn finalization failed, turn continues: {}", e);
                (TurnOutcome::default(), None)
            }
        };
        if let Some(e) = disabling {
            self.disable(e);
        }
        outcome
    }

    async fn finalize_turn(&mut self, assistant_ts: DateTime<Utc>) -> Result<TurnOutcome> {
        let attempts = self.config.resolve_attempts as usize;
        let delay = self.config.resolve_delay;
        let ctx = match &mut self.state {
            EngineState::Active(ctx) => ctx,
            _ => return Ok(TurnOutcome::default()),
        };

        // Consume first so a failure below can never leave a stale baseline
        let baseline = match ctx.capture.take() {
            Some(baseline) => baseline,
            None => return Ok(TurnOutcome::default()),
        };

        let end = ctx.store.capture(&ctx.scanner)?;
        let mut outcome = TurnOutcome::default();

        // User-kind checkpoint: anchored to the user entry that started the
        // turn, pointing at the baseline so undo lands on the state that
        // entry applied to. Skipped when the turn changed nothing.
        if end.tree_id != baseline.snapshot.tree_id {
            let branch = self.conversation.branch_entries();
            if let Some(user_entry) = resolve_turn_user_entry(&branch) {
                let entry_id = user_entry.id.clone();
                if let Some(record) =
                    ctx.registry
                        .record_user(&ctx.store, &entry_id, &baseline.snapshot)?
                {
                    outcome.user = Some(record.id);
                }
            } else {
                debug!("no user entry on branch, skipping user checkpoint");
            }
        }

        // Assistant-kind checkpoint: only when the end state is not already
        // reachable as the previous assistant checkpoint, this turn's user
        // checkpoint, the cursor's checkpoint, or the baseline itself
        let mut duplicate = end.tree_id == baseline.snapshot.tree_id;
        if !duplicate {
            let mut targets: Vec<&str> = Vec::new();
            if let Some(assistant) = ctx.registry.assistant() {
                targets.push(assistant.id.as_str());
            }
            if let Some(user_id) = &outcome.user {
                targets.push(user_id.as_str());
            }
            if let Some(cursor) = ctx.timeline.cursor_record() {
                targets.push(cursor.id.as_str());
            }
            duplicate = ctx.store.same_content(&end, &targets);
        }
        if !duplicate {
            match resolve_assistant_entry(&self.conversation, assistant_ts, attempts, delay).await {
                Some(entry) => {
                    let record = ctx.registry.record_assistant(&ctx.store, &entry.id, &end)?;
                    outcome.assistant = Some(record.id);
                }
                None => debug!("no assistant entry resolved, skipping assistant checkpoint"),
            }
        }

        ctx.retention.prune(&ctx.store, &mut ctx.registry);
        ctx.timeline.rebuild(ctx.registry.records());
        if let Some(id) = outcome.assistant.clone().or_else(|| outcome.user.clone()) {
            ctx.timeline.set_cursor_to(&id);
        }
        if outcome.created_any() {
            ctx.registry.sync_labels(&self.conversation);
        }
        Ok(outcome)
    }

    // ---- commands ---------------------------------------------------------

    /// Step the working tree back to the previous checkpoint
    pub async fn undo(&mut self) -> Result<HistoryStep> {
        self.step(true).await
    }

    /// Step the working tree forward to the next checkpoint
    pub async fn redo(&mut self) -> Result<HistoryStep> {
        self.step(false).await
    }

    async fn step(&mut self, backwards: bool) -> Result<HistoryStep> {
        let ctx = match &mut self.state {
            EngineState::Active(ctx) => ctx,
            // Disabled sessions have nothing to step through
            EngineState::Disabled => {
                return Ok(HistoryStep::Boundary(if backwards {
                    Boundary::NoOlder
                } else {
                    Boundary::NoNewer
                }))
            }
            EngineState::Inactive => return Err(RewindError::NoActiveSession),
        };
        let target = if backwards {
            ctx.timeline.undo_target()
        } else {
            ctx.timeline.redo_target()
        };
        let record = match target {
            Ok(record) => record.clone(),
            Err(boundary) => return Ok(HistoryStep::Boundary(boundary)),
        };
        Self::restore_record(ctx, &record).await?;
        let entry_id = self.resolve_live_entry(&record.entry);
        Ok(HistoryStep::Restored {
            checkpoint: record.id,
            entry_id,
        })
    }

    /// Restore a specific checkpoint by id, regardless of cursor position
    pub async fn jump_to(&mut self, id: &CheckpointId) -> Result<HistoryStep> {
        let ctx = match &mut self.state {
            EngineState::Active(ctx) => ctx,
            EngineState::Disabled => return Err(RewindError::CheckpointNotFound(id.0.clone())),
            EngineState::Inactive => return Err(RewindError::NoActiveSession),
        };
        let record = ctx
            .registry
            .lookup(id)
            .cloned()
            .ok_or_else(|| RewindError::CheckpointNotFound(id.0.clone()))?;
        Self::restore_record(ctx, &record).await?;
        let entry_id = self.resolve_live_entry(&record.entry);
        Ok(HistoryStep::Restored {
            checkpoint: record.id,
            entry_id,
        })
    }

    /// Restore then move the cursor; the cursor stays put when the restore
    /// fails
    async fn restore_record(ctx: &mut SessionContext, record: &CheckpointRecord) -> Result<()> {
        ctx.restorer
            .restore(&ctx.store, &ctx.scanner, &ctx.session, &record.tree_id)
            .await?;
        ctx.timeline.set_cursor_to(&record.id);
        Ok(())
    }

    fn resolve_live_entry(&self, sanitized: &str) -> Option<EntryId> {
        resolve_entry_id(sanitized, &self.conversation.branch_entries())
    }

    /// List the session's checkpoints for an interactive picker
    pub fn checkpoint_list(&self, order: ListOrder) -> Result<Vec<CheckpointListItem>> {
        let ctx = match &self.state {
            EngineState::Active(ctx) => ctx,
            EngineState::Disabled => return Ok(Vec::new()),
            EngineState::Inactive => return Err(RewindError::NoActiveSession),
        };
        let branch = self.conversation.branch_entries();
        let labels = ctx.registry.labels();

        let mut items: Vec<CheckpointListItem> = ctx
            .registry
            .records()
            .into_iter()
            .map(|record| {
                let entry_id = resolve_entry_id(&record.entry, &branch);
                let preview = entry_id
                    .as_ref()
                    .and_then(|id| branch.iter().rev().find(|e| &e.id == id))
                    .and_then(|e| preview_line(&e.text));
                CheckpointListItem {
                    badge: labels.get(&record.entry).cloned().unwrap_or_default(),
                    kind: record.kind,
                    timestamp: record.timestamp,
                    entry_id,
                    preview,
                    id: record.id,
                }
            })
            .collect();
        if order == ListOrder::NewestFirst {
            items.reverse();
        }
        Ok(items)
    }

    /// Delete every checkpoint and backup of the session, then sweep the
    /// store. Labels on the conversation are cleared.
    pub fn clear_checkpoints(&mut self) -> Result<ClearStats> {
        let ctx = match &mut self.state {
            EngineState::Active(ctx) => ctx,
            EngineState::Disabled => return Ok(ClearStats::default()),
            EngineState::Inactive => return Err(RewindError::NoActiveSession),
        };
        let mut stats = ClearStats::default();

        let backup_prefix = format!("before-restore-{}-", ctx.session);
        for prefix in session_ref_prefixes(&ctx.session) {
            for name in ctx.store.list_refs(&prefix)? {
                ctx.store.delete_ref(&name)?;
                if name.starts_with(&backup_prefix) {
                    stats.backups_deleted += 1;
                } else {
                    stats.checkpoints_deleted += 1;
                }
            }
        }

        ctx.registry.clear();
        ctx.timeline.rebuild(Vec::new());
        ctx.timeline.reset_cursor();
        ctx.capture.take();
        stats.objects_swept = ctx.store.sweep_unreferenced()?;
        ctx.registry.sync_labels(&self.conversation);

        info!(
            "cleared session {}: {} checkpoint(s), {} backup(s), {} object(s) swept",
            ctx.session,
            stats.checkpoints_deleted,
            stats.backups_deleted,
            stats.objects_swept
        );
        Ok(stats)
    }

    /// Checkpoint count for a status line, or `None` when the engine is
    /// inactive, disabled, or configured silent
    pub fn status(&self) -> Option<usize> {
        if self.config.silent() {
            return None;
        }
        match &self.state {
            EngineState::Active(ctx) => Some(ctx.registry.len()),
            _ => None,
        }
    }

    // ---- navigation gate --------------------------------------------------

    /// Run the navigation gate before jumping to `destination` on another
    /// branch. When the destination entry carries a checkpoint the chooser
    /// decides what happens to the working tree; navigation itself is the
    /// caller's job and should proceed unless the outcome is `Cancelled`.
    pub async fn before_navigate(
        &mut self,
        destination: &EntryId,
        chooser: &dyn NavigationChooser,
    ) -> Result<GateOutcome> {
        let ctx = match &mut self.state {
            EngineState::Active(ctx) => ctx,
            _ => return Ok(GateOutcome::PassThrough),
        };

        let sanitized = destination.sanitized();
        let record = ctx
            .registry
            .user_for_entry(&sanitized)
            .or_else(|| {
                ctx.registry
                    .assistant()
                    .filter(|record| record.entry == sanitized)
            })
            .cloned();
        let record = match record {
            Some(record) => record,
            None => return Ok(GateOutcome::PassThrough),
        };
        let label = ctx.registry.labels().get(&sanitized).cloned();

        match chooser.choose(destination, label.as_deref()) {
            NavigationChoice::KeepCurrentFiles => Ok(GateOutcome::KeptFiles),
            NavigationChoice::Cancel => Ok(GateOutcome::Cancelled),
            NavigationChoice::RestoreDestination => {
                match Self::restore_record(ctx, &record).await {
                    Ok(()) => Ok(GateOutcome::Restored {
                        entry_id: destination.clone(),
                    }),
                    Err(e) => {
                        warn!("restore for navigation failed, cancelling: {}", e);
                        Ok(GateOutcome::Cancelled)
                    }
                }
            }
        }
    }

    // ---- introspection ----------------------------------------------------

    /// Session id of the active session
    pub fn session_id(&self) -> Option<&SessionId> {
        match &self.state {
            EngineState::Active(ctx) => Some(&ctx.session),
            _ => None,
        }
    }

    /// Worktree of the active session
    pub fn worktree(&self) -> Option<&Path> {
        match &self.state {
            EngineState::Active(ctx) => Some(ctx.scanner.root()),
            _ => None,
        }
    }
}

/// First line of an entry's text, truncated on a char boundary
fn preview_line(text: &str) -> Option<String> {
    let line = text.lines().next()?.trim();
    if line.is_empty() {
        return None;
    }
    if line.chars().count() <= PREVIEW_MAX_CHARS {
        Some(line.to_string())
    } else {
        let truncated: String = line.chars().take(PREVIEW_MAX_CHARS).collect();
        Some(format!("{}…", truncated))
    }
}
