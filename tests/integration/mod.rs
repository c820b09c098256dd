//! End-to-end session tests
//!
//! Each test drives a full session through the engine: turn boundaries fire
//! the way an embedding runtime would fire them, files change on a real
//! (temporary) working tree, and assertions read the tree back.

use chrono::Utc;
use rewind::conversation::EntryRole;
use rewind::{
    Boundary, ClearStats, EngineConfig, EntryId, FixedChoice, GateOutcome, HistoryStep,
    ListOrder, MemoryConversation, NavigationChoice, RewindEngine, SessionId, CheckpointKind,
};
use std::fs;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use tempfile::TempDir;

/// Honors `RUST_LOG` when a test needs engine logs
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

struct Harness {
    dir: TempDir,
    conversation: MemoryConversation,
    engine: RewindEngine<MemoryConversation>,
    turn: usize,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default().with_silent_checkpoints(false))
    }

    fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let conversation = MemoryConversation::new();
        let mut engine = RewindEngine::new(config, conversation.clone());
        engine.session_start(SessionId::new("test-session"), dir.path().to_path_buf());
        assert!(engine.is_active());
        Self {
            dir,
            conversation,
            engine,
            turn: 0,
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn read(&self, name: &str) -> String {
        fs::read_to_string(self.path().join(name)).unwrap()
    }

    /// Run one full turn: user prompt, file mutation, assistant reply
    async fn run_turn(&mut self, prompt: &str, mutate: impl FnOnce(&Path)) -> rewind::TurnOutcome {
        self.turn += 1;
        // Ref names embed millisecond timestamps; keep turns distinct
        tokio::time::sleep(Duration::from_millis(3)).await;

        self.engine.turn_start();
        self.conversation
            .push_user(format!("u{}", self.turn), prompt);
        mutate(self.dir.path());

        let ts = Utc::now();
        self.conversation
            .push(format!("a{}", self.turn), EntryRole::Assistant, ts, "done");
        self.engine.turn_end(ts).await
    }
}

async fn three_versions(harness: &mut Harness) {
    harness
        .run_turn("write v1", |p| fs::write(p.join("main.rs"), "v1").unwrap())
        .await;
    harness
        .run_turn("write v2", |p| fs::write(p.join("main.rs"), "v2").unwrap())
        .await;
    harness
        .run_turn("write v3", |p| fs::write(p.join("main.rs"), "v3").unwrap())
        .await;
}

#[tokio::test]
async fn test_two_turn_session_end_to_end() -> anyhow::Result<()> {
    let mut h = Harness::new();
    fs::write(h.path().join("demo.txt"), "v1")?;

    let turn1 = h
        .run_turn("edit to v2", |p| fs::write(p.join("demo.txt"), "v2").unwrap())
        .await;
    assert!(turn1.user.is_some());
    assert!(turn1.assistant.is_some());

    let turn2 = h
        .run_turn("edit to v3", |p| fs::write(p.join("demo.txt"), "v3").unwrap())
        .await;
    assert!(turn2.user.is_some());
    // The assistant checkpoint was replaced, not accumulated
    assert!(turn2.assistant.is_some());
    assert_ne!(turn1.assistant, turn2.assistant);
    assert_eq!(h.engine.status(), Some(3));

    h.engine.undo().await?;
    assert_eq!(h.read("demo.txt"), "v2");
    h.engine.undo().await?;
    assert_eq!(h.read("demo.txt"), "v1");
    h.engine.redo().await?;
    h.engine.redo().await?;
    assert_eq!(h.read("demo.txt"), "v3");
    Ok(())
}

#[tokio::test]
async fn test_undo_walks_back_through_turn_states() {
    let mut h = Harness::new();
    three_versions(&mut h).await;
    assert_eq!(h.read("main.rs"), "v3");

    // Each undo lands on the state the previous user message applied to
    assert!(matches!(
        h.engine.undo().await.unwrap(),
        HistoryStep::Restored { .. }
    ));
    assert_eq!(h.read("main.rs"), "v2");

    h.engine.undo().await.unwrap();
    assert_eq!(h.read("main.rs"), "v1");

    // The first turn started from an empty tree
    h.engine.undo().await.unwrap();
    assert!(!h.path().join("main.rs").exists());

    assert_eq!(
        h.engine.undo().await.unwrap(),
        HistoryStep::Boundary(Boundary::NoOlder)
    );
    assert!(!h.path().join("main.rs").exists());
}

#[tokio::test]
async fn test_redo_retraces_undo() {
    let mut h = Harness::new();
    three_versions(&mut h).await;

    h.engine.undo().await.unwrap();
    h.engine.undo().await.unwrap();
    assert_eq!(h.read("main.rs"), "v1");

    h.engine.redo().await.unwrap();
    assert_eq!(h.read("main.rs"), "v2");
    h.engine.redo().await.unwrap();
    assert_eq!(h.read("main.rs"), "v3");

    assert_eq!(
        h.engine.redo().await.unwrap(),
        HistoryStep::Boundary(Boundary::NoNewer)
    );
}

#[tokio::test]
async fn test_noop_turn_creates_no_checkpoints() {
    let mut h = Harness::new();
    let outcome = h.run_turn("just a question", |_| {}).await;
    assert!(!outcome.created_any());
    assert_eq!(h.engine.status(), Some(0));

    // A later identical-content turn is also a no-op
    h.run_turn("write", |p| fs::write(p.join("f.txt"), "x").unwrap())
        .await;
    let count = h.engine.status().unwrap();
    let outcome = h.run_turn("another question", |_| {}).await;
    assert!(!outcome.created_any());
    assert_eq!(h.engine.status(), Some(count));
}

#[tokio::test]
async fn test_only_one_assistant_checkpoint_survives() {
    let mut h = Harness::new();
    three_versions(&mut h).await;

    let list = h.engine.checkpoint_list(ListOrder::OldestFirst).unwrap();
    let assistants: Vec<_> = list
        .iter()
        .filter(|item| item.kind == CheckpointKind::Assistant)
        .collect();
    assert_eq!(assistants.len(), 1);
    // The surviving one is the newest entry overall
    assert_eq!(list.last().unwrap().kind, CheckpointKind::Assistant);
}

#[tokio::test]
async fn test_checkpoint_list_badges_and_previews() {
    let mut h = Harness::new();
    three_versions(&mut h).await;

    let list = h.engine.checkpoint_list(ListOrder::OldestFirst).unwrap();
    assert_eq!(list.len(), 4);
    let badges: Vec<&str> = list.iter().map(|i| i.badge.as_str()).collect();
    assert_eq!(badges, vec!["U1", "U2", "U3", "A3"]);
    assert_eq!(list[0].preview.as_deref(), Some("write v1"));
    assert_eq!(list[0].entry_id, Some(EntryId::new("u1")));

    let newest_first = h.engine.checkpoint_list(ListOrder::NewestFirst).unwrap();
    assert_eq!(newest_first.first().unwrap().badge, "A3");
}

#[tokio::test]
async fn test_jump_to_arbitrary_checkpoint() {
    let mut h = Harness::new();
    three_versions(&mut h).await;

    let list = h.engine.checkpoint_list(ListOrder::OldestFirst).unwrap();
    let u2 = list[1].id.clone();
    h.engine.jump_to(&u2).await.unwrap();
    assert_eq!(h.read("main.rs"), "v1");

    // The cursor followed the jump, so redo moves forward from there
    h.engine.redo().await.unwrap();
    assert_eq!(h.read("main.rs"), "v2");
}

#[tokio::test]
async fn test_restore_keeps_backup_of_discarded_state() {
    let mut h = Harness::new();
    three_versions(&mut h).await;

    // Uncommitted drift after the last turn
    fs::write(h.path().join("scratch.txt"), "precious").unwrap();
    h.engine.undo().await.unwrap();
    assert!(!h.path().join("scratch.txt").exists());

    // Redo moves forward along the timeline, not back to the drifted state;
    // the drift lives in the before-restore backup
    h.engine.redo().await.unwrap();
    assert_eq!(h.read("main.rs"), "v3");
}

#[tokio::test]
async fn test_late_assistant_entry_is_awaited() {
    let config = EngineConfig::default()
        .with_silent_checkpoints(false)
        .with_resolve_retry(30, Duration::from_millis(10));
    let mut h = Harness::with_config(config);

    h.engine.turn_start();
    h.conversation.push_user("u1", "write it");
    fs::write(h.path().join("f.txt"), "content").unwrap();

    // The transcript write lags behind the turn-end hook
    let ts = Utc::now();
    let writer = h.conversation.clone();
    let task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.push("a1", EntryRole::Assistant, ts, "finally");
    });

    let outcome = h.engine.turn_end(ts).await;
    task.await.unwrap();
    assert!(outcome.assistant.is_some());

    let list = h.engine.checkpoint_list(ListOrder::OldestFirst).unwrap();
    let assistant = list.iter().find(|i| i.kind == CheckpointKind::Assistant).unwrap();
    assert_eq!(assistant.entry_id, Some(EntryId::new("a1")));
}

#[tokio::test]
async fn test_clear_removes_everything() {
    let mut h = Harness::new();
    three_versions(&mut h).await;
    h.engine.undo().await.unwrap(); // leaves a backup ref behind

    let stats = h.engine.clear_checkpoints().unwrap();
    assert_eq!(stats.checkpoints_deleted, 4);
    assert_eq!(stats.backups_deleted, 1);
    assert!(stats.objects_swept > 0);

    assert_eq!(h.engine.status(), Some(0));
    assert!(h.engine.checkpoint_list(ListOrder::OldestFirst).unwrap().is_empty());
    assert_eq!(
        h.engine.undo().await.unwrap(),
        HistoryStep::Boundary(Boundary::NoOlder)
    );

    // Labels on the conversation are gone too
    let u1 = EntryId::new("u1");
    assert_eq!(h.conversation.label_of(&u1), None);
}

#[tokio::test]
async fn test_retention_cap_prunes_oldest() {
    let config = EngineConfig::default()
        .with_silent_checkpoints(false)
        .with_max_checkpoints(3);
    let mut h = Harness::with_config(config);

    for i in 1..=5 {
        h.run_turn("write", move |p| {
            fs::write(p.join("f.txt"), format!("v{}", i)).unwrap()
        })
        .await;
    }

    assert_eq!(h.engine.status(), Some(3));
    let list = h.engine.checkpoint_list(ListOrder::OldestFirst).unwrap();
    // The oldest user checkpoints were pruned; newest turns survive
    assert_eq!(list[0].entry_id, Some(EntryId::new("u4")));
}

#[tokio::test]
async fn test_checkpoints_survive_session_restart() {
    let mut h = Harness::new();
    three_versions(&mut h).await;

    // Same session id, fresh engine over the same worktree
    let conversation = h.conversation.clone();
    let mut engine = RewindEngine::new(
        EngineConfig::default().with_silent_checkpoints(false),
        conversation,
    );
    engine.session_start(SessionId::new("test-session"), h.path().to_path_buf());
    assert_eq!(engine.status(), Some(4));

    engine.undo().await.unwrap();
    assert_eq!(h.read("main.rs"), "v2");
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let mut h = Harness::new();
    three_versions(&mut h).await;

    let mut other = RewindEngine::new(
        EngineConfig::default().with_silent_checkpoints(false),
        MemoryConversation::new(),
    );
    other.session_switch(SessionId::new("other-session"), h.path().to_path_buf());
    assert_eq!(other.status(), Some(0));
    assert_eq!(
        other.undo().await.unwrap(),
        HistoryStep::Boundary(Boundary::NoOlder)
    );
}

#[tokio::test]
async fn test_navigation_gate() {
    let mut h = Harness::new();
    three_versions(&mut h).await;

    // No checkpoint on the destination: nothing to decide
    let outcome = h
        .engine
        .before_navigate(
            &EntryId::new("unknown"),
            &FixedChoice(NavigationChoice::RestoreDestination),
        )
        .await
        .unwrap();
    assert_eq!(outcome, GateOutcome::PassThrough);

    // Cancel aborts without touching files
    let outcome = h
        .engine
        .before_navigate(&EntryId::new("u2"), &FixedChoice(NavigationChoice::Cancel))
        .await
        .unwrap();
    assert_eq!(outcome, GateOutcome::Cancelled);
    assert_eq!(h.read("main.rs"), "v3");

    // Keep leaves files alone as well
    let outcome = h
        .engine
        .before_navigate(
            &EntryId::new("u2"),
            &FixedChoice(NavigationChoice::KeepCurrentFiles),
        )
        .await
        .unwrap();
    assert_eq!(outcome, GateOutcome::KeptFiles);
    assert_eq!(h.read("main.rs"), "v3");

    // Restore swaps the tree to the destination's checkpoint
    let outcome = h
        .engine
        .before_navigate(
            &EntryId::new("u2"),
            &FixedChoice(NavigationChoice::RestoreDestination),
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        GateOutcome::Restored {
            entry_id: EntryId::new("u2")
        }
    );
    assert_eq!(h.read("main.rs"), "v1");
}

#[tokio::test]
async fn test_unusable_worktree_disables_silently() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("does-not-exist");

    let mut engine = RewindEngine::new(
        EngineConfig::default().with_silent_checkpoints(false),
        MemoryConversation::new(),
    );
    engine.session_start(SessionId::new("s"), missing);
    assert!(!engine.is_active());
    assert_eq!(engine.status(), None);

    // Events are inert and commands degrade to empty results
    engine.turn_start();
    let outcome = engine.turn_end(Utc::now()).await;
    assert!(!outcome.created_any());
    assert_eq!(
        engine.undo().await.unwrap(),
        HistoryStep::Boundary(Boundary::NoOlder)
    );
    assert_eq!(
        engine.redo().await.unwrap(),
        HistoryStep::Boundary(Boundary::NoNewer)
    );
    assert!(engine.checkpoint_list(ListOrder::OldestFirst).unwrap().is_empty());
    assert_eq!(engine.clear_checkpoints().unwrap(), ClearStats::default());

    // Only an engine that never saw a session errors
    let mut fresh: RewindEngine<MemoryConversation> = RewindEngine::new(
        EngineConfig::default().with_silent_checkpoints(false),
        MemoryConversation::new(),
    );
    assert!(fresh.undo().await.is_err());

    // A session switch to a usable worktree recovers
    engine.session_switch(SessionId::new("s"), dir.path().to_path_buf());
    assert!(engine.is_active());
}

#[tokio::test]
async fn test_silent_mode_hides_status() {
    let config = EngineConfig::default().with_silent_checkpoints(true);
    let mut h = Harness::with_config(config);
    h.run_turn("write", |p| fs::write(p.join("f.txt"), "x").unwrap())
        .await;
    assert_eq!(h.engine.status(), None);
}

#[tokio::test]
async fn test_labels_reach_the_conversation() {
    let mut h = Harness::new();
    three_versions(&mut h).await;

    assert_eq!(h.conversation.label_of(&EntryId::new("u1")), Some("U1".into()));
    assert_eq!(h.conversation.label_of(&EntryId::new("u3")), Some("U3".into()));
    assert_eq!(h.conversation.label_of(&EntryId::new("a3")), Some("A3".into()));
    assert_eq!(h.conversation.label_of(&EntryId::new("a1")), None);
}

#[tokio::test]
async fn test_turn_spanning_subdirectories_and_deletions() {
    let mut h = Harness::new();
    h.run_turn("scaffold", |p| {
        fs::create_dir_all(p.join("src/nested")).unwrap();
        fs::write(p.join("src/nested/deep.rs"), "mod deep;").unwrap();
        fs::write(p.join("top.txt"), "top").unwrap();
    })
    .await;
    h.run_turn("rework", |p| {
        fs::remove_file(p.join("src/nested/deep.rs")).unwrap();
        fs::remove_dir(p.join("src/nested")).unwrap();
        fs::write(p.join("renamed.txt"), "top").unwrap();
        fs::remove_file(p.join("top.txt")).unwrap();
    })
    .await;

    h.engine.undo().await.unwrap();
    assert!(h.path().join("src/nested/deep.rs").exists());
    assert!(h.path().join("top.txt").exists());
    assert!(!h.path().join("renamed.txt").exists());

    h.engine.redo().await.unwrap();
    assert!(!h.path().join("src/nested").exists());
    assert!(h.path().join("renamed.txt").exists());
}
