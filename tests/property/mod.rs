//! Property-based tests for naming and timeline invariants

use proptest::prelude::*;
use rewind::timeline::SessionTimeline;
use rewind::types::{
    parse_session_ref, sanitize_id, user_ref_name, assistant_ref_name, Boundary, CheckpointId,
    CheckpointKind, CheckpointRecord, EntryId, ParsedRef, SessionId, TreeId,
};

/// Session ids that cannot collide with the `assistant` ref-name segment
fn session_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9][a-zA-Z0-9._-]{0,20}".prop_filter("reserved prefix", |s| !s.starts_with("assistant"))
}

fn entry_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9._/-]{1,30}"
}

proptest! {
    #[test]
    fn prop_sanitize_produces_storage_safe_ids(id in "\\PC{0,40}") {
        let sanitized = sanitize_id(&id);
        prop_assert!(sanitized.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        // Character count is preserved, so distinct positions stay distinct
        prop_assert_eq!(sanitized.chars().count(), id.chars().count());
        // Sanitizing twice changes nothing
        prop_assert_eq!(sanitize_id(&sanitized), sanitized.clone());
    }

    #[test]
    fn prop_ref_names_parse_back(
        session in session_strategy(),
        entry in entry_strategy(),
        ts in 0i64..=4_102_444_800_000,
    ) {
        let session = SessionId::new(session);
        let entry = EntryId::new(entry);

        let user = user_ref_name(&session, ts, &entry);
        prop_assert_eq!(
            parse_session_ref(&user, &session),
            Some(ParsedRef::Checkpoint {
                kind: CheckpointKind::User,
                timestamp_ms: ts,
                entry: entry.sanitized(),
            })
        );

        let assistant = assistant_ref_name(&session, ts, &entry);
        prop_assert_eq!(
            parse_session_ref(&assistant, &session),
            Some(ParsedRef::Checkpoint {
                kind: CheckpointKind::Assistant,
                timestamp_ms: ts,
                entry: entry.sanitized(),
            })
        );
    }

    #[test]
    fn prop_foreign_session_refs_do_not_parse(
        mine in session_strategy(),
        theirs in session_strategy(),
        entry in entry_strategy(),
        ts in 0i64..=4_102_444_800_000,
    ) {
        let mine = SessionId::new(mine);
        let theirs = SessionId::new(theirs);
        prop_assume!(mine != theirs);
        // A shorter id that prefixes the other can shadow its refs in a flat
        // namespace; such ids are never both in play for one store
        prop_assume!(!theirs.as_str().starts_with(mine.as_str()));

        let entry = EntryId::new(entry);
        prop_assert_eq!(parse_session_ref(&user_ref_name(&theirs, ts, &entry), &mine), None);
        prop_assert_eq!(parse_session_ref(&assistant_ref_name(&theirs, ts, &entry), &mine), None);
    }

    #[test]
    fn prop_timeline_cursor_stays_in_bounds(
        len in 0usize..12,
        moves in proptest::collection::vec(any::<bool>(), 0..40),
    ) {
        let records: Vec<CheckpointRecord> = (0..len)
            .map(|i| CheckpointRecord {
                id: CheckpointId(format!("c{}", i)),
                entry: format!("e{}", i),
                kind: CheckpointKind::User,
                timestamp: chrono::DateTime::from_timestamp_millis(i as i64 * 1000).unwrap(),
                tree_id: TreeId(format!("{:0>64}", i)),
            })
            .collect();
        let mut timeline = SessionTimeline::new();
        timeline.rebuild(records);

        for backwards in moves {
            let target = if backwards { timeline.undo_target() } else { timeline.redo_target() };
            match target {
                Ok(record) => {
                    let id = record.id.clone();
                    timeline.set_cursor_to(&id);
                    prop_assert_eq!(&timeline.cursor_record().unwrap().id, &id);
                }
                Err(Boundary::NoOlder) => {
                    // At the oldest (or empty) end: undo must keep failing
                    prop_assert!(backwards);
                }
                Err(Boundary::NoNewer) => {
                    prop_assert!(!backwards);
                }
            }
        }
    }

    #[test]
    fn prop_undo_then_redo_is_identity(len in 2usize..10, start in 1usize..9) {
        prop_assume!(start < len);
        let records: Vec<CheckpointRecord> = (0..len)
            .map(|i| CheckpointRecord {
                id: CheckpointId(format!("c{}", i)),
                entry: format!("e{}", i),
                kind: CheckpointKind::User,
                timestamp: chrono::DateTime::from_timestamp_millis(i as i64 * 1000).unwrap(),
                tree_id: TreeId(format!("{:0>64}", i)),
            })
            .collect();
        let mut timeline = SessionTimeline::new();
        timeline.rebuild(records);
        timeline.set_cursor_to(&CheckpointId(format!("c{}", start)));

        let before = timeline.cursor_record().unwrap().id.clone();
        let undo_to = timeline.undo_target().unwrap().id.clone();
        timeline.set_cursor_to(&undo_to);
        let redo_to = timeline.redo_target().unwrap().id.clone();
        timeline.set_cursor_to(&redo_to);
        prop_assert_eq!(timeline.cursor_record().unwrap().id.clone(), before);
    }
}
