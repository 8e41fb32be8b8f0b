//! End-to-end store behavior: version monotonicity, idempotent
//! initialization, historical edits, undo, cloning, restart hydration.

use std::sync::Arc;

use tempfile::TempDir;

use sitesmith_core::core_types::ChatEntry;
use sitesmith_core::errors::StoreError;
use sitesmith_core::lifecycle::SessionLifecycle;
use sitesmith_core::notify::NullNotifier;
use sitesmith_core::snapshot::{FileSnapshot, PageFile};
use sitesmith_core::store::{Session, SessionStore};

fn harness(temp: &TempDir) -> (Arc<SessionStore>, SessionLifecycle) {
    let store = Arc::new(SessionStore::new(temp.path()));
    let lifecycle = SessionLifecycle::new(store.clone(), Arc::new(NullNotifier));
    (store, lifecycle)
}

/// Runs one full editing turn: begin, init, commit, merge assistant output.
async fn editing_turn(store: &SessionStore, session: &Session, styles: &str) -> u64 {
    store
        .begin_turn(&session.id, ChatEntry::user("restyle the page", None))
        .await
        .unwrap();
    let target = store.init_next_version(&session.id).await.unwrap();
    let mut files = store
        .read_snapshot(&session.id, target - 1)
        .await
        .unwrap();
    files.set(PageFile::Styles, styles.to_string());
    store
        .commit_files(&session.id, files, target)
        .await
        .unwrap();
    store
        .append_assistant_entries(
            &session.id,
            vec![ChatEntry::assistant("Restyled the page.")],
        )
        .await
        .unwrap();
    target
}

#[tokio::test]
async fn head_only_moves_forward() {
    let temp = TempDir::new().unwrap();
    let (store, lifecycle) = harness(&temp);
    let session = lifecycle.create_session(false).await.unwrap();

    let mut previous = session.current_version;
    for round in 0..3 {
        let styles = format!("body {{ --round: {}; }}\n", round);
        let target = editing_turn(&store, &session, &styles).await;
        assert!(target > previous);
        let current = store.get_session(&session.id).await.unwrap();
        assert_eq!(current.current_version, target);
        previous = target;
    }

    // Committing at the current head rewrites it without moving forward.
    let head = store.get_session(&session.id).await.unwrap().current_version;
    let files = store.read_snapshot(&session.id, head).await.unwrap();
    let after = store
        .commit_files(&session.id, files, head)
        .await
        .unwrap();
    assert_eq!(after.current_version, head);
}

#[tokio::test]
async fn init_next_version_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let (store, lifecycle) = harness(&temp);
    let session = lifecycle.create_session(false).await.unwrap();

    let first = store.init_next_version(&session.id).await.unwrap();
    let second = store.init_next_version(&session.id).await.unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 1);

    // HEAD has not moved, and the copied snapshot matches version 0.
    assert_eq!(
        store.get_session(&session.id).await.unwrap().current_version,
        0
    );
    let v0 = store.read_snapshot(&session.id, 0).await.unwrap();
    let v1 = store.read_snapshot(&session.id, 1).await.unwrap();
    assert_eq!(v0, v1);
}

#[tokio::test]
async fn commit_without_init_is_rejected() {
    let temp = TempDir::new().unwrap();
    let (store, lifecycle) = harness(&temp);
    let session = lifecycle.create_session(false).await.unwrap();

    let files = FileSnapshot::starter();
    let result = store.commit_files(&session.id, files, 1).await;
    assert!(matches!(result, Err(StoreError::NotInitialized { .. })));
}

#[tokio::test]
async fn reads_beyond_head_are_rejected() {
    let temp = TempDir::new().unwrap();
    let (store, lifecycle) = harness(&temp);
    let session = lifecycle.create_session(false).await.unwrap();

    let result = store.read_snapshot(&session.id, 3).await;
    assert!(matches!(
        result,
        Err(StoreError::VersionExceedsHead {
            requested: 3,
            head: 0
        })
    ));
}

#[tokio::test]
async fn historical_edit_leaves_head_untouched() {
    let temp = TempDir::new().unwrap();
    let (store, lifecycle) = harness(&temp);
    let session = lifecycle.create_session(false).await.unwrap();

    editing_turn(&store, &session, "body { background: red; }\n").await;
    editing_turn(&store, &session, "body { background: green; }\n").await;

    let head_before = store.read_snapshot(&session.id, 2).await.unwrap();
    store
        .edit_historical_file(
            &session.id,
            0,
            PageFile::Styles,
            "body { background: rewritten; }\n".to_string(),
        )
        .await
        .unwrap();

    let head_after = store.read_snapshot(&session.id, 2).await.unwrap();
    assert_eq!(head_before, head_after);
    let v0 = store.read_snapshot(&session.id, 0).await.unwrap();
    assert_eq!(v0.styles, "body { background: rewritten; }\n");
    // HEAD pointer did not move.
    assert_eq!(
        store.get_session(&session.id).await.unwrap().current_version,
        2
    );
}

#[tokio::test]
async fn undo_restores_prior_turn_and_eventually_runs_dry() {
    let temp = TempDir::new().unwrap();
    let (store, lifecycle) = harness(&temp);
    let session = lifecycle.create_session(false).await.unwrap();

    editing_turn(&store, &session, "body { background: red; }\n").await;
    editing_turn(&store, &session, "body { background: green; }\n").await;

    let outcome = store.undo_last_turn(&session.id).await.unwrap();
    assert_eq!(outcome.restored_input.as_deref(), Some("restyle the page"));

    let meta = store.get_session(&session.id).await.unwrap();
    assert_eq!(meta.current_version, 1);
    assert_eq!(meta.last_turn, 1);
    let snapshot = store.read_snapshot(&session.id, 1).await.unwrap();
    assert_eq!(snapshot.styles, "body { background: red; }\n");

    // Turn 2's entries are gone from both logs.
    assert!(store
        .read_history(&session.id)
        .await
        .unwrap()
        .iter()
        .all(|e| e.turn <= 1));
    assert!(store
        .read_context(&session.id)
        .await
        .unwrap()
        .iter()
        .all(|e| e.turn <= 1));

    store.undo_last_turn(&session.id).await.unwrap();
    let meta = store.get_session(&session.id).await.unwrap();
    assert_eq!(meta.current_version, 0);
    assert_eq!(meta.last_turn, 0);

    let result = store.undo_last_turn(&session.id).await;
    assert!(matches!(result, Err(StoreError::NothingToUndo)));
}

#[tokio::test]
async fn undo_returns_the_selection_for_ui_restore() {
    let temp = TempDir::new().unwrap();
    let (store, lifecycle) = harness(&temp);
    let session = lifecycle.create_session(false).await.unwrap();

    let entry = ChatEntry::user(
        "make this element bigger",
        Some(sitesmith_core::core_types::Selection {
            selector: "#hero > h1".to_string(),
        }),
    );
    store.begin_turn(&session.id, entry).await.unwrap();

    let outcome = store.undo_last_turn(&session.id).await.unwrap();
    assert_eq!(
        outcome.restored_selection.map(|s| s.selector),
        Some("#hero > h1".to_string())
    );
}

#[tokio::test]
async fn turn_resolution_uses_the_head_at_turn_start() {
    let temp = TempDir::new().unwrap();
    let (store, lifecycle) = harness(&temp);
    let session = lifecycle.create_session(false).await.unwrap();

    editing_turn(&store, &session, "body { background: red; }\n").await;
    editing_turn(&store, &session, "body { background: green; }\n").await;

    assert_eq!(
        store.resolve_version_for_turn(&session.id, 0).await.unwrap(),
        0
    );
    assert_eq!(
        store.resolve_version_for_turn(&session.id, 1).await.unwrap(),
        0
    );
    assert_eq!(
        store.resolve_version_for_turn(&session.id, 2).await.unwrap(),
        1
    );
    assert!(matches!(
        store.resolve_version_for_turn(&session.id, 9).await,
        Err(StoreError::TurnNotFound(9))
    ));
}

#[tokio::test]
async fn clone_at_version_is_byte_identical_and_truncated() {
    let temp = TempDir::new().unwrap();
    let (store, lifecycle) = harness(&temp);
    let session = lifecycle.create_session(false).await.unwrap();

    editing_turn(&store, &session, "body { background: red; }\n").await;
    editing_turn(&store, &session, "body { background: green; }\n").await;

    let clone = lifecycle.clone_at_version(&session.id, 1).await.unwrap();
    clone.hydration.await.unwrap().unwrap();

    let source_v1 = store.read_snapshot(&session.id, 1).await.unwrap();
    let clone_v1 = store
        .read_snapshot(&clone.session.id, 1)
        .await
        .unwrap();
    assert_eq!(source_v1, clone_v1);
    assert_eq!(clone.session.current_version, 1);
    assert_eq!(clone.session.last_turn, 1);

    // No entries beyond the turn associated with the cut version.
    let history = store.read_history(&clone.session.id).await.unwrap();
    assert!(!history.is_empty());
    assert!(history.iter().all(|e| e.turn <= 1));

    // The clone advances independently of its source.
    editing_turn(
        &store,
        &clone.session,
        "body { background: magenta; }\n",
    )
    .await;
    assert_eq!(
        store.get_session(&session.id).await.unwrap().current_version,
        2
    );
    assert_eq!(
        store
            .get_session(&clone.session.id)
            .await
            .unwrap()
            .current_version,
        2
    );
    let source_v2 = store.read_snapshot(&session.id, 2).await.unwrap();
    assert_eq!(source_v2.styles, "body { background: green; }\n");
}

#[tokio::test]
async fn clone_picks_up_historical_edits() {
    let temp = TempDir::new().unwrap();
    let (store, lifecycle) = harness(&temp);
    let session = lifecycle.create_session(false).await.unwrap();

    editing_turn(&store, &session, "body { background: red; }\n").await;
    store
        .edit_historical_file(
            &session.id,
            0,
            PageFile::Script,
            "// patched at version zero\n".to_string(),
        )
        .await
        .unwrap();

    let clone = lifecycle.clone_at_version(&session.id, 1).await.unwrap();
    clone.hydration.await.unwrap().unwrap();

    let clone_v0 = store.read_snapshot(&clone.session.id, 0).await.unwrap();
    assert_eq!(clone_v0.script, "// patched at version zero\n");
}

#[tokio::test]
async fn sessions_survive_a_restart() {
    let temp = TempDir::new().unwrap();
    let session = {
        let (store, lifecycle) = harness(&temp);
        let session = lifecycle.create_session(true).await.unwrap();
        editing_turn(&store, &session, "body { background: red; }\n").await;
        session
    };

    // A fresh store over the same root hydrates from disk.
    let store = SessionStore::new(temp.path());
    let loaded = store.get_session(&session.id).await.unwrap();
    assert_eq!(loaded.current_version, 1);
    assert_eq!(loaded.last_turn, 1);
    assert!(loaded.image_generation_allowed);

    let snapshot = store.read_snapshot(&session.id, 1).await.unwrap();
    assert_eq!(snapshot.styles, "body { background: red; }\n");
    let history = store.read_history(&session.id).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn delete_removes_the_whole_subtree() {
    let temp = TempDir::new().unwrap();
    let (store, lifecycle) = harness(&temp);
    let session = lifecycle.create_session(false).await.unwrap();

    store.delete_session(&session.id).await.unwrap();
    assert!(!store.session_dir(&session.id).exists());
    assert!(matches!(
        store.get_session(&session.id).await,
        Err(StoreError::SessionNotFound(_))
    ));
    assert!(matches!(
        store.delete_session(&session.id).await,
        Err(StoreError::SessionNotFound(_))
    ));
}
