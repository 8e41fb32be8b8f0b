//! Session lifecycle: creation, cloning, deletion
//!
//! Creation is request-coalesced: concurrent create calls that share a
//! nonce settle to the same new session instead of racing to create
//! duplicates. The coalescing map is ordinary owned state behind a mutex,
//! cleared once the creation settles, so a later call with the same nonce
//! starts fresh.
//!
//! Clones are two-phase: the synchronous part materializes the new
//! session's metadata, truncated logs and cut-point snapshot so the clone
//! is immediately usable, while a background task copies the full version
//! subtree and reports any failure through the notifier (there is no
//! caller left to throw to).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core_types::ChatEntry;
use crate::errors::StoreError;
use crate::notify::{ChatStatus, ChatStatusEvent, Notifier, SessionCreatedEvent};
use crate::snapshot::FileSnapshot;
use crate::store::{write_logs, Session, SessionState, SessionStore};

type PendingCreate = Shared<BoxFuture<'static, Result<Session, StoreError>>>;

/// Result of a clone: the immediately usable session plus the background
/// hydration task copying the version subtree.
pub struct CloneHandle {
    pub session: Session,
    pub hydration: JoinHandle<Result<(), StoreError>>,
}

pub struct SessionLifecycle {
    store: Arc<SessionStore>,
    notifier: Arc<dyn Notifier>,
    pending: Mutex<HashMap<String, PendingCreate>>,
}

impl SessionLifecycle {
    pub fn new(store: Arc<SessionStore>, notifier: Arc<dyn Notifier>) -> Self {
        SessionLifecycle {
            store,
            notifier,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a fresh session seeded with the starter page as version 0.
    pub async fn create_session(
        &self,
        image_generation_allowed: bool,
    ) -> Result<Session, StoreError> {
        Self::create_inner(self.store.clone(), image_generation_allowed).await
    }

    /// Create, deduplicated by nonce: while a creation for this nonce is in
    /// flight (or just settled), callers receive the same session.
    pub async fn get_or_create(
        &self,
        nonce: &str,
        image_generation_allowed: bool,
    ) -> Result<Session, StoreError> {
        let shared = {
            let mut pending = self.pending.lock().await;
            if let Some(existing) = pending.get(nonce) {
                existing.clone()
            } else {
                let fut: PendingCreate =
                    Self::create_inner(self.store.clone(), image_generation_allowed)
                        .boxed()
                        .shared();
                pending.insert(nonce.to_string(), fut.clone());
                fut
            }
        };

        let result = shared.await;
        self.pending.lock().await.remove(nonce);
        result
    }

    async fn create_inner(
        store: Arc<SessionStore>,
        image_generation_allowed: bool,
    ) -> Result<Session, StoreError> {
        let id = Uuid::new_v4().to_string();
        let meta = Session {
            id: id.clone(),
            group: random_group(),
            current_version: 0,
            last_turn: 0,
            image_generation_allowed,
            updated_at: Utc::now(),
        };
        let state = SessionState {
            meta,
            turns: Vec::new(),
            snapshot: FileSnapshot::starter(),
            history: Vec::new(),
            context: Vec::new(),
        };
        let session = store.insert_new(state).await?;
        log::info!("Created session {}", session.id);
        Ok(session)
    }

    /// Clones a session at a version. The clone's history contains no
    /// entries beyond the turn associated with that version.
    pub async fn clone_at_version(
        &self,
        source_id: &str,
        version: u64,
    ) -> Result<CloneHandle, StoreError> {
        let source = self.store.get_session(source_id).await?;
        if version > source.current_version {
            return Err(StoreError::CloneSourceInvalid(format!(
                "version {} beyond head {} of session {}",
                version, source.current_version, source_id
            )));
        }
        let context = self.store.read_context(source_id).await?;
        let cut_turn = last_turn_at_version(&context, version);
        self.clone_with_id(source_id, &Uuid::new_v4().to_string(), random_group(), version, cut_turn)
            .await
    }

    /// Clones a session as of a turn: everything up to and including that
    /// turn's entries and the version they are tagged with.
    pub async fn clone_at_turn(
        &self,
        source_id: &str,
        turn: u64,
    ) -> Result<CloneHandle, StoreError> {
        let source = self.store.get_session(source_id).await?;
        if turn > source.last_turn {
            return Err(StoreError::CloneSourceInvalid(format!(
                "turn {} beyond last turn {} of session {}",
                turn, source.last_turn, source_id
            )));
        }
        self.clone_at_turn_with_id(source_id, &Uuid::new_v4().to_string(), random_group(), turn)
            .await
    }

    /// Turn-based clone with a caller-allocated id and group, so branch
    /// fan-out can announce siblings before their hydration runs.
    pub(crate) async fn clone_at_turn_with_id(
        &self,
        source_id: &str,
        new_id: &str,
        group: i32,
        turn: u64,
    ) -> Result<CloneHandle, StoreError> {
        let context = self.store.read_context(source_id).await?;
        let version = context
            .iter()
            .filter(|entry| entry.turn <= turn)
            .map(|entry| entry.version)
            .max()
            .unwrap_or(0);
        self.clone_with_id(source_id, new_id, group, version, turn)
            .await
    }

    /// Shared clone path. The id and group are allocated by the caller so
    /// branch fan-out can announce siblings before their hydration runs.
    pub(crate) async fn clone_with_id(
        &self,
        source_id: &str,
        new_id: &str,
        group: i32,
        version: u64,
        cut_turn: u64,
    ) -> Result<CloneHandle, StoreError> {
        let source = self.store.get_session(source_id).await?;
        let snapshot = self.store.read_snapshot(source_id, version).await?;
        let history = truncate_log(self.store.read_history(source_id).await?, cut_turn);
        let context = truncate_log(self.store.read_context(source_id).await?, cut_turn);
        let turns: Vec<_> = self
            .store
            .turn_records(source_id)
            .await?
            .into_iter()
            .filter(|record| record.turn <= cut_turn)
            .collect();

        let meta = Session {
            id: new_id.to_string(),
            group,
            current_version: version,
            last_turn: cut_turn,
            image_generation_allowed: source.image_generation_allowed,
            updated_at: Utc::now(),
        };
        let state = SessionState {
            meta,
            turns,
            snapshot: snapshot.clone(),
            history: history.clone(),
            context: context.clone(),
        };
        let session = self.store.insert_new(state).await?;
        log::info!(
            "Cloned session {} from {} at version {} (turn {})",
            new_id,
            source_id,
            version,
            cut_turn
        );

        self.notifier
            .session_created(SessionCreatedEvent {
                source_session_id: source_id.to_string(),
                new_session_id: new_id.to_string(),
                group: Some(group),
            })
            .await;

        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let src = source_id.to_string();
        let dst = new_id.to_string();
        let hydration = tokio::spawn(async move {
            let result = hydrate_clone(&store, &src, &dst, version, history, context).await;
            if let Err(e) = &result {
                log::error!("Clone hydration failed for {}: {}", dst, e);
                notifier
                    .chat_status(
                        ChatStatusEvent::new(dst.clone(), ChatStatus::Error)
                            .with_message(format!("failed to copy session history: {}", e)),
                    )
                    .await;
            }
            result
        });

        Ok(CloneHandle { session, hydration })
    }

    pub async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete_session(id).await
    }
}

/// Copies the source's version subtree, then rewrites the cut-point
/// directory with the truncated logs so the clone's past stops at the cut.
async fn hydrate_clone(
    store: &SessionStore,
    source_id: &str,
    target_id: &str,
    version: u64,
    history: Vec<ChatEntry>,
    context: Vec<ChatEntry>,
) -> Result<(), StoreError> {
    store.clone_subtree(source_id, target_id, version).await?;
    let dir = store.version_dir(target_id, version);
    write_logs(&dir, &history, &context).await?;
    Ok(())
}

fn truncate_log(entries: Vec<ChatEntry>, cut_turn: u64) -> Vec<ChatEntry> {
    entries
        .into_iter()
        .filter(|entry| entry.turn <= cut_turn)
        .collect()
}

/// The last turn whose entries are tagged at or below `version`.
fn last_turn_at_version(context: &[ChatEntry], version: u64) -> u64 {
    context
        .iter()
        .filter(|entry| entry.version <= version)
        .map(|entry| entry.turn)
        .max()
        .unwrap_or(0)
}

pub(crate) fn random_group() -> i32 {
    rand::thread_rng().gen_range(0..10_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullNotifier;
    use tempfile::TempDir;

    fn lifecycle(temp: &TempDir) -> (Arc<SessionStore>, SessionLifecycle) {
        let store = Arc::new(SessionStore::new(temp.path()));
        let lifecycle = SessionLifecycle::new(store.clone(), Arc::new(NullNotifier));
        (store, lifecycle)
    }

    #[tokio::test]
    async fn create_writes_version_zero() {
        let temp = TempDir::new().unwrap();
        let (store, lifecycle) = lifecycle(&temp);

        let session = lifecycle.create_session(false).await.unwrap();
        assert_eq!(session.current_version, 0);
        assert_eq!(session.last_turn, 0);

        let snapshot = store.read_snapshot(&session.id, 0).await.unwrap();
        assert_eq!(snapshot, FileSnapshot::starter());
        assert!(store.version_dir(&session.id, 0).join("index.html").exists());
    }

    #[tokio::test]
    async fn concurrent_creates_with_same_nonce_coalesce() {
        let temp = TempDir::new().unwrap();
        let (_store, lifecycle) = lifecycle(&temp);

        let (first, second) = tokio::join!(
            lifecycle.get_or_create("nonce-1", false),
            lifecycle.get_or_create("nonce-1", false)
        );
        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first.id, second.id);

        // Settled: the same nonce now creates a fresh session.
        let third = lifecycle.get_or_create("nonce-1", false).await.unwrap();
        assert_ne!(third.id, first.id);
    }

    #[tokio::test]
    async fn clone_at_version_zero_is_identical_and_empty() {
        let temp = TempDir::new().unwrap();
        let (store, lifecycle) = lifecycle(&temp);

        let source = lifecycle.create_session(true).await.unwrap();
        let clone = lifecycle.clone_at_version(&source.id, 0).await.unwrap();
        clone.hydration.await.unwrap().unwrap();

        assert_ne!(clone.session.id, source.id);
        assert!(clone.session.image_generation_allowed);
        let source_snapshot = store.read_snapshot(&source.id, 0).await.unwrap();
        let clone_snapshot = store.read_snapshot(&clone.session.id, 0).await.unwrap();
        assert_eq!(source_snapshot, clone_snapshot);
        assert!(store
            .read_history(&clone.session.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn clone_beyond_head_is_invalid() {
        let temp = TempDir::new().unwrap();
        let (_store, lifecycle) = lifecycle(&temp);

        let source = lifecycle.create_session(false).await.unwrap();
        let result = lifecycle.clone_at_version(&source.id, 5).await;
        assert!(matches!(result, Err(StoreError::CloneSourceInvalid(_))));

        let result = lifecycle.clone_at_turn(&source.id, 3).await;
        assert!(matches!(result, Err(StoreError::CloneSourceInvalid(_))));
    }
}
