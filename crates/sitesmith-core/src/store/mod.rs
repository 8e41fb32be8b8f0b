//! Versioned session store
//!
//! Owns the mapping from session id to version snapshots and conversation
//! logs, persisted as one directory per session with one subdirectory per
//! version. An in-memory map of session state is the authoritative cache,
//! lazily hydrated from disk on first access and written back on every
//! mutating call; the on-disk tree is the source of truth across restarts.
//!
//! Layout per session:
//! ```text
//! <root>/<sessionId>/session.json
//! <root>/<sessionId>/versions/<n>/index.html
//! <root>/<sessionId>/versions/<n>/styles.css
//! <root>/<sessionId>/versions/<n>/script.js
//! <root>/<sessionId>/versions/<n>/messages.json
//! <root>/<sessionId>/versions/<n>/context.json
//! <root>/<sessionId>/versions/<n>/images.json
//! ```

pub mod ledger;
pub mod version;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;

use crate::core_types::{ChatEntry, Selection};
use crate::errors::StoreError;
use crate::snapshot::FileSnapshot;

pub use ledger::UndoOutcome;

pub const SESSION_FILE: &str = "session.json";
pub const MESSAGES_FILE: &str = "messages.json";
pub const CONTEXT_FILE: &str = "context.json";

/// Session metadata as persisted in `session.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Display tag used by the UI to cluster branched siblings.
    pub group: i32,
    /// HEAD: the latest version number. Only ever increases.
    pub current_version: u64,
    /// Number of the most recent user turn. Only ever increases, except
    /// through undo.
    pub last_turn: u64,
    pub image_generation_allowed: bool,
    pub updated_at: DateTime<Utc>,
}

/// Per-turn record written at turn creation. `version` is the HEAD at the
/// moment the turn began, which is what turn-based static serving resolves
/// against, and what undo restores.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub turn: u64,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    pub input: String,
}

#[derive(Serialize, Deserialize)]
struct PersistedSession {
    #[serde(flatten)]
    meta: Session,
    #[serde(default)]
    turns: Vec<TurnRecord>,
}

/// Full in-memory state for one hydrated session.
pub(crate) struct SessionState {
    pub(crate) meta: Session,
    pub(crate) turns: Vec<TurnRecord>,
    /// Live snapshot of HEAD. Fallback for reads when the HEAD directory
    /// has not been flushed yet.
    pub(crate) snapshot: FileSnapshot,
    pub(crate) history: Vec<ChatEntry>,
    pub(crate) context: Vec<ChatEntry>,
}

pub struct SessionStore {
    root: PathBuf,
    pub(crate) sessions: RwLock<HashMap<String, SessionState>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SessionStore {
            root: root.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(sanitize_id(id))
    }

    pub fn versions_dir(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("versions")
    }

    pub fn version_dir(&self, id: &str, version: u64) -> PathBuf {
        self.versions_dir(id).join(version.to_string())
    }

    pub(crate) fn session_file(&self, id: &str) -> PathBuf {
        self.session_dir(id).join(SESSION_FILE)
    }

    /// Hydrates a session from disk into the in-memory map if it is not
    /// already there.
    pub(crate) async fn ensure_loaded(&self, id: &str) -> Result<(), StoreError> {
        {
            let sessions = self.sessions.read().await;
            if sessions.contains_key(id) {
                return Ok(());
            }
        }

        let meta_path = self.session_file(id);
        let contents = match fs::read_to_string(&meta_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::SessionNotFound(id.to_string()));
            }
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        let persisted: PersistedSession = serde_json::from_str(&contents)?;

        let head_dir = self.version_dir(id, persisted.meta.current_version);
        let snapshot = FileSnapshot::read_dir(&head_dir).await?;
        let history = read_log(&head_dir.join(MESSAGES_FILE)).await?;
        let context = read_log(&head_dir.join(CONTEXT_FILE)).await?;

        log::info!(
            "Hydrated session {} at version {} ({} turns)",
            id,
            persisted.meta.current_version,
            persisted.turns.len()
        );

        let mut sessions = self.sessions.write().await;
        sessions.entry(id.to_string()).or_insert(SessionState {
            meta: persisted.meta,
            turns: persisted.turns,
            snapshot,
            history,
            context,
        });
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> Result<Session, StoreError> {
        self.ensure_loaded(id).await?;
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|state| state.meta.clone())
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    /// Registers a brand-new session: inserts the in-memory state, writes
    /// version 0 with its logs, and persists `session.json`.
    pub(crate) async fn insert_new(&self, state: SessionState) -> Result<Session, StoreError> {
        let id = state.meta.id.clone();
        let head_dir = self.version_dir(&id, state.meta.current_version);
        state.snapshot.write_dir(&head_dir).await?;
        write_logs(&head_dir, &state.history, &state.context).await?;
        write_session_file(&self.session_file(&id), &state.meta, &state.turns).await?;

        let session = state.meta.clone();
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, state);
        Ok(session)
    }

    /// Removes the session from memory and deletes its whole on-disk
    /// subtree. The only way a session ever goes away.
    pub async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        {
            let mut sessions = self.sessions.write().await;
            sessions.remove(id);
        }
        let dir = self.session_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                log::info!("Deleted session {}", id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::SessionNotFound(id.to_string()))
            }
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }
}

/// Folder-safe form of a session id.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

pub(crate) async fn read_log(path: &Path) -> Result<Vec<ChatEntry>, StoreError> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StoreError::Io(e.to_string())),
    }
}

pub(crate) async fn write_logs(
    dir: &Path,
    history: &[ChatEntry],
    context: &[ChatEntry],
) -> Result<(), StoreError> {
    fs::create_dir_all(dir).await?;
    fs::write(
        dir.join(MESSAGES_FILE),
        serde_json::to_string_pretty(history)?,
    )
    .await?;
    fs::write(
        dir.join(CONTEXT_FILE),
        serde_json::to_string_pretty(context)?,
    )
    .await?;
    Ok(())
}

pub(crate) async fn write_session_file(
    path: &Path,
    meta: &Session,
    turns: &[TurnRecord],
) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let persisted = PersistedSession {
        meta: meta.clone(),
        turns: turns.to_vec(),
    };
    fs::write(path, serde_json::to_string_pretty(&persisted)?).await?;
    Ok(())
}

/// Recursively copies a directory tree. Iterative so deeply nested asset
/// directories don't need boxed recursion.
pub(crate) async fn deep_copy_dir(src: &Path, dst: &Path) -> Result<(), StoreError> {
    let mut stack = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        fs::create_dir_all(&to).await?;
        let mut entries = fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let target = to.join(entry.file_name());
            if file_type.is_dir() {
                stack.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), target).await?;
            }
        }
    }
    Ok(())
}
