//! Turn ledger: user turns, conversation logs, undo
//!
//! Every user instruction opens a turn. The turn record pins the version
//! that was HEAD when the turn began, which is what turn-based previews
//! resolve against and what undo restores. Two logs are kept side by side:
//! the UI-facing history and the full model-facing context.

use crate::core_types::{ChatEntry, Role, Selection};
use crate::errors::StoreError;
use crate::snapshot::FileSnapshot;

use super::{write_logs, write_session_file, SessionStore, TurnRecord};

/// What undo gives back to the caller so the UI can restore its state.
#[derive(Debug, Clone)]
pub struct UndoOutcome {
    pub restored_selection: Option<Selection>,
    pub restored_input: Option<String>,
}

impl SessionStore {
    /// Opens a new turn for a user instruction: appends the entry to both
    /// logs, records the turn, and returns the new turn number.
    pub async fn begin_turn(&self, id: &str, mut entry: ChatEntry) -> Result<u64, StoreError> {
        self.ensure_loaded(id).await?;
        let mut sessions = self.sessions.write().await;
        let state = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;

        let turn = state.meta.last_turn + 1;
        state.meta.last_turn = turn;
        entry.role = Role::User;
        entry.turn = turn;
        entry.version = state.meta.current_version;

        state.turns.push(TurnRecord {
            turn,
            version: state.meta.current_version,
            selection: entry.selection.clone(),
            input: entry.content.clone(),
        });
        state.history.push(entry.clone());
        state.context.push(entry);

        let head_dir = self.version_dir(id, state.meta.current_version);
        write_logs(&head_dir, &state.history, &state.context).await?;
        state.meta.updated_at = chrono::Utc::now();
        write_session_file(&self.session_file(id), &state.meta, &state.turns).await?;

        log::info!("Session {}: began turn {}", id, turn);
        Ok(turn)
    }

    /// The version that was HEAD when the given turn began. Recorded at turn
    /// creation, never recomputed. Turn 0 is session creation at version 0.
    pub async fn resolve_version_for_turn(&self, id: &str, turn: u64) -> Result<u64, StoreError> {
        self.ensure_loaded(id).await?;
        let sessions = self.sessions.read().await;
        let state = sessions
            .get(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;

        if turn == 0 {
            return Ok(0);
        }
        state
            .turns
            .iter()
            .find(|record| record.turn == turn)
            .map(|record| record.version)
            .ok_or(StoreError::TurnNotFound(turn))
    }

    /// Removes the most recent user turn and everything attached to it from
    /// both logs, and resets HEAD and the turn counter to where they stood
    /// before that turn. Superseded snapshot directories stay on disk; the
    /// HEAD pointer decides visibility.
    pub async fn undo_last_turn(&self, id: &str) -> Result<UndoOutcome, StoreError> {
        self.ensure_loaded(id).await?;
        let mut sessions = self.sessions.write().await;
        let state = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;

        let record = state.turns.pop().ok_or(StoreError::NothingToUndo)?;
        state.history.retain(|entry| entry.turn != record.turn);
        state.context.retain(|entry| entry.turn != record.turn);
        state.meta.last_turn = record.turn - 1;
        state.meta.current_version = record.version;

        // Reload the live snapshot from the restored HEAD.
        let dir = self.version_dir(id, record.version);
        state.snapshot = FileSnapshot::read_dir(&dir).await?;
        write_logs(&dir, &state.history, &state.context).await?;
        state.meta.updated_at = chrono::Utc::now();
        write_session_file(&self.session_file(id), &state.meta, &state.turns).await?;

        log::info!(
            "Session {}: undid turn {}, head back to {}",
            id,
            record.turn,
            record.version
        );
        Ok(UndoOutcome {
            restored_selection: record.selection,
            restored_input: Some(record.input),
        })
    }

    /// Merges model output into both logs, tagging every entry with the
    /// current turn and version. Entries of the current turn appended
    /// earlier (the user instruction) are re-tagged to the current version,
    /// so a turn that committed shows all its entries against the committed
    /// version. Assistant entries without rendered text and tool entries
    /// stay out of the UI history but always land in the context log.
    pub async fn append_assistant_entries(
        &self,
        id: &str,
        entries: Vec<ChatEntry>,
    ) -> Result<(), StoreError> {
        self.ensure_loaded(id).await?;
        let mut sessions = self.sessions.write().await;
        let state = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;

        let turn = state.meta.last_turn;
        let version = state.meta.current_version;
        for existing in state.history.iter_mut() {
            if existing.turn == turn {
                existing.version = version;
            }
        }
        for existing in state.context.iter_mut() {
            if existing.turn == turn {
                existing.version = version;
            }
        }

        for mut entry in entries {
            entry.turn = turn;
            entry.version = version;
            let keep_in_history = match entry.role {
                Role::User => true,
                Role::Assistant => entry.has_rendered_text(),
                Role::System | Role::Tool => false,
            };
            state.context.push(entry.clone());
            if keep_in_history {
                state.history.push(entry);
            }
        }

        let head_dir = self.version_dir(id, version);
        write_logs(&head_dir, &state.history, &state.context).await?;
        state.meta.updated_at = chrono::Utc::now();
        write_session_file(&self.session_file(id), &state.meta, &state.turns).await?;
        Ok(())
    }

    /// The live UI-facing history.
    pub async fn read_history(&self, id: &str) -> Result<Vec<ChatEntry>, StoreError> {
        self.ensure_loaded(id).await?;
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|state| state.history.clone())
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    /// The live model-facing context log.
    pub async fn read_context(&self, id: &str) -> Result<Vec<ChatEntry>, StoreError> {
        self.ensure_loaded(id).await?;
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|state| state.context.clone())
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    /// The UI history as persisted for a specific version.
    pub async fn read_history_at_version(
        &self,
        id: &str,
        version: u64,
    ) -> Result<Vec<ChatEntry>, StoreError> {
        self.ensure_loaded(id).await?;
        {
            let sessions = self.sessions.read().await;
            let state = sessions
                .get(id)
                .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
            if version == state.meta.current_version {
                return Ok(state.history.clone());
            }
            if version > state.meta.current_version {
                return Err(StoreError::VersionExceedsHead {
                    requested: version,
                    head: state.meta.current_version,
                });
            }
        }
        let dir = self.ensure_version_on_disk(id, version).await?;
        super::read_log(&dir.join(super::MESSAGES_FILE)).await
    }

    /// All turn records, oldest first.
    pub(crate) async fn turn_records(&self, id: &str) -> Result<Vec<TurnRecord>, StoreError> {
        self.ensure_loaded(id).await?;
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|state| state.turns.clone())
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    /// The UI history as of a given turn, resolved through the turn record.
    pub async fn read_history_by_turn(
        &self,
        id: &str,
        turn: u64,
    ) -> Result<Vec<ChatEntry>, StoreError> {
        let version = self.resolve_version_for_turn(id, turn).await?;
        self.read_history_at_version(id, version).await
    }
}
