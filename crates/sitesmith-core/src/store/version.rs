//! Version lifecycle operations
//!
//! Versions advance in exactly one way: `init_next_version` materializes
//! `HEAD + 1` as a deep copy of the HEAD directory, tools mutate the working
//! copy, and `commit_files` flushes the result and moves HEAD forward.
//! Historical snapshots stay on disk forever; undo only moves the HEAD
//! pointer, and a later turn's init overwrites whatever a previous,
//! undone turn left behind in its directory.

use std::path::PathBuf;

use tokio::fs;

use crate::errors::StoreError;
use crate::snapshot::{FileSnapshot, PageFile};

use super::{deep_copy_dir, write_logs, write_session_file, Session, SessionStore};

impl SessionStore {
    /// Idempotently materializes version `HEAD + 1` by deep-copying the HEAD
    /// snapshot directory (files, logs, generated assets). Returns the new
    /// version number without advancing HEAD. Safe to call repeatedly within
    /// one turn; only the first call copies anything.
    pub async fn init_next_version(&self, id: &str) -> Result<u64, StoreError> {
        self.ensure_loaded(id).await?;
        let mut sessions = self.sessions.write().await;
        let state = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;

        let current = state.meta.current_version;
        let next = current + 1;
        let next_dir = self.version_dir(id, next);
        if fs::try_exists(&next_dir).await? {
            return Ok(next);
        }

        let head_dir = self.version_dir(id, current);
        if !fs::try_exists(&head_dir).await? {
            state.snapshot.write_dir(&head_dir).await?;
            write_logs(&head_dir, &state.history, &state.context).await?;
        }
        deep_copy_dir(&head_dir, &next_dir).await?;
        log::info!("Session {}: initialized version {}", id, next);
        Ok(next)
    }

    /// Writes `files` as `target_version`'s snapshot and, when the target is
    /// beyond HEAD, advances HEAD to it. Fails with `NotInitialized` when
    /// the target directory was never materialized. This is the only way
    /// HEAD moves forward.
    pub async fn commit_files(
        &self,
        id: &str,
        files: FileSnapshot,
        target_version: u64,
    ) -> Result<Session, StoreError> {
        self.ensure_loaded(id).await?;
        let mut sessions = self.sessions.write().await;
        let state = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;

        let dir = self.version_dir(id, target_version);
        if !fs::try_exists(&dir).await? {
            return Err(StoreError::NotInitialized {
                session_id: id.to_string(),
                version: target_version,
            });
        }

        files.write_dir(&dir).await?;
        if target_version > state.meta.current_version {
            log::info!(
                "Session {}: head {} -> {}",
                id,
                state.meta.current_version,
                target_version
            );
            state.meta.current_version = target_version;
        }
        if target_version == state.meta.current_version {
            state.snapshot = files;
        }
        state.meta.updated_at = chrono::Utc::now();
        write_session_file(&self.session_file(id), &state.meta, &state.turns).await?;
        Ok(state.meta.clone())
    }

    /// Reads the snapshot of any version up to HEAD. Falls back to the live
    /// in-memory snapshot only for HEAD itself.
    pub async fn read_snapshot(&self, id: &str, version: u64) -> Result<FileSnapshot, StoreError> {
        self.ensure_loaded(id).await?;
        let sessions = self.sessions.read().await;
        let state = sessions
            .get(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;

        let head = state.meta.current_version;
        if version > head {
            return Err(StoreError::VersionExceedsHead {
                requested: version,
                head,
            });
        }

        let dir = self.version_dir(id, version);
        if fs::try_exists(&dir).await? {
            FileSnapshot::read_dir(&dir).await
        } else if version == head {
            Ok(state.snapshot.clone())
        } else {
            Err(StoreError::VersionNotFound(version))
        }
    }

    /// Edits one file of any version at or below HEAD, in place.
    ///
    /// For HEAD this updates both the live snapshot and the directory. For a
    /// historical version it writes straight into that version's directory
    /// without touching HEAD — the deliberate exception to snapshot
    /// immutability, kept for direct user edits at a past turn. Clones read
    /// from disk, so edited bytes propagate to branches.
    pub async fn edit_historical_file(
        &self,
        id: &str,
        version: u64,
        file: PageFile,
        content: String,
    ) -> Result<Session, StoreError> {
        self.ensure_loaded(id).await?;
        let mut sessions = self.sessions.write().await;
        let state = sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;

        let head = state.meta.current_version;
        if version > head {
            return Err(StoreError::VersionExceedsHead {
                requested: version,
                head,
            });
        }

        let dir = self.version_dir(id, version);
        if version == head {
            state.snapshot.set(file, content);
            state.snapshot.write_dir(&dir).await?;
        } else {
            if !fs::try_exists(&dir).await? {
                self.materialize_from_ancestors(id, version).await?;
            }
            fs::write(dir.join(file.file_name()), content).await?;
        }

        log::info!("Session {}: edited {} at version {}", id, file, version);
        state.meta.updated_at = chrono::Utc::now();
        write_session_file(&self.session_file(id), &state.meta, &state.turns).await?;
        Ok(state.meta.clone())
    }

    /// Guarantees that `version`'s directory exists on disk, lazily copying
    /// forward from the nearest materialized ancestor, or flushing the live
    /// snapshot when the missing version is HEAD itself.
    pub async fn ensure_version_on_disk(&self, id: &str, version: u64) -> Result<PathBuf, StoreError> {
        self.ensure_loaded(id).await?;
        let dir = self.version_dir(id, version);
        if fs::try_exists(&dir).await? {
            return Ok(dir);
        }

        let sessions = self.sessions.read().await;
        let state = sessions
            .get(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))?;
        let head = state.meta.current_version;
        if version > head {
            return Err(StoreError::VersionExceedsHead {
                requested: version,
                head,
            });
        }
        if version == head {
            state.snapshot.write_dir(&dir).await?;
            write_logs(&dir, &state.history, &state.context).await?;
            return Ok(dir);
        }
        drop(sessions);
        self.materialize_from_ancestors(id, version).await
    }

    /// Copies the nearest existing lower version directory into `version`.
    async fn materialize_from_ancestors(&self, id: &str, version: u64) -> Result<PathBuf, StoreError> {
        let dir = self.version_dir(id, version);
        let mut ancestor = version;
        while ancestor > 0 {
            ancestor -= 1;
            let src = self.version_dir(id, ancestor);
            if fs::try_exists(&src).await? {
                deep_copy_dir(&src, &dir).await?;
                log::info!(
                    "Session {}: materialized version {} from {}",
                    id,
                    version,
                    ancestor
                );
                return Ok(dir);
            }
        }
        Err(StoreError::VersionNotFound(version))
    }

    /// Recursively duplicates version directories `0..=up_to_version` from
    /// one session tree into another. Used by branching and clone-at-turn.
    /// Never mutates the source beyond lazily materializing the cut point.
    pub async fn clone_subtree(
        &self,
        source_id: &str,
        target_id: &str,
        up_to_version: u64,
    ) -> Result<(), StoreError> {
        self.ensure_version_on_disk(source_id, up_to_version).await?;
        for v in 0..=up_to_version {
            let src = self.version_dir(source_id, v);
            if fs::try_exists(&src).await? {
                deep_copy_dir(&src, &self.version_dir(target_id, v)).await?;
            }
        }
        log::info!(
            "Cloned versions 0..={} from {} into {}",
            up_to_version,
            source_id,
            target_id
        );
        Ok(())
    }
}
