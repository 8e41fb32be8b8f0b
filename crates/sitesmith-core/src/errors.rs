//! Error types for the session store and agent loop
//!
//! Two tiers of failure exist in this system and they are deliberately kept
//! apart. `StoreError` covers storage-layer invariant violations (committing
//! before initializing a version, reading past HEAD); these are programmer
//! errors raised to the caller. Loop-level failures surface as `AgentError`,
//! while tool-level failures never become errors at all: they are folded into
//! textual tool results so the model can see them and retry, and the turn
//! still completes with a degraded but valid summary.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("version {version} of session {session_id} was not initialized; call init_next_version first")]
    NotInitialized { session_id: String, version: u64 },
    #[error("requested version {requested} exceeds head {head}")]
    VersionExceedsHead { requested: u64, head: u64 },
    #[error("version {0} not found")]
    VersionNotFound(u64),
    #[error("turn {0} not found")]
    TurnNotFound(u64),
    #[error("clone source invalid: {0}")]
    CloneSourceInvalid(String),
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serde(err.to_string())
    }
}

#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("completion engine failed: {0}")]
    CompletionEngine(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::CompletionEngine(err.to_string())
    }
}
