//! Core library for iteratively editing a generated web page through an agent.
//!
//! This crate provides the versioned, branchable session store and the
//! agent orchestration loop that drives tool calls against it. Every user
//! instruction opens a turn; every accepted edit produces a new immutable
//! version of the page's three files. Sessions can be previewed at any past
//! turn, edited at historical versions, undone, and branched into
//! independent siblings — including automatic branching when the model
//! proposes stylistic variants.
//!
//! # Architecture Overview
//!
//! - **Snapshot & store**: per-session, per-version directories holding the
//!   page files and both conversation logs, fronted by an in-memory cache
//! - **Turn ledger**: turn-to-version records, undo, and the split between
//!   UI-facing history and model-facing context
//! - **Agent loop**: a bounded step machine over a pluggable completion
//!   engine with a gated tool catalog
//! - **Lifecycle & branching**: request-coalesced creation, clone-at-turn,
//!   and one-level variant fan-out
//! - **Capabilities**: completion engine, image generation and outbound
//!   notification are trait seams; concrete providers live outside the core

pub mod agent;
pub mod branch;
pub mod completion;
pub mod config;
pub mod core_types;
pub mod errors;
pub mod images;
pub mod lifecycle;
pub mod notify;
pub mod progress;
pub mod service;
pub mod snapshot;
pub mod store;

pub use agent::{AgentLoop, LoopExit, LoopRequest, LoopResult, VariantRequest};
pub use branch::BranchCoordinator;
pub use completion::{CompletionEngine, CompletionEvent, HttpCompletionEngine, StepRequest, ToolSpec};
pub use config::CoreConfig;
pub use core_types::{ChatEntry, Role, Selection, ToolCall, ToolOutcome, UsageReport};
pub use errors::{AgentError, StoreError};
pub use images::{ImageGenerator, ImageRecord};
pub use lifecycle::{CloneHandle, SessionLifecycle};
pub use notify::{ChatStatus, ChatStatusEvent, Notifier, NullNotifier, SessionCreatedEvent};
pub use progress::{NullProgress, ProgressSink};
pub use service::{ChatService, InstructionOutcome, VariantLaunch};
pub use snapshot::{FileSnapshot, PageFile};
pub use store::{Session, SessionStore, UndoOutcome};
