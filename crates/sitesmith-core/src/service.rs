//! Chat service: the façade callers drive
//!
//! Glues the pieces into the turn pipeline: begin a turn, run the agent
//! loop, commit files when anything mutated, merge the model output into
//! the logs, fan out variants when requested, and announce every stage
//! through the notifier. The HTTP layer above this is out of scope; it
//! talks to this service and nothing else.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::agent::{AgentLoop, LoopExit, LoopRequest, LoopResult};
use crate::branch::BranchCoordinator;
use crate::completion::CompletionEngine;
use crate::config::CoreConfig;
use crate::core_types::{ChatEntry, Selection};
use crate::errors::StoreError;
use crate::images::ImageGenerator;
use crate::lifecycle::{CloneHandle, SessionLifecycle};
use crate::notify::{ChatStatus, ChatStatusEvent, Notifier};
use crate::progress::ProgressSink;
use crate::snapshot::{FileSnapshot, PageFile};
use crate::store::{Session, SessionStore, UndoOutcome};

/// A sibling session spawned by variant fan-out. The task handle is
/// returned for observability; dropping it leaves the task running.
pub struct VariantLaunch {
    pub session_id: String,
    pub group: i32,
    pub task: JoinHandle<()>,
}

pub struct InstructionOutcome {
    pub turn: u64,
    pub session: Session,
    pub summary: Option<String>,
    pub exit: LoopExit,
    pub variants: Vec<VariantLaunch>,
}

pub struct ChatService {
    store: Arc<SessionStore>,
    lifecycle: Arc<SessionLifecycle>,
    engine: Arc<dyn CompletionEngine>,
    images: Option<Arc<dyn ImageGenerator>>,
    notifier: Arc<dyn Notifier>,
    config: CoreConfig,
}

/// Forwards buffered progress lines as `generating` status events.
struct StatusProgress {
    notifier: Arc<dyn Notifier>,
}

#[async_trait]
impl ProgressSink for StatusProgress {
    async fn emit(&self, session_id: &str, line: &str) {
        self.notifier
            .chat_status(
                ChatStatusEvent::new(session_id, ChatStatus::Generating).with_message(line),
            )
            .await;
    }
}

impl ChatService {
    pub fn new(
        config: CoreConfig,
        engine: Arc<dyn CompletionEngine>,
        images: Option<Arc<dyn ImageGenerator>>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let store = Arc::new(SessionStore::new(config.root_dir.clone()));
        let lifecycle = Arc::new(SessionLifecycle::new(store.clone(), notifier.clone()));
        Arc::new(ChatService {
            store,
            lifecycle,
            engine,
            images,
            notifier,
            config,
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub(crate) fn lifecycle(&self) -> &Arc<SessionLifecycle> {
        &self.lifecycle
    }

    pub(crate) fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Handles one user instruction against a session: the whole turn
    /// pipeline. Callers must not issue two concurrent instructions against
    /// the same session id.
    pub async fn handle_instruction(
        self: &Arc<Self>,
        session_id: &str,
        text: &str,
        selection: Option<Selection>,
    ) -> Result<InstructionOutcome, StoreError> {
        self.handle_instruction_inner(session_id, text, selection, true)
            .await
    }

    pub(crate) async fn handle_instruction_inner(
        self: &Arc<Self>,
        session_id: &str,
        text: &str,
        selection: Option<Selection>,
        allow_variants: bool,
    ) -> Result<InstructionOutcome, StoreError> {
        self.notifier
            .chat_status(ChatStatusEvent::new(session_id, ChatStatus::Started))
            .await;

        let session = self.store.get_session(session_id).await?;
        let turn = self
            .store
            .begin_turn(session_id, ChatEntry::user(text, selection.clone()))
            .await?;

        // The loop re-appends the instruction itself, enriched.
        let mut prior_context = self.store.read_context(session_id).await?;
        prior_context.pop();
        let snapshot = self
            .store
            .read_snapshot(session_id, session.current_version)
            .await?;

        let instructions = match &selection {
            Some(sel) => format!(
                "{}\n\nThe user has selected the page element matching `{}`; the instruction refers to it.",
                text, sel.selector
            ),
            None => text.to_string(),
        };

        self.notifier
            .chat_status(ChatStatusEvent::new(session_id, ChatStatus::Generating))
            .await;

        let progress: Arc<dyn ProgressSink> = Arc::new(StatusProgress {
            notifier: self.notifier.clone(),
        });
        let agent = AgentLoop::new(
            self.store.clone(),
            self.engine.clone(),
            self.images.clone(),
            progress,
            self.config.max_steps,
            self.config.progress_capacity,
        );
        let LoopResult {
            exit,
            summary,
            files,
            target_version,
            variant_request,
            new_context_entries,
        } = agent
            .run(LoopRequest {
                session_id: session_id.to_string(),
                instructions,
                snapshot,
                prior_context,
                current_version: session.current_version,
                image_generation_allowed: session.image_generation_allowed,
                allow_variants,
            })
            .await;

        if let LoopExit::Failed(reason) = &exit {
            // Prior version stays intact; the failure reaches the user only
            // as a status event plus a degraded assistant entry.
            let mut entries = new_context_entries;
            if let Some(summary) = &summary {
                entries.push(ChatEntry::assistant(summary.clone()));
            }
            self.store
                .append_assistant_entries(session_id, entries)
                .await?;
            self.notifier
                .chat_status(
                    ChatStatusEvent::new(session_id, ChatStatus::Error)
                        .with_message(reason.clone()),
                )
                .await;
            let session = self.store.get_session(session_id).await?;
            return Ok(InstructionOutcome {
                turn,
                session,
                summary,
                exit,
                variants: Vec::new(),
            });
        }

        if let Some(target) = target_version {
            self.store
                .commit_files(session_id, files, target)
                .await?;
        }

        let mut entries = new_context_entries;
        if exit == LoopExit::SummaryProduced {
            // The summary tool's message is the UI-visible assistant reply;
            // conversational exits already carry their text entry.
            if let Some(summary) = &summary {
                entries.push(ChatEntry::assistant(summary.clone()));
            }
        }
        self.store
            .append_assistant_entries(session_id, entries)
            .await?;

        let variants = match &variant_request {
            Some(request) => {
                BranchCoordinator::new(self.clone())
                    .fan_out(session_id, turn, request.clone())
                    .await
            }
            None => Vec::new(),
        };

        let did_anything =
            summary.is_some() || target_version.is_some() || variant_request.is_some();
        let status = if did_anything {
            ChatStatus::Completed
        } else {
            ChatStatus::Skipped
        };
        let mut event = ChatStatusEvent::new(session_id, status);
        if let Some(summary) = &summary {
            event = event.with_message(summary.clone());
        }
        self.notifier.chat_status(event).await;

        let session = self.store.get_session(session_id).await?;
        Ok(InstructionOutcome {
            turn,
            session,
            summary,
            exit,
            variants,
        })
    }

    // Store and lifecycle surface re-exported for the embedding layer.

    pub async fn create_session(
        &self,
        image_generation_allowed: bool,
    ) -> Result<Session, StoreError> {
        self.lifecycle.create_session(image_generation_allowed).await
    }

    pub async fn get_or_create_session(
        &self,
        nonce: &str,
        image_generation_allowed: bool,
    ) -> Result<Session, StoreError> {
        self.lifecycle
            .get_or_create(nonce, image_generation_allowed)
            .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session, StoreError> {
        self.store.get_session(session_id).await
    }

    pub async fn read_snapshot(
        &self,
        session_id: &str,
        version: u64,
    ) -> Result<FileSnapshot, StoreError> {
        self.store.read_snapshot(session_id, version).await
    }

    pub async fn edit_historical_file(
        &self,
        session_id: &str,
        version: u64,
        file: PageFile,
        content: String,
    ) -> Result<Session, StoreError> {
        self.store
            .edit_historical_file(session_id, version, file, content)
            .await
    }

    pub async fn read_history(&self, session_id: &str) -> Result<Vec<ChatEntry>, StoreError> {
        self.store.read_history(session_id).await
    }

    pub async fn read_history_by_turn(
        &self,
        session_id: &str,
        turn: u64,
    ) -> Result<Vec<ChatEntry>, StoreError> {
        self.store.read_history_by_turn(session_id, turn).await
    }

    pub async fn resolve_version_for_turn(
        &self,
        session_id: &str,
        turn: u64,
    ) -> Result<u64, StoreError> {
        self.store.resolve_version_for_turn(session_id, turn).await
    }

    pub async fn undo_last_turn(&self, session_id: &str) -> Result<UndoOutcome, StoreError> {
        self.store.undo_last_turn(session_id).await
    }

    pub async fn clone_at_turn(
        &self,
        session_id: &str,
        turn: u64,
    ) -> Result<CloneHandle, StoreError> {
        self.lifecycle.clone_at_turn(session_id, turn).await
    }

    pub async fn clone_at_version(
        &self,
        session_id: &str,
        version: u64,
    ) -> Result<CloneHandle, StoreError> {
        self.lifecycle.clone_at_version(session_id, version).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.lifecycle.delete_session(session_id).await
    }
}
