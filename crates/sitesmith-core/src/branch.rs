//! Branch coordinator: variant fan-out
//!
//! When the model proposes stylistic variants instead of editing the page,
//! the coordinator allocates the sibling sessions synchronously and then,
//! per sibling, runs the whole clone-and-generate pipeline as a
//! fire-and-forget task: clone the ledger state up to the turn before the
//! trigger, copy the version subtree, and re-enter the instruction path
//! with variant generation disabled. Exactly one level of fan-out.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use uuid::Uuid;

use crate::agent::VariantRequest;
use crate::errors::StoreError;
use crate::lifecycle::random_group;
use crate::notify::{ChatStatus, ChatStatusEvent};
use crate::service::{ChatService, VariantLaunch};

pub struct BranchCoordinator {
    service: Arc<ChatService>,
}

impl BranchCoordinator {
    pub fn new(service: Arc<ChatService>) -> Self {
        BranchCoordinator { service }
    }

    /// Allocates sibling ids and display groups synchronously, then fires a
    /// background task per sibling. Failures inside a task surface as an
    /// `error` status event keyed by the sibling id; there is no caller to
    /// throw to.
    pub async fn fan_out(
        &self,
        source_id: &str,
        trigger_turn: u64,
        request: VariantRequest,
    ) -> Vec<VariantLaunch> {
        let cut_turn = trigger_turn.saturating_sub(1);
        let mut launches = Vec::with_capacity(request.count);

        for instruction in request.instructions.into_iter().take(request.count) {
            let sibling_id = Uuid::new_v4().to_string();
            let group = random_group();
            log::info!(
                "Variant fan-out: {} -> {} (group {}) \"{}\"",
                source_id,
                sibling_id,
                group,
                instruction
            );

            let service = self.service.clone();
            let source = source_id.to_string();
            let sibling = sibling_id.clone();
            let task = tokio::spawn(async move {
                if let Err(e) =
                    run_variant(service.clone(), source, sibling.clone(), group, cut_turn, instruction)
                        .await
                {
                    log::error!("Variant generation failed for {}: {}", sibling, e);
                    service
                        .notifier()
                        .chat_status(
                            ChatStatusEvent::new(sibling.clone(), ChatStatus::Error)
                                .with_message(format!("variant generation failed: {}", e)),
                        )
                        .await;
                }
            });

            launches.push(VariantLaunch {
                session_id: sibling_id,
                group,
                task,
            });
        }

        launches
    }
}

// Boxed return type is deliberate: `run_variant` re-enters
// `handle_instruction_inner`, which can fan out again, so the future is
// mutually recursive with `fan_out`'s spawned task. An explicit
// `+ Send` boundary here breaks the auto-trait inference cycle that
// otherwise leaves the spawned future unprovably `Send`.
fn run_variant(
    service: Arc<ChatService>,
    source_id: String,
    sibling_id: String,
    group: i32,
    cut_turn: u64,
    instruction: String,
) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send>> {
    Box::pin(async move {
        let clone = service
            .lifecycle()
            .clone_at_turn_with_id(&source_id, &sibling_id, group, cut_turn)
            .await?;
        clone
            .hydration
            .await
            .map_err(|e| StoreError::Io(format!("hydration task aborted: {}", e)))??;

        service
            .handle_instruction_inner(&sibling_id, &instruction, None, false)
            .await?;
        Ok(())
    })
}
