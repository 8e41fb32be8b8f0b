//! Agent orchestration loop
//!
//! Runs a bounded step machine against the completion engine: each step
//! streams text into the progress sink, collects tool-call requests,
//! executes them against an in-memory working copy of the page, and feeds
//! the results back. Tool failures never abort the loop; their text becomes
//! the tool result the model sees on its next step. The loop exits when the
//! model stops calling tools, records a summary, requests variants, hits
//! the step ceiling, or the engine itself fails — in which case the
//! previously committed files are returned untouched.

pub mod tools;

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;

use crate::completion::{CompletionEngine, CompletionEvent, StepRequest};
use crate::core_types::{ChatEntry, ToolCall, ToolOutcome};
use crate::errors::StoreError;
use crate::images::{self, ImageGenerator};
use crate::progress::{self, ProgressSink};
use crate::snapshot::FileSnapshot;
use crate::store::SessionStore;

use self::tools::{
    replace_single, tool_catalog, EditFileArgs, EditImageArgs, GenerateImageArgs,
    GenerateVariantsArgs, MatchFailure, ReadFileArgs, SummaryArgs,
};

pub const SYSTEM_PROMPT: &str = "\
You are a web page editor working on a page made of three files: index.html, \
styles.css and script.js. The user gives you an instruction; apply it with \
the tools provided. Read a file before editing it. Make edits with \
edit_file, giving an oldString that matches exactly one location. When the \
instruction is a question, answer it directly without editing anything. \
When you are done making changes, call summary with one or two sentences \
describing what you changed. If the user asks for several stylistic \
directions, call generate_variants with one instruction per variant instead \
of editing the files yourself.";

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    SummaryProduced,
    VariantsRequested,
    NoMoreToolCalls,
    StepLimitReached,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantRequest {
    pub count: usize,
    pub instructions: Vec<String>,
}

/// Everything a single run needs. `instructions` is assumed to already be
/// enriched with any selected-element context; `prior_context` is the
/// session's context log minus the just-added instruction entry.
pub struct LoopRequest {
    pub session_id: String,
    pub instructions: String,
    pub snapshot: FileSnapshot,
    pub prior_context: Vec<ChatEntry>,
    pub current_version: u64,
    pub image_generation_allowed: bool,
    pub allow_variants: bool,
}

/// What a run produced. `target_version` is set only when a mutating tool
/// actually changed something; callers commit with it, or skip committing
/// entirely for pure Q&A turns.
pub struct LoopResult {
    pub exit: LoopExit,
    pub summary: Option<String>,
    pub files: FileSnapshot,
    pub target_version: Option<u64>,
    pub variant_request: Option<VariantRequest>,
    pub new_context_entries: Vec<ChatEntry>,
}

struct TurnState {
    session_id: String,
    working: FileSnapshot,
    current_version: u64,
    /// Memoized result of the first lazy `init_next_version` call.
    target_version: Option<u64>,
    mutated: bool,
    summary: Option<String>,
    variant_request: Option<VariantRequest>,
    image_generation_allowed: bool,
    allow_variants: bool,
}

pub struct AgentLoop {
    store: Arc<SessionStore>,
    engine: Arc<dyn CompletionEngine>,
    images: Option<Arc<dyn ImageGenerator>>,
    progress: Arc<dyn ProgressSink>,
    max_steps: usize,
    progress_capacity: usize,
}

impl AgentLoop {
    pub fn new(
        store: Arc<SessionStore>,
        engine: Arc<dyn CompletionEngine>,
        images: Option<Arc<dyn ImageGenerator>>,
        progress: Arc<dyn ProgressSink>,
        max_steps: usize,
        progress_capacity: usize,
    ) -> Self {
        AgentLoop {
            store,
            engine,
            images,
            progress,
            max_steps,
            progress_capacity,
        }
    }

    pub async fn run(&self, request: LoopRequest) -> LoopResult {
        let mut turn = TurnState {
            session_id: request.session_id.clone(),
            working: request.snapshot.clone(),
            current_version: request.current_version,
            target_version: None,
            mutated: false,
            summary: None,
            variant_request: None,
            image_generation_allowed: request.image_generation_allowed,
            allow_variants: request.allow_variants,
        };

        let mut messages = request.prior_context.clone();
        messages.push(ChatEntry::user(request.instructions.clone(), None));
        let mut new_entries: Vec<ChatEntry> = Vec::new();
        let catalog = tool_catalog(request.image_generation_allowed, request.allow_variants);

        let (tx, rx) = mpsc::channel(self.progress_capacity);
        let pump_task = tokio::spawn(progress::pump(
            request.session_id.clone(),
            rx,
            self.progress.clone(),
        ));

        let mut exit = LoopExit::StepLimitReached;
        'steps: for step in 0..self.max_steps {
            log::info!("Session {}: agent step {}", request.session_id, step + 1);
            let _ = tx.send(format!("STEP: {}\n", step + 1)).await;

            let stream = self
                .engine
                .stream_step(StepRequest {
                    system_prompt: SYSTEM_PROMPT.to_string(),
                    messages: messages.clone(),
                    tools: catalog.clone(),
                })
                .await;
            let mut stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("Session {}: engine step failed: {}", request.session_id, e);
                    exit = LoopExit::Failed(e.to_string());
                    break;
                }
            };

            let mut text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            let mut step_error = None;
            while let Some(event) = stream.next().await {
                match event {
                    Ok(CompletionEvent::TextDelta(delta)) => {
                        text.push_str(&delta);
                        let _ = tx.send(delta).await;
                    }
                    Ok(CompletionEvent::ToolCall(call)) => calls.push(call),
                    Ok(CompletionEvent::Usage(usage)) => {
                        log::info!(
                            "Session {}: step used {} tokens ({} prompt, {} completion)",
                            request.session_id,
                            usage.total_tokens,
                            usage.prompt_tokens,
                            usage.completion_tokens
                        );
                    }
                    Err(e) => {
                        step_error = Some(e);
                        break;
                    }
                }
            }
            if let Some(e) = step_error {
                log::error!("Session {}: engine stream failed: {}", request.session_id, e);
                exit = LoopExit::Failed(e.to_string());
                break;
            }

            let assistant = ChatEntry::assistant_with_calls(text.clone(), calls.clone());
            messages.push(assistant.clone());
            new_entries.push(assistant);

            if calls.is_empty() {
                // Model is done; a conversational answer stands in for the
                // summary when no summary tool was called.
                if turn.summary.is_none() && !text.trim().is_empty() {
                    turn.summary = Some(text.trim().to_string());
                }
                exit = LoopExit::NoMoreToolCalls;
                break;
            }

            // Execute in the order the model issued the calls; carry the
            // index so results re-sort into call order even if an engine
            // settles them differently.
            let mut results: Vec<(usize, Option<String>, ToolOutcome)> = Vec::new();
            let mut stop: Option<LoopExit> = None;
            for (index, call) in calls.iter().enumerate() {
                let _ = tx.send(format!("TOOL: {}\n", call.name)).await;
                let outcome = self.execute_tool(&mut turn, call).await;
                if outcome.is_error() {
                    log::warn!(
                        "Session {}: tool {} failed: {}",
                        request.session_id,
                        call.name,
                        outcome.render()
                    );
                }
                results.push((index, call.id.clone(), outcome));

                match call.name.as_str() {
                    "summary" if turn.summary.is_some() => {
                        stop = Some(LoopExit::SummaryProduced);
                    }
                    "generate_variants" if turn.variant_request.is_some() => {
                        stop = Some(LoopExit::VariantsRequested);
                    }
                    _ => {}
                }
            }

            results.sort_by_key(|(index, _, _)| *index);
            for (_, id, outcome) in results {
                let entry = ChatEntry::tool_result(id, outcome.render());
                messages.push(entry.clone());
                new_entries.push(entry);
            }

            if let Some(stop_exit) = stop {
                exit = stop_exit;
                break 'steps;
            }
        }

        drop(tx);
        let _ = pump_task.await;

        if let LoopExit::Failed(reason) = &exit {
            // No partial state reaches the store: the working copy is
            // dropped and the previously committed files are returned.
            let message = format!(
                "Something went wrong and the page was left as it was: {}",
                reason
            );
            return LoopResult {
                exit,
                summary: Some(message),
                files: request.snapshot,
                target_version: None,
                variant_request: None,
                new_context_entries: new_entries,
            };
        }

        let target_version = if turn.mutated { turn.target_version } else { None };
        LoopResult {
            exit,
            summary: turn.summary,
            files: turn.working,
            target_version,
            variant_request: turn.variant_request,
            new_context_entries: new_entries,
        }
    }

    /// Runs one tool call. Never fails: every failure mode is folded into
    /// an error outcome the model can read and react to.
    async fn execute_tool(&self, turn: &mut TurnState, call: &ToolCall) -> ToolOutcome {
        match call.name.as_str() {
            "read_file" => match parse_args::<ReadFileArgs>(call) {
                Ok(args) => ToolOutcome::text(turn.working.get(args.file)),
                Err(outcome) => outcome,
            },
            "edit_file" => {
                let args = match parse_args::<EditFileArgs>(call) {
                    Ok(args) => args,
                    Err(outcome) => return outcome,
                };
                if args.old_string.trim().is_empty() {
                    return ToolOutcome::error("oldString must not be empty");
                }
                if let Err(e) = self.ensure_next_version(turn).await {
                    return ToolOutcome::error(format!("could not prepare next version: {}", e));
                }
                match replace_single(turn.working.get(args.file), &args.old_string, &args.new_string)
                {
                    Ok(updated) => {
                        turn.working.set(args.file, updated);
                        turn.mutated = true;
                        ToolOutcome::text(format!("Edited {}", args.file))
                    }
                    Err(MatchFailure::Ambiguous) => ToolOutcome::error(format!(
                        "Ambiguous match: oldString occurs more than once in {}; include more surrounding context",
                        args.file
                    )),
                    Err(MatchFailure::NotFound) => ToolOutcome::error(format!(
                        "No match for oldString in {} after exact, trimmed and newline-normalized attempts",
                        args.file
                    )),
                }
            }
            "summary" => match parse_args::<SummaryArgs>(call) {
                Ok(args) => {
                    turn.summary = Some(args.message);
                    ToolOutcome::text("Summary recorded")
                }
                Err(outcome) => outcome,
            },
            "generate_variants" => {
                if !turn.allow_variants {
                    return ToolOutcome::error("variant generation is disabled for this run");
                }
                let args = match parse_args::<GenerateVariantsArgs>(call) {
                    Ok(args) => args,
                    Err(outcome) => return outcome,
                };
                if args.count == 0 || args.instructions.len() != args.count {
                    return ToolOutcome::error(
                        "count must be at least 1 and match the number of instructions",
                    );
                }
                let count = args.count;
                turn.variant_request = Some(VariantRequest {
                    count: args.count,
                    instructions: args.instructions,
                });
                ToolOutcome::text(format!("Requested {} variants", count))
            }
            "list_images" => {
                if !turn.image_generation_allowed {
                    return ToolOutcome::error("image generation is not enabled for this session");
                }
                let version = turn.target_version.unwrap_or(turn.current_version);
                let dir = self.store.version_dir(&turn.session_id, version);
                match images::read_manifest(&dir).await {
                    Ok(records) => ToolOutcome::json(json!({ "images": records })),
                    Err(e) => ToolOutcome::error(format!("could not list images: {}", e)),
                }
            }
            "generate_image" => {
                let generator = match self.image_generator(turn) {
                    Ok(generator) => generator,
                    Err(outcome) => return outcome,
                };
                let args = match parse_args::<GenerateImageArgs>(call) {
                    Ok(args) => args,
                    Err(outcome) => return outcome,
                };
                let version = match self.ensure_next_version(turn).await {
                    Ok(version) => version,
                    Err(e) => {
                        return ToolOutcome::error(format!("could not prepare next version: {}", e))
                    }
                };
                let dir = self.store.version_dir(&turn.session_id, version);
                match generator.generate(&dir, &args.prompt).await {
                    Ok(record) => match images::append_manifest(&dir, record.clone()).await {
                        Ok(()) => {
                            turn.mutated = true;
                            ToolOutcome::json(json!({ "generated": record }))
                        }
                        Err(e) => ToolOutcome::error(format!("could not record image: {}", e)),
                    },
                    Err(e) => ToolOutcome::error(format!("image generation failed: {}", e)),
                }
            }
            "edit_image" => {
                let generator = match self.image_generator(turn) {
                    Ok(generator) => generator,
                    Err(outcome) => return outcome,
                };
                let args = match parse_args::<EditImageArgs>(call) {
                    Ok(args) => args,
                    Err(outcome) => return outcome,
                };
                let version = match self.ensure_next_version(turn).await {
                    Ok(version) => version,
                    Err(e) => {
                        return ToolOutcome::error(format!("could not prepare next version: {}", e))
                    }
                };
                let dir = self.store.version_dir(&turn.session_id, version);
                match generator.edit(&dir, &args.image, &args.prompt).await {
                    Ok(record) => match images::append_manifest(&dir, record.clone()).await {
                        Ok(()) => {
                            turn.mutated = true;
                            ToolOutcome::json(json!({ "edited": record }))
                        }
                        Err(e) => ToolOutcome::error(format!("could not record image: {}", e)),
                    },
                    Err(e) => ToolOutcome::error(format!("image edit failed: {}", e)),
                }
            }
            other => ToolOutcome::error(format!("Unknown tool: {}", other)),
        }
    }

    fn image_generator(&self, turn: &TurnState) -> Result<Arc<dyn ImageGenerator>, ToolOutcome> {
        if !turn.image_generation_allowed {
            return Err(ToolOutcome::error(
                "image generation is not enabled for this session",
            ));
        }
        self.images
            .clone()
            .ok_or_else(|| ToolOutcome::error("no image generator is configured"))
    }

    /// Lazily materializes the next version; memoized so only the first
    /// mutating tool call per turn touches the store.
    async fn ensure_next_version(&self, turn: &mut TurnState) -> Result<u64, StoreError> {
        if let Some(version) = turn.target_version {
            return Ok(version);
        }
        let version = self.store.init_next_version(&turn.session_id).await?;
        turn.target_version = Some(version);
        Ok(version)
    }
}

/// Deserializes a tool's arguments into its typed input struct, folding
/// validation failures into an error outcome for the model.
fn parse_args<T: serde::de::DeserializeOwned>(call: &ToolCall) -> Result<T, ToolOutcome> {
    serde_json::from_value(call.arguments.clone()).map_err(|e| {
        ToolOutcome::error(format!("invalid arguments for {}: {}", call.name, e))
    })
}
