// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use loom_config::Config;
use loom_events::{session_topic, Event, EventBus};
use loom_graph::DecisionGraph;
use loom_model::{
    Classification, GenerateOptions, LlmClient, Message, ModelSpec, SessionStatus,
    ToolCallRequest, Usage,
};
use loom_store::{SessionRecord, SessionUpdate, Store, StoreError};
use loom_telemetry::{emit_session_message, span_llm_request, LlmSpanMeta};
use loom_tools::{Decision, PermissionManager, ToolContext, ToolDispatcher, ToolOutcome, ToolRegistry};

use crate::context::ContextWindow;
use crate::prompts::compose_system_prompt;

/// Hard ceiling on tool-call rounds per `send_message`.
pub const MAX_ITERATIONS: u32 = 25;

/// Depth of the per-engine request queue.  Callers queue behind it; there is
/// no interleaving within a session.
const REQUEST_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The LLM transport failed or classified its response as an error.
    #[error("{0}")]
    Transport(String),
    /// The reason/act loop ran out of rounds.
    #[error("Maximum tool call iterations ({0}) exceeded.")]
    IterationCap(u32),
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Store(StoreError),
    /// The engine task is gone (stopped or crashed).
    #[error("session engine stopped")]
    Stopped,
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => EngineError::NotFound,
            other => EngineError::Store(other),
        }
    }
}

/// The ask-path of the permission flow, injected so products can put a real
/// user prompt behind it.
#[async_trait]
pub trait AskPrompter: Send + Sync {
    /// Decide a tool invocation the rules classified as `ask`.
    /// `auto_approve` is the session's auto-approve flag.
    async fn ask(&self, tool: &str, path: &str, session_id: &str, auto_approve: bool) -> Decision;
}

/// Default prompter: approve when the session opted into auto-approval,
/// otherwise deny.  Never blocks on a human.
pub struct DefaultPrompter;

#[async_trait]
impl AskPrompter for DefaultPrompter {
    async fn ask(&self, tool: &str, path: &str, session_id: &str, auto_approve: bool) -> Decision {
        if auto_approve {
            warn!(tool, path, session_id, "auto-approving tool call (session flag)");
            Decision::Allowed
        } else {
            Decision::Denied
        }
    }
}

/// Shared collaborators handed to every engine the manager spawns.
#[derive(Clone)]
pub struct EngineRuntime {
    pub store: Arc<dyn Store>,
    pub bus: Arc<EventBus>,
    pub client: Arc<dyn LlmClient>,
    pub registry: Arc<ToolRegistry>,
    pub config: Arc<Config>,
    pub prompter: Arc<dyn AskPrompter>,
}

impl EngineRuntime {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        client: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            bus,
            client,
            registry,
            config,
            prompter: Arc::new(DefaultPrompter),
        }
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn AskPrompter>) -> Self {
        self.prompter = prompter;
        self
    }
}

enum EngineRequest {
    SendMessage {
        text: String,
        reply: oneshot::Sender<Result<String, EngineError>>,
    },
    GetHistory {
        reply: oneshot::Sender<Vec<Message>>,
    },
    GetStatus {
        reply: oneshot::Sender<SessionStatus>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, clonable reference to a live engine.  All calls enqueue onto the
/// engine's request queue and resolve through one-shot replies, so public
/// calls on one session never interleave.
#[derive(Clone)]
pub struct EngineHandle {
    session_id: String,
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether the engine task is still serving requests.
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Run one user turn.  Synchronous from the caller's view — resolves when
    /// the reason/act loop finishes, which may take minutes.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<String, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::SendMessage {
                text: text.into(),
                reply,
            })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    pub async fn get_history(&self) -> Result<Vec<Message>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::GetHistory { reply })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    pub async fn get_status(&self) -> Result<SessionStatus, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::GetStatus { reply })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Terminate the engine.  Queued requests ahead of the stop complete
    /// first; requests behind it fail with [`EngineError::Stopped`].
    pub async fn stop(&self) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Stop { reply })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }
}

/// Process-per-conversation engine: owns a session's state and message log,
/// runs the reason/act loop, and orders every persistence write before the
/// matching broadcast.
pub struct SessionEngine;

impl SessionEngine {
    /// Spawn the engine task for a session.  `messages` is the re-hydrated
    /// persisted log (empty for a fresh session).
    pub fn spawn(
        session: SessionRecord,
        messages: Vec<Message>,
        runtime: EngineRuntime,
    ) -> EngineHandle {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let handle = EngineHandle {
            session_id: session.id.clone(),
            tx,
        };

        let graph = DecisionGraph::new(Arc::clone(&runtime.store));
        let window = ContextWindow::new(&runtime.config.context).with_graph(graph);
        let permissions = PermissionManager::new(
            runtime.config.permissions.auto_approve.clone(),
            Arc::clone(&runtime.store),
        );
        let dispatcher =
            ToolDispatcher::new(Arc::clone(&runtime.registry), Arc::clone(&runtime.bus));

        let state = EngineState {
            status: session.status,
            session,
            messages,
            store: runtime.store,
            bus: runtime.bus,
            client: runtime.client,
            registry: runtime.registry,
            prompter: runtime.prompter,
            permissions,
            dispatcher,
            window,
            max_iterations: MAX_ITERATIONS,
        };
        tokio::spawn(state.run(rx));
        handle
    }
}

struct EngineState {
    session: SessionRecord,
    messages: Vec<Message>,
    status: SessionStatus,
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    client: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    prompter: Arc<dyn AskPrompter>,
    permissions: PermissionManager,
    dispatcher: ToolDispatcher,
    window: ContextWindow,
    max_iterations: u32,
}

impl EngineState {
    async fn run(mut self, mut rx: mpsc::Receiver<EngineRequest>) {
        while let Some(request) = rx.recv().await {
            match request {
                EngineRequest::SendMessage { text, reply } => {
                    let result = self.handle_send(text).await;
                    let _ = reply.send(result);
                }
                EngineRequest::GetHistory { reply } => {
                    let _ = reply.send(self.messages.clone());
                }
                EngineRequest::GetStatus { reply } => {
                    let _ = reply.send(self.status);
                }
                EngineRequest::Stop { reply } => {
                    if let Err(err) = self.shutdown() {
                        warn!(session_id = %self.session.id, "shutdown error: {err}");
                    }
                    // Close before replying so `is_alive()` is false the
                    // moment the stop resolves.
                    rx.close();
                    let _ = reply.send(());
                    return;
                }
            }
        }
    }

    fn topic(&self) -> String {
        session_topic(&self.session.id)
    }

    /// Persist the status change, then broadcast it.  No-op when unchanged.
    fn set_status(&mut self, status: SessionStatus) -> Result<(), EngineError> {
        if self.status == status {
            return Ok(());
        }
        self.store.update_session(
            &self.session.id,
            &SessionUpdate {
                status: Some(status),
                ..SessionUpdate::default()
            },
        )?;
        self.status = status;
        self.session.status = status;
        self.bus.publish(
            &self.topic(),
            Event::SessionStatus {
                id: self.session.id.clone(),
                status,
            },
        );
        Ok(())
    }

    /// Append a message: store write first, in-memory second, broadcast last.
    fn persist_message(&mut self, message: Message) -> Result<(), EngineError> {
        let role = message.role;
        self.store.save_message(&self.session.id, &message)?;
        self.messages.push(message.clone());
        self.bus.publish(
            &self.topic(),
            Event::NewMessage {
                id: self.session.id.clone(),
                message,
            },
        );
        emit_session_message(&self.bus, &self.session.id, role);
        Ok(())
    }

    fn apply_usage(&mut self, usage: &Usage) -> Result<(), EngineError> {
        self.store.update_costs(
            &self.session.id,
            usage.input_tokens,
            usage.output_tokens,
            usage.total_cost,
        )?;
        self.session.input_tokens += usage.input_tokens;
        self.session.output_tokens += usage.output_tokens;
        self.session.cost_usd += usage.total_cost;
        Ok(())
    }

    async fn handle_send(&mut self, text: String) -> Result<String, EngineError> {
        self.set_status(SessionStatus::Thinking)?;

        // First user message names an untitled session.
        if self.session.title.is_empty() {
            let title: String = text.chars().take(80).collect();
            self.session = self.store.update_session(
                &self.session.id,
                &SessionUpdate {
                    title: Some(title),
                    ..SessionUpdate::default()
                },
            )?;
        }

        self.persist_message(Message::user(&text))?;

        let model = ModelSpec::parse(&self.session.model);
        let result = self.run_loop(&model).await;

        // Status converges to idle on every exit path.
        if let Err(err) = self.set_status(SessionStatus::Idle) {
            if result.is_ok() {
                return Err(err);
            }
        }
        result
    }

    /// The reason/act loop for one user turn.
    async fn run_loop(&mut self, model: &ModelSpec) -> Result<String, EngineError> {
        let project_path = PathBuf::from(&self.session.project_path);
        let mut rounds = 0u32;

        loop {
            // Cap reached: fail the turn without calling the LLM again.
            if rounds == self.max_iterations {
                return Err(EngineError::IterationCap(self.max_iterations));
            }

            let system_prompt = compose_system_prompt(&project_path, model);
            let windowed = self.window.build(
                &self.messages,
                &system_prompt,
                model,
                Some(&self.session.id),
                Some(&project_path),
            );
            let opts = GenerateOptions {
                tools: self.registry.definitions(),
                max_output_tokens: None,
            };

            let meta = LlmSpanMeta {
                session_id: Some(self.session.id.clone()),
                model: model.to_string(),
                team_id: None,
            };
            let response = span_llm_request(
                self.bus.as_ref(),
                meta,
                self.client.generate_text(model, &windowed, opts),
            )
            .await
            .map_err(|err| EngineError::Transport(err.to_string()))?;

            let usage = response.usage().clone();
            match response.classify() {
                Classification::FinalAnswer { text } => {
                    let text = text.clone();
                    self.persist_message(Message::assistant(&text))?;
                    self.apply_usage(&usage)?;
                    return Ok(text);
                }
                Classification::Error { message } => {
                    // No degenerate assistant message is persisted.
                    return Err(EngineError::Transport(message.clone()));
                }
                Classification::ToolCalls { text, calls } => {
                    let text = text.clone();
                    let calls = calls.clone();
                    self.set_status(SessionStatus::ExecutingTool)?;
                    self.persist_message(Message::assistant_with_tool_calls(text, calls.clone()))?;

                    // Every call in the batch produces a tool result before
                    // the status leaves executing_tool.
                    for call in &calls {
                        self.bus.publish(
                            &self.topic(),
                            Event::ToolExecuting {
                                id: self.session.id.clone(),
                                name: call.name.clone(),
                            },
                        );

                        let outcome = self.execute_with_permissions(call, &project_path).await?;

                        let tool_message = Message::tool(&call.id, &outcome.text);
                        self.store.save_message(&self.session.id, &tool_message)?;
                        self.messages.push(tool_message.clone());
                        self.bus.publish(
                            &self.topic(),
                            Event::ToolComplete {
                                id: self.session.id.clone(),
                                name: call.name.clone(),
                                result_text: outcome.text.clone(),
                            },
                        );
                        self.bus.publish(
                            &self.topic(),
                            Event::NewMessage {
                                id: self.session.id.clone(),
                                message: tool_message,
                            },
                        );
                        emit_session_message(&self.bus, &self.session.id, loom_model::Role::Tool);
                    }

                    self.apply_usage(&usage)?;
                    self.set_status(SessionStatus::Thinking)?;
                    rounds += 1;
                }
            }
        }
    }

    /// Permission gate in rule order, then dispatch.  Denials become the
    /// synthetic tool result and never fail the loop.
    async fn execute_with_permissions(
        &mut self,
        call: &ToolCallRequest,
        project_path: &std::path::Path,
    ) -> Result<ToolOutcome, EngineError> {
        let ctx = ToolContext {
            project_path: project_path.to_path_buf(),
            session_id: self.session.id.clone(),
        };
        Ok(run_gated_tool(
            &self.permissions,
            self.prompter.as_ref(),
            &self.dispatcher,
            call,
            &ctx,
            self.session.auto_approve,
        )
        .await?)
    }

    /// Mark the session stopped and discard its grants.
    fn shutdown(&mut self) -> Result<(), EngineError> {
        self.set_status(SessionStatus::Stopped)?;
        self.permissions.clear(&self.session.id)?;
        Ok(())
    }
}

/// Run one tool call behind the permission gate: rules first, then the
/// ask-path prompter, with approvals recorded as grants.  Shared between the
/// session loop and the architect's execute phase.
pub(crate) async fn run_gated_tool(
    permissions: &PermissionManager,
    prompter: &dyn AskPrompter,
    dispatcher: &ToolDispatcher,
    call: &ToolCallRequest,
    ctx: &ToolContext,
    auto_approve: bool,
) -> Result<ToolOutcome, StoreError> {
    let path = target_path(call);
    let mut decision = permissions.check(&call.name, &path, &ctx.session_id);

    if decision == Decision::Ask {
        decision = prompter
            .ask(&call.name, &path, &ctx.session_id, auto_approve)
            .await;
        if decision == Decision::Allowed {
            // Approval becomes a grant so the session is not re-asked.
            permissions.grant(&call.name, &path, &ctx.session_id)?;
        }
    }

    match decision {
        Decision::Allowed => Ok(dispatcher.run(call, ctx).await),
        Decision::Denied | Decision::Ask => {
            debug!(tool = %call.name, path, "tool call denied");
            Ok(ToolOutcome::err(format!(
                "Permission denied for {} on {}",
                call.name, path
            )))
        }
    }
}

/// Extract the path-like argument a permission check should scope to.
fn target_path(call: &ToolCallRequest) -> String {
    for key in ["path", "file_path", "file", "target", "directory"] {
        if let Some(serde_json::Value::String(path)) = call.arguments.get(key) {
            return path.clone();
        }
    }
    String::new()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
