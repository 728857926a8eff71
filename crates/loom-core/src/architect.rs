// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use loom_events::{session_topic, ArchitectPhase, Event};
use loom_model::{
    Classification, GenerateOptions, Message, ModelSpec, SessionStatus, Usage,
};
use loom_store::{SessionRecord, SessionUpdate, StoreError};
use loom_telemetry::{emit_session_message, span_llm_request, LlmSpanMeta};
use loom_tools::{PermissionManager, ToolContext, ToolDispatcher, SUBAGENT_TIMEOUT};

use crate::engine::{run_gated_tool, EngineRuntime};

/// Tools a step executor may use.
const EXECUTOR_TOOLS: &[&str] = &["file_read", "file_edit", "file_write", "directory_list"];

/// Inner cap on tool rounds per plan step.
const STEP_ITERATIONS: u32 = 10;

const PLAN_INSTRUCTION: &str = "\
Produce an implementation plan for the request below as a single JSON object, \
with no commentary outside the JSON:\n\
{\"summary\": \"one-paragraph overview\", \"plan\": [{\"file\": \"path\", \
\"action\": \"create|edit|delete\", \"description\": \"what changes\", \
\"details\": \"how, concretely\"}]}\n\
Order the steps so each builds on the previous ones.";

#[derive(Debug, Error)]
pub enum ArchitectError {
    /// The plan response was not valid plan JSON.
    #[error("plan decode failed: {0}")]
    Decode(String),
    #[error("{0}")]
    Transport(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    Create,
    Edit,
    Delete,
}

impl PlanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanAction::Create => "create",
            PlanAction::Edit => "edit",
            PlanAction::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub file: String,
    pub action: PlanAction,
    pub description: String,
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectPlan {
    #[serde(default)]
    pub summary: String,
    pub plan: Vec<PlanStep>,
}

/// Two-phase plan→execute pipeline on the session-engine primitives: the
/// strong model plans once, the fast model executes each step under a
/// restricted tool set, and every persisted message and transition uses the
/// same store-then-broadcast ordering as the main loop.
pub struct ArchitectPipeline {
    runtime: EngineRuntime,
    session: SessionRecord,
    permissions: PermissionManager,
    dispatcher: ToolDispatcher,
}

impl ArchitectPipeline {
    pub fn new(runtime: EngineRuntime, session: SessionRecord) -> Self {
        let permissions = PermissionManager::new(
            runtime.config.permissions.auto_approve.clone(),
            std::sync::Arc::clone(&runtime.store),
        );
        let registry = std::sync::Arc::new(runtime.registry.restricted(EXECUTOR_TOOLS));
        let dispatcher = ToolDispatcher::new(registry, std::sync::Arc::clone(&runtime.bus))
            .with_timeout(SUBAGENT_TIMEOUT);
        Self {
            runtime,
            session,
            permissions,
            dispatcher,
        }
    }

    fn topic(&self) -> String {
        session_topic(&self.session.id)
    }

    fn set_status(&mut self, status: SessionStatus) -> Result<(), ArchitectError> {
        if self.session.status == status {
            return Ok(());
        }
        self.runtime.store.update_session(
            &self.session.id,
            &SessionUpdate {
                status: Some(status),
                ..SessionUpdate::default()
            },
        )?;
        self.session.status = status;
        self.runtime.bus.publish(
            &self.topic(),
            Event::SessionStatus {
                id: self.session.id.clone(),
                status,
            },
        );
        Ok(())
    }

    fn persist_message(&self, message: &Message) -> Result<(), ArchitectError> {
        self.runtime
            .store
            .save_message(&self.session.id, message)?;
        self.runtime.bus.publish(
            &self.topic(),
            Event::NewMessage {
                id: self.session.id.clone(),
                message: message.clone(),
            },
        );
        emit_session_message(&self.runtime.bus, &self.session.id, message.role);
        Ok(())
    }

    fn apply_usage(&mut self, usage: &Usage) -> Result<(), ArchitectError> {
        self.runtime.store.update_costs(
            &self.session.id,
            usage.input_tokens,
            usage.output_tokens,
            usage.total_cost,
        )?;
        Ok(())
    }

    async fn generate(
        &mut self,
        model: &ModelSpec,
        messages: &[Message],
        opts: GenerateOptions,
    ) -> Result<Classification, ArchitectError> {
        let meta = LlmSpanMeta {
            session_id: Some(self.session.id.clone()),
            model: model.to_string(),
            team_id: None,
        };
        let response = span_llm_request(
            self.runtime.bus.as_ref(),
            meta,
            self.runtime.client.generate_text(model, messages, opts),
        )
        .await
        .map_err(|err| ArchitectError::Transport(err.to_string()))?;
        self.apply_usage(&response.usage().clone())?;
        Ok(response.classify().clone())
    }

    /// Run the full pipeline for one user request.  Returns the final
    /// summary text.
    pub async fn run(&mut self, user_text: &str) -> Result<String, ArchitectError> {
        self.set_status(SessionStatus::Thinking)?;
        self.persist_message(&Message::user(user_text))?;

        let result = self.plan_and_execute(user_text).await;

        if let Err(err) = self.set_status(SessionStatus::Idle) {
            if result.is_ok() {
                return Err(err);
            }
        }
        result
    }

    async fn plan_and_execute(&mut self, user_text: &str) -> Result<String, ArchitectError> {
        // ── Plan ─────────────────────────────────────────────────────────────
        self.runtime.bus.publish(
            &self.topic(),
            Event::ArchitectPhase {
                id: self.session.id.clone(),
                phase: ArchitectPhase::Planning,
            },
        );

        let architect_model = ModelSpec::parse(self.runtime.config.model.architect());
        let plan_request = vec![
            Message::system(PLAN_INSTRUCTION),
            Message::user(user_text),
        ];
        let classified = self
            .generate(&architect_model, &plan_request, GenerateOptions::default())
            .await?;

        let plan_text = match classified {
            Classification::FinalAnswer { text } => text,
            Classification::ToolCalls { .. } => {
                return Err(ArchitectError::Decode(
                    "planning model returned tool calls instead of a plan".into(),
                ))
            }
            Classification::Error { message } => return Err(ArchitectError::Transport(message)),
        };

        let plan = decode_plan(&plan_text)?;
        debug!(steps = plan.plan.len(), "architect plan decoded");

        let formatted = format_plan(&plan);
        self.persist_message(&Message::assistant(&formatted))?;
        self.runtime.bus.publish(
            &self.topic(),
            Event::ArchitectPlan {
                id: self.session.id.clone(),
                plan: formatted,
            },
        );

        // ── Execute ──────────────────────────────────────────────────────────
        self.runtime.bus.publish(
            &self.topic(),
            Event::ArchitectPhase {
                id: self.session.id.clone(),
                phase: ArchitectPhase::Executing,
            },
        );
        self.set_status(SessionStatus::ExecutingTool)?;

        let editor_model = ModelSpec::parse(self.runtime.config.model.editor());
        let mut step_results = Vec::with_capacity(plan.plan.len());
        for (index, step) in plan.plan.iter().enumerate() {
            self.runtime.bus.publish(
                &self.topic(),
                Event::ArchitectStep {
                    id: self.session.id.clone(),
                    step: format!("{}/{} {} {}", index + 1, plan.plan.len(), step.action.as_str(), step.file),
                },
            );
            let result = self.execute_step(&editor_model, step).await?;
            step_results.push((step, result));
        }

        let summary = format_summary(&plan, &step_results);
        self.persist_message(&Message::assistant(&summary))?;
        Ok(summary)
    }

    /// A fresh short loop for one plan step: fast model, restricted tools,
    /// bounded rounds.  The step transcript is ephemeral — only the final
    /// plan and summary messages enter the session log.
    async fn execute_step(
        &mut self,
        model: &ModelSpec,
        step: &PlanStep,
    ) -> Result<String, ArchitectError> {
        let mut transcript = vec![
            Message::system(
                "You are executing one step of an implementation plan. Use the available \
                 tools to apply the change, then reply with a one-paragraph result.",
            ),
            Message::user(format_step(step)),
        ];
        let ctx = ToolContext {
            project_path: PathBuf::from(&self.session.project_path),
            session_id: self.session.id.clone(),
        };

        for _ in 0..STEP_ITERATIONS {
            let opts = GenerateOptions {
                tools: self.dispatcher.registry().definitions(),
                max_output_tokens: None,
            };
            let classified = self.generate(model, &transcript, opts).await?;

            match classified {
                Classification::FinalAnswer { text } => return Ok(text),
                Classification::Error { message } => return Err(ArchitectError::Transport(message)),
                Classification::ToolCalls { text, calls } => {
                    transcript.push(Message::assistant_with_tool_calls(text, calls.clone()));
                    for call in &calls {
                        let outcome = run_gated_tool(
                            &self.permissions,
                            self.runtime.prompter.as_ref(),
                            &self.dispatcher,
                            call,
                            &ctx,
                            self.session.auto_approve,
                        )
                        .await?;
                        transcript.push(Message::tool(&call.id, &outcome.text));
                    }
                }
            }
        }
        Ok(format!(
            "Step did not complete within {STEP_ITERATIONS} iterations."
        ))
    }
}

/// Decode the plan JSON per policy: the first fenced block when present,
/// otherwise the full trimmed text; reject on parse error.
fn decode_plan(text: &str) -> Result<ArchitectPlan, ArchitectError> {
    let body = first_fenced_block(text).unwrap_or_else(|| text.trim());
    let mut plan: ArchitectPlan = serde_json::from_str(body)
        .map_err(|err| ArchitectError::Decode(err.to_string()))?;
    if plan.summary.trim().is_empty() {
        plan.summary = format!("Implementation plan with {} steps.", plan.plan.len());
    }
    Ok(plan)
}

/// The contents of the first ``` fence, with any language tag stripped.
fn first_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_ticks = &text[start + 3..];
    let body_start = after_ticks.find('\n')? + 1;
    let body = &after_ticks[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn format_step(step: &PlanStep) -> String {
    let mut text = format!(
        "Step: {} `{}`\n{}",
        step.action.as_str(),
        step.file,
        step.description
    );
    if let Some(details) = &step.details {
        text.push_str("\n\nDetails:\n");
        text.push_str(details);
    }
    text
}

fn format_plan(plan: &ArchitectPlan) -> String {
    let mut text = format!("## Plan\n\n{}\n", plan.summary);
    for (index, step) in plan.plan.iter().enumerate() {
        text.push_str(&format!(
            "\n{}. **{}** `{}` — {}",
            index + 1,
            step.action.as_str(),
            step.file,
            step.description
        ));
    }
    text
}

fn format_summary(plan: &ArchitectPlan, results: &[(&PlanStep, String)]) -> String {
    let mut text = format!("## Result\n\n{}\n", plan.summary);
    for (index, (step, result)) in results.iter().enumerate() {
        text.push_str(&format!(
            "\n{}. `{}` — {}",
            index + 1,
            step.file,
            result.trim()
        ));
    }
    text
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
