// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use loom_events::EventBus;
use loom_model::{ToolCallRequest, ToolDefinition};
use loom_telemetry::{span_tool_execute, ToolSpanMeta};

use crate::tool::{params_to_json_schema, render_result, Tool, ToolContext, ToolOutcome};

/// Wall-clock cap for tool runs in the main session loop.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Wall-clock cap for tool runs in sub-agent loops (architect steps).
pub const SUBAGENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Central registry holding all available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// A copy of this registry restricted to the named tools.  Used by the
    /// architect's execute phase.
    pub fn restricted(&self, allowed: &[&str]) -> Self {
        Self {
            tools: self
                .tools
                .iter()
                .filter(|(name, _)| allowed.contains(&name.as_str()))
                .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
                .collect(),
        }
    }

    /// Tool definitions for the transport, sorted by name for stable prompts.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: params_to_json_schema(&tool.schema()),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes tool calls against a registry: key normalisation, wall-clock
/// timeout, panic isolation, span telemetry, and result rendering.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    bus: Arc<EventBus>,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            bus,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute one call.  Never fails: every failure mode (unknown tool,
    /// missing argument, tool error, panic, timeout) is rendered as an
    /// `"Error: …"` outcome fed back to the model.
    pub async fn run(&self, call: &ToolCallRequest, ctx: &ToolContext) -> ToolOutcome {
        let tool = match self.registry.get(&call.name) {
            Some(tool) => tool,
            None => return ToolOutcome::err(format!("unknown tool: {}", call.name)),
        };

        let args = match normalize_args(&call.arguments, &tool) {
            Ok(args) => args,
            Err(outcome) => return outcome,
        };

        let meta = ToolSpanMeta {
            session_id: Some(ctx.session_id.clone()),
            tool: call.name.clone(),
            team_id: None,
        };
        let timeout = self.timeout;
        let ctx = ctx.clone();
        let name = call.name.clone();

        span_tool_execute(
            self.bus.as_ref(),
            meta,
            async move {
                // Spawned so a panicking tool is isolated from the engine.
                let handle = tokio::spawn(async move { tool.run(args, &ctx).await });
                match tokio::time::timeout(timeout, handle).await {
                    Ok(Ok(result)) => render_result(result),
                    Ok(Err(join_err)) => {
                        warn!(tool = %name, "tool panicked: {join_err}");
                        ToolOutcome::err(format!("tool '{name}' panicked: {join_err}"))
                    }
                    Err(_) => ToolOutcome::err(format!(
                        "tool '{name}' timed out after {}s",
                        timeout.as_secs()
                    )),
                }
            },
            |outcome: &ToolOutcome| outcome.is_error,
        )
        .await
    }
}

/// Normalise argument keys against the declared schema.
///
/// LLMs emit JSON with free-form string keys while schemas declare canonical
/// names: each declared parameter is resolved by its exact name first, then
/// by a lenient match (ASCII case-insensitive, `-`/`_` equivalent).  A
/// required parameter missing after both lookups is an error.  Keys not
/// claimed by any declared parameter pass through untouched.
fn normalize_args(
    raw: &serde_json::Map<String, Value>,
    tool: &Arc<dyn Tool>,
) -> Result<serde_json::Map<String, Value>, ToolOutcome> {
    let mut normalized = serde_json::Map::new();
    let mut claimed: Vec<&String> = Vec::new();

    for param in tool.schema() {
        let found = raw
            .get_key_value(&param.name)
            .or_else(|| {
                raw.iter()
                    .find(|(key, _)| lenient_key_eq(key, &param.name))
            });
        match found {
            Some((key, value)) => {
                normalized.insert(param.name.clone(), value.clone());
                claimed.push(key);
            }
            None if param.required => {
                return Err(ToolOutcome::err(format!(
                    "missing required parameter '{}' for tool '{}'",
                    param.name,
                    tool.name()
                )));
            }
            None => {}
        }
    }

    for (key, value) in raw {
        if !claimed.contains(&key) && !normalized.contains_key(key) {
            normalized.insert(key.clone(), value.clone());
        }
    }
    Ok(normalized)
}

fn lenient_key_eq(a: &str, b: &str) -> bool {
    let canon = |s: &str| {
        s.chars()
            .map(|c| match c {
                '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect::<String>()
    };
    canon(a) == canon(b)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
