// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
    /// Accepts any JSON value; omitted from the generated schema's `type`.
    Any,
}

impl ParamType {
    fn json_type(&self) -> Option<&'static str> {
        match self {
            ParamType::String => Some("string"),
            ParamType::Integer => Some("integer"),
            ParamType::Float => Some("number"),
            ParamType::Boolean => Some("boolean"),
            ParamType::Any => None,
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub doc: String,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, param_type: ParamType, doc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            doc: doc.into(),
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType, doc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            doc: doc.into(),
        }
    }
}

/// Build the JSON Schema object advertised to the model for a parameter list.
pub(crate) fn params_to_json_schema(params: &[ParamSpec]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for param in params {
        let mut prop = serde_json::Map::new();
        if let Some(ty) = param.param_type.json_type() {
            prop.insert("type".into(), Value::String(ty.into()));
        }
        prop.insert("description".into(), Value::String(param.doc.clone()));
        properties.insert(param.name.clone(), Value::Object(prop));
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Execution context handed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub project_path: PathBuf,
    pub session_id: String,
}

/// Failure of a tool run.  The dispatcher renders this as `"Error: …"` text
/// fed back to the model; it never escapes the loop.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// The dispatcher's normalised view of one finished invocation: the inline
/// transcript text plus the error flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            text: format!("Error: {}", message.into()),
            is_error: true,
        }
    }
}

/// A capability the agent may invoke.
///
/// `run` receives arguments already normalised to the declared parameter
/// names.  Failures are returned, not panicked; the dispatcher additionally
/// maps panics and timeouts onto the same error surface.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Vec<ParamSpec>;
    async fn run(
        &self,
        args: serde_json::Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError>;
}

/// Render a raw tool result into its inline transcript form.
///
/// Strings pass through; a map with a string `result` field collapses to that
/// field; any other success value is dumped as JSON; failures render as
/// `"Error: …"`.
pub(crate) fn render_result(result: Result<Value, ToolError>) -> ToolOutcome {
    match result {
        Ok(Value::String(text)) => ToolOutcome::ok(text),
        Ok(Value::Object(map)) => match map.get("result") {
            Some(Value::String(text)) => ToolOutcome::ok(text.clone()),
            _ => ToolOutcome::ok(Value::Object(map).to_string()),
        },
        Ok(other) => ToolOutcome::ok(other.to_string()),
        Err(err) => ToolOutcome::err(err.message),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
