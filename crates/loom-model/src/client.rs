// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Message, ModelSpec, ToolCallRequest};

/// Tool definition forwarded to the provider with a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub tools: Vec<ToolDefinition>,
    pub max_output_tokens: Option<u32>,
}

/// Token and cost usage reported by the provider for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Exact-decimal cost in USD.  Never accumulated as a float.
    pub total_cost: Decimal,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64, total_cost: Decimal) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_cost,
        }
    }
}

/// What a response amounts to once the transport has classified it.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    FinalAnswer {
        text: String,
    },
    ToolCalls {
        /// Optional text the model emitted alongside its tool calls.
        text: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
    Error {
        message: String,
    },
}

/// Opaque provider response.  Callers read it only through [`classify`] and
/// [`usage`]; the engine never inspects provider wire formats.
///
/// [`classify`]: LlmResponse::classify
/// [`usage`]: LlmResponse::usage
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    classification: Classification,
    usage: Usage,
}

impl LlmResponse {
    pub fn final_answer(text: impl Into<String>, usage: Usage) -> Self {
        Self {
            classification: Classification::FinalAnswer { text: text.into() },
            usage,
        }
    }

    /// Build a tool-call response.  Calls without a provider-assigned id get
    /// a synthetic one so results can always be correlated.
    pub fn tool_calls(text: Option<String>, calls: Vec<ToolCallRequest>, usage: Usage) -> Self {
        let calls = calls
            .into_iter()
            .enumerate()
            .map(|(i, mut call)| {
                if call.id.is_empty() {
                    call.id = format!("call_synthetic_{i}");
                    warn!(tool_name = %call.name, "tool call had empty id; generated synthetic id");
                }
                call
            })
            .collect();
        Self {
            classification: Classification::ToolCalls {
                text,
                calls,
            },
            usage,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            classification: Classification::Error {
                message: message.into(),
            },
            usage: Usage::default(),
        }
    }

    pub fn classify(&self) -> &Classification {
        &self.classification
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }
}

/// The LLM transport consumed by the core.
///
/// Implementations own all provider wire details, retries, and timeouts.
/// The core only sends role-tagged messages plus tool definitions and reads
/// back a classified response.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate_text(
        &self,
        spec: &ModelSpec,
        messages: &[Message],
        opts: GenerateOptions,
    ) -> anyhow::Result<LlmResponse>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_answer_classifies() {
        let r = LlmResponse::final_answer("hello", Usage::default());
        assert!(matches!(
            r.classify(),
            Classification::FinalAnswer { text } if text == "hello"
        ));
    }

    #[test]
    fn empty_call_id_gets_synthetic_replacement() {
        let calls = vec![ToolCallRequest::new("", "file_read", serde_json::Map::new())];
        let r = LlmResponse::tool_calls(None, calls, Usage::default());
        match r.classify() {
            Classification::ToolCalls { calls, .. } => {
                assert_eq!(calls[0].id, "call_synthetic_0");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn provider_assigned_id_is_kept() {
        let calls = vec![ToolCallRequest::new("c9", "shell", serde_json::Map::new())];
        let r = LlmResponse::tool_calls(None, calls, Usage::default());
        match r.classify() {
            Classification::ToolCalls { calls, .. } => assert_eq!(calls[0].id, "c9"),
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn error_response_has_zero_usage() {
        let r = LlmResponse::error("boom");
        assert_eq!(r.usage().input_tokens, 0);
        assert!(matches!(r.classify(), Classification::Error { message } if message == "boom"));
    }
}
