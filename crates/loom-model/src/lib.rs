// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod catalog;
mod client;
mod mock;
mod spec;
mod types;

pub use catalog::context_limit;
pub use client::{Classification, GenerateOptions, LlmClient, LlmResponse, ToolDefinition, Usage};
pub use mock::ScriptedClient;
pub use spec::ModelSpec;
pub use types::{
    estimate_tokens, Message, Role, SessionStatus, ToolCallRequest, MESSAGE_OVERHEAD_TOKENS,
};
