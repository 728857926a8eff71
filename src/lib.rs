// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Loom — the core runtime of an AI coding assistant.
//!
//! A process-per-conversation session engine drives a tool-using LLM agent
//! through a bounded reason/act loop, coupled to a token-budgeted context
//! window, a persistent decision graph, and a real-time event fabric.  This
//! crate re-exports the subsystem crates as one surface; front-ends (CLI,
//! web) and collaborators (LLM transport, tools, repo mapper) plug in at the
//! exported traits.

pub use loom_config as config;
pub use loom_core as core;
pub use loom_events as events;
pub use loom_graph as graph;
pub use loom_model as model;
pub use loom_store as store;
pub use loom_telemetry as telemetry;
pub use loom_tools as tools;

pub use loom_config::Config;
pub use loom_core::{
    ArchitectPipeline, AskPrompter, ContextWindow, DefaultPrompter, EngineError, EngineHandle,
    EngineRuntime, RepoMapSource, SessionEngine, SessionManager, StartOptions,
};
pub use loom_events::{session_topic, Event, EventBus, TELEMETRY_TOPIC};
pub use loom_graph::{DecisionGraph, EdgeKind, NewNode, NodeKind, NodeStatus};
pub use loom_model::{
    LlmClient, LlmResponse, Message, ModelSpec, Role, SessionStatus, ToolCallRequest, Usage,
};
pub use loom_store::{MemoryStore, SqliteStore, Store};
pub use loom_telemetry::{TelemetryAggregator, TelemetryHandle};
pub use loom_tools::{PermissionManager, Tool, ToolDispatcher, ToolRegistry};
