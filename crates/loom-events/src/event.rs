// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use loom_model::{Message, Role, SessionStatus};

/// Topic carrying aggregate-telemetry events.
pub const TELEMETRY_TOPIC: &str = "telemetry:updates";

/// Topic for a single session's lifecycle events.
pub fn session_topic(session_id: &str) -> String {
    format!("session:{session_id}")
}

/// Topic mirroring telemetry events for one team.
pub fn team_topic(team_id: &str) -> String {
    format!("telemetry:team:{team_id}")
}

/// Phase of the architect pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchitectPhase {
    Planning,
    Executing,
}

/// Every payload the core publishes, across all topics.
///
/// Session topics carry the `Session*`/`Tool*`/`NewMessage`/`Architect*`
/// variants; `telemetry:updates` (and team mirrors) carry the rest.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // ── session:{id} ─────────────────────────────────────────────────────────
    SessionStatus {
        id: String,
        status: SessionStatus,
    },
    NewMessage {
        id: String,
        message: Message,
    },
    ToolExecuting {
        id: String,
        name: String,
    },
    ToolComplete {
        id: String,
        name: String,
        result_text: String,
    },
    ArchitectPhase {
        id: String,
        phase: ArchitectPhase,
    },
    ArchitectPlan {
        id: String,
        plan: String,
    },
    ArchitectStep {
        id: String,
        step: String,
    },

    // ── telemetry:updates / telemetry:team:{id} ──────────────────────────────
    LlmRequestStart {
        session_id: Option<String>,
        model: String,
        team_id: Option<String>,
    },
    LlmRequestStop {
        session_id: Option<String>,
        model: String,
        team_id: Option<String>,
        duration_ns: u64,
        error: bool,
        input_tokens: u64,
        output_tokens: u64,
        cost: Decimal,
    },
    ToolExecuteStart {
        session_id: Option<String>,
        tool: String,
        team_id: Option<String>,
    },
    ToolExecuteStop {
        session_id: Option<String>,
        tool: String,
        team_id: Option<String>,
        duration_ns: u64,
        error: bool,
    },
    SessionMessage {
        session_id: String,
        role: Role,
    },
    DecisionLogged {
        session_id: Option<String>,
    },
}

impl Event {
    /// Short identifier for logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::SessionStatus { .. } => "session_status",
            Event::NewMessage { .. } => "new_message",
            Event::ToolExecuting { .. } => "tool_executing",
            Event::ToolComplete { .. } => "tool_complete",
            Event::ArchitectPhase { .. } => "architect_phase",
            Event::ArchitectPlan { .. } => "architect_plan",
            Event::ArchitectStep { .. } => "architect_step",
            Event::LlmRequestStart { .. } => "llm_request_start",
            Event::LlmRequestStop { .. } => "llm_request_stop",
            Event::ToolExecuteStart { .. } => "tool_execute_start",
            Event::ToolExecuteStop { .. } => "tool_execute_stop",
            Event::SessionMessage { .. } => "session_message",
            Event::DecisionLogged { .. } => "decision_logged",
        }
    }

    /// The team topic this event should be mirrored to, when it carries one.
    pub fn team_id(&self) -> Option<&str> {
        match self {
            Event::LlmRequestStart { team_id, .. }
            | Event::LlmRequestStop { team_id, .. }
            | Event::ToolExecuteStart { team_id, .. }
            | Event::ToolExecuteStop { team_id, .. } => team_id.as_deref(),
            _ => None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_topic_embeds_id() {
        assert_eq!(session_topic("abc"), "session:abc");
    }

    #[test]
    fn team_topic_embeds_id() {
        assert_eq!(team_topic("t1"), "telemetry:team:t1");
    }

    #[test]
    fn kind_names_match_wire_taxonomy() {
        let ev = Event::SessionStatus {
            id: "s".into(),
            status: SessionStatus::Idle,
        };
        assert_eq!(ev.kind(), "session_status");
        let ev = Event::ArchitectPhase {
            id: "s".into(),
            phase: ArchitectPhase::Planning,
        };
        assert_eq!(ev.kind(), "architect_phase");
    }

    #[test]
    fn team_id_only_on_span_events() {
        let ev = Event::ToolExecuteStop {
            session_id: None,
            tool: "shell".into(),
            team_id: Some("t1".into()),
            duration_ns: 1,
            error: false,
        };
        assert_eq!(ev.team_id(), Some("t1"));
        let ev = Event::DecisionLogged { session_id: None };
        assert_eq!(ev.team_id(), None);
    }
}
