// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::future::Future;
use std::time::Instant;

use loom_events::{team_topic, Event, EventBus, TELEMETRY_TOPIC};
use loom_model::{Classification, LlmResponse, Role};
use rust_decimal::Decimal;

/// Metadata attached to an LLM request span.
#[derive(Debug, Clone, Default)]
pub struct LlmSpanMeta {
    pub session_id: Option<String>,
    pub model: String,
    pub team_id: Option<String>,
}

/// Metadata attached to a tool execution span.
#[derive(Debug, Clone, Default)]
pub struct ToolSpanMeta {
    pub session_id: Option<String>,
    pub tool: String,
    pub team_id: Option<String>,
}

/// Publish an event to `telemetry:updates`, mirroring to the team topic when
/// the metadata names one.
fn emit(bus: &EventBus, event: Event) {
    if let Some(team) = event.team_id().map(str::to_string) {
        bus.publish(&team_topic(&team), event.clone());
    }
    bus.publish(TELEMETRY_TOPIC, event);
}

/// Wrap one transport call in a start/stop span.
///
/// The stop event carries the elapsed wall-clock duration in nanoseconds and
/// the success/error classification: a transport failure or a response that
/// classifies as `Error` sets the `error` flag; usage is read from successful
/// responses only.  The wrapped result is returned untouched.
pub async fn span_llm_request<F>(
    bus: &EventBus,
    meta: LlmSpanMeta,
    fut: F,
) -> anyhow::Result<LlmResponse>
where
    F: Future<Output = anyhow::Result<LlmResponse>>,
{
    emit(
        bus,
        Event::LlmRequestStart {
            session_id: meta.session_id.clone(),
            model: meta.model.clone(),
            team_id: meta.team_id.clone(),
        },
    );

    let started = Instant::now();
    let result = fut.await;
    let duration_ns = started.elapsed().as_nanos() as u64;

    let (error, input_tokens, output_tokens, cost) = match &result {
        Ok(response) => {
            let usage = response.usage();
            let failed = matches!(response.classify(), Classification::Error { .. });
            (
                failed,
                usage.input_tokens,
                usage.output_tokens,
                usage.total_cost,
            )
        }
        Err(_) => (true, 0, 0, Decimal::ZERO),
    };

    emit(
        bus,
        Event::LlmRequestStop {
            session_id: meta.session_id,
            model: meta.model,
            team_id: meta.team_id,
            duration_ns,
            error,
            input_tokens,
            output_tokens,
            cost,
        },
    );
    result
}

/// Wrap one tool execution in a start/stop span.
///
/// `is_error` classifies the finished value; everything else about the value
/// passes through untouched.
pub async fn span_tool_execute<T, F>(
    bus: &EventBus,
    meta: ToolSpanMeta,
    fut: F,
    is_error: impl FnOnce(&T) -> bool,
) -> T
where
    F: Future<Output = T>,
{
    emit(
        bus,
        Event::ToolExecuteStart {
            session_id: meta.session_id.clone(),
            tool: meta.tool.clone(),
            team_id: meta.team_id.clone(),
        },
    );

    let started = Instant::now();
    let result = fut.await;
    let duration_ns = started.elapsed().as_nanos() as u64;

    emit(
        bus,
        Event::ToolExecuteStop {
            session_id: meta.session_id,
            tool: meta.tool,
            team_id: meta.team_id,
            duration_ns,
            error: is_error(&result),
        },
    );
    result
}

/// Non-span notification: a message was persisted for a session.
pub fn emit_session_message(bus: &EventBus, session_id: &str, role: Role) {
    emit(
        bus,
        Event::SessionMessage {
            session_id: session_id.to_string(),
            role,
        },
    );
}

/// Non-span notification: a decision node was logged.
pub fn emit_decision_logged(bus: &EventBus, session_id: Option<&str>) {
    emit(
        bus,
        Event::DecisionLogged {
            session_id: session_id.map(str::to_string),
        },
    );
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use loom_model::Usage;

    fn llm_meta() -> LlmSpanMeta {
        LlmSpanMeta {
            session_id: Some("s1".into()),
            model: "anthropic:claude-sonnet-4-6".into(),
            team_id: None,
        }
    }

    #[tokio::test]
    async fn llm_span_emits_start_then_stop() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(TELEMETRY_TOPIC);

        let result = span_llm_request(&bus, llm_meta(), async {
            Ok(LlmResponse::final_answer("hi", Usage::new(10, 5, Decimal::ZERO)))
        })
        .await;
        assert!(result.is_ok());

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind(), "llm_request_start");
        match rx.try_recv().unwrap() {
            Event::LlmRequestStop {
                error,
                input_tokens,
                output_tokens,
                ..
            } => {
                assert!(!error);
                assert_eq!((input_tokens, output_tokens), (10, 5));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn llm_span_flags_transport_failure() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(TELEMETRY_TOPIC);

        let result: anyhow::Result<LlmResponse> =
            span_llm_request(&bus, llm_meta(), async { Err(anyhow::anyhow!("down")) }).await;
        assert!(result.is_err());

        let _start = rx.try_recv().unwrap();
        match rx.try_recv().unwrap() {
            Event::LlmRequestStop { error, .. } => assert!(error),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn llm_span_flags_error_classification() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(TELEMETRY_TOPIC);

        let _ = span_llm_request(&bus, llm_meta(), async {
            Ok(LlmResponse::error("overloaded"))
        })
        .await;

        let _start = rx.try_recv().unwrap();
        match rx.try_recv().unwrap() {
            Event::LlmRequestStop { error, .. } => assert!(error),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_span_classifies_with_closure() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(TELEMETRY_TOPIC);

        let meta = ToolSpanMeta {
            session_id: Some("s1".into()),
            tool: "file_read".into(),
            team_id: None,
        };
        let out = span_tool_execute(&bus, meta, async { "Error: nope".to_string() }, |s| {
            s.starts_with("Error:")
        })
        .await;
        assert_eq!(out, "Error: nope");

        let _start = rx.try_recv().unwrap();
        match rx.try_recv().unwrap() {
            Event::ToolExecuteStop { error, tool, .. } => {
                assert!(error);
                assert_eq!(tool, "file_read");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn team_events_mirror_to_team_topic() {
        let bus = EventBus::new();
        let mut team_rx = bus.subscribe(&team_topic("t1"));

        let meta = ToolSpanMeta {
            session_id: None,
            tool: "shell".into(),
            team_id: Some("t1".into()),
        };
        span_tool_execute(&bus, meta, async { () }, |_| false).await;

        assert_eq!(team_rx.try_recv().unwrap().kind(), "tool_execute_start");
        assert_eq!(team_rx.try_recv().unwrap().kind(), "tool_execute_stop");
    }

    #[tokio::test]
    async fn non_span_emitters_publish_single_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(TELEMETRY_TOPIC);

        emit_session_message(&bus, "s1", Role::User);
        emit_decision_logged(&bus, Some("s1"));

        assert_eq!(rx.try_recv().unwrap().kind(), "session_message");
        assert_eq!(rx.try_recv().unwrap().kind(), "decision_logged");
        assert!(rx.try_recv().is_none());
    }
}
