// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::debug;

use loom_events::{Event, EventBus, EventReceiver, TELEMETRY_TOPIC};

/// Rolling metrics for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
    pub request_count: u64,
    pub total_latency_ns: u64,
    pub tool_call_count: u64,
    /// Message counts keyed by role name.
    pub message_counts: HashMap<String, u64>,
    pub decision_count: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Totals across every session.
#[derive(Debug, Clone, Default)]
pub struct GlobalTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
    pub requests: u64,
}

/// Per-tool execution statistics.
#[derive(Debug, Clone, Default)]
pub struct ToolMetrics {
    pub count: u64,
    pub total_duration_ns: u64,
    pub successes: u64,
}

/// Immutable aggregate view published after every applied event.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub sessions: HashMap<String, SessionMetrics>,
    pub totals: GlobalTotals,
    /// Request counts keyed by model spec.
    pub models: HashMap<String, u64>,
    pub tools: HashMap<String, ToolMetrics>,
}

impl TelemetrySnapshot {
    fn session(&mut self, id: &str) -> &mut SessionMetrics {
        self.sessions.entry(id.to_string()).or_default()
    }

    fn touch(&mut self, session_id: &Option<String>) {
        if let Some(id) = session_id {
            self.session(id).last_activity = Some(Utc::now());
        }
    }

    fn apply(&mut self, event: &Event) {
        match event {
            Event::LlmRequestStop {
                session_id,
                model,
                duration_ns,
                input_tokens,
                output_tokens,
                cost,
                ..
            } => {
                if let Some(id) = session_id {
                    let s = self.session(id);
                    s.input_tokens += input_tokens;
                    s.output_tokens += output_tokens;
                    s.cost += *cost;
                    s.request_count += 1;
                    s.total_latency_ns += duration_ns;
                }
                self.totals.input_tokens += input_tokens;
                self.totals.output_tokens += output_tokens;
                self.totals.cost += *cost;
                self.totals.requests += 1;
                *self.models.entry(model.clone()).or_default() += 1;
                self.touch(session_id);
            }
            Event::ToolExecuteStop {
                session_id,
                tool,
                duration_ns,
                error,
                ..
            } => {
                let t = self.tools.entry(tool.clone()).or_default();
                t.count += 1;
                t.total_duration_ns += duration_ns;
                if !error {
                    t.successes += 1;
                }
                if let Some(id) = session_id {
                    self.session(id).tool_call_count += 1;
                }
                self.touch(session_id);
            }
            Event::SessionMessage { session_id, role } => {
                let s = self.session(session_id);
                *s.message_counts.entry(role.as_str().to_string()).or_default() += 1;
                s.last_activity = Some(Utc::now());
            }
            Event::DecisionLogged { session_id } => {
                if let Some(id) = session_id {
                    self.session(id).decision_count += 1;
                }
                self.touch(session_id);
            }
            // Start events carry no aggregate deltas.
            _ => {}
        }
    }
}

/// Aggregator over the `telemetry:updates` stream.
///
/// A single spawned task owns the state and applies events in arrival order,
/// publishing a fresh immutable snapshot after each one — the task is the
/// only writer, so a reader that observes a snapshot observes every earlier
/// update too.  Readers clone the current `Arc` without coordinating with
/// the writer.
pub struct TelemetryAggregator;

impl TelemetryAggregator {
    /// Subscribe to the bus and start the writer task.
    pub fn spawn(bus: &EventBus) -> TelemetryHandle {
        let rx = bus.subscribe(TELEMETRY_TOPIC);
        let (tx, watch_rx) = watch::channel(Arc::new(TelemetrySnapshot::default()));
        tokio::spawn(run(rx, tx));
        TelemetryHandle { rx: watch_rx }
    }
}

async fn run(mut rx: EventReceiver, tx: watch::Sender<Arc<TelemetrySnapshot>>) {
    let mut state = TelemetrySnapshot::default();
    while let Some(event) = rx.recv().await {
        state.apply(&event);
        if tx.send(Arc::new(state.clone())).is_err() {
            debug!("all telemetry readers dropped; stopping aggregator");
            return;
        }
    }
}

/// Read side of the aggregator.
#[derive(Clone)]
pub struct TelemetryHandle {
    rx: watch::Receiver<Arc<TelemetrySnapshot>>,
}

impl TelemetryHandle {
    /// Current snapshot.  Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<TelemetrySnapshot> {
        self.rx.borrow().clone()
    }

    /// Wait until the snapshot changes, then return it.  Used by pollers and
    /// tests; returns `None` when the aggregator has stopped.
    pub async fn changed(&mut self) -> Option<Arc<TelemetrySnapshot>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
