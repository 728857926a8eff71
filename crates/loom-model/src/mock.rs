// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::{
    GenerateOptions, LlmClient, LlmResponse, Message, ModelSpec, ToolCallRequest, Usage,
};

/// One scripted transport outcome.
#[derive(Debug, Clone)]
enum Script {
    Respond(LlmResponse),
    Fail(String),
}

/// What to do when the script queue runs dry.
#[derive(Debug, Clone)]
enum Exhausted {
    /// Return a canned final answer.
    Text(String),
    /// Replay the last script forever (for iteration-cap scenarios).
    RepeatLast,
}

/// A pre-scripted transport for tests.  Each `generate_text` call pops the
/// next script from the queue; tests can specify exact response sequences —
/// including tool calls and transport failures — without network access.
pub struct ScriptedClient {
    scripts: Mutex<Vec<Script>>,
    exhausted: Exhausted,
    calls: AtomicUsize,
    /// The last request seen, for tests that inspect what was sent.
    pub last_request: Arc<Mutex<Option<(ModelSpec, Vec<Message>, usize)>>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self {
            scripts: Mutex::new(responses.into_iter().map(Script::Respond).collect()),
            exhausted: Exhausted::Text("[no more scripts]".into()),
            calls: AtomicUsize::new(0),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Replay the final script indefinitely once the queue is consumed.
    pub fn repeat_last(mut self) -> Self {
        self.exhausted = Exhausted::RepeatLast;
        self
    }

    /// Number of `generate_text` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Convenience: always answer with the same text and usage.
    pub fn always_text(text: impl Into<String>, usage: Usage) -> Self {
        Self::new(vec![LlmResponse::final_answer(text, usage)]).repeat_last()
    }

    /// Convenience: one tool call, then a final answer.  Default usage on
    /// both rounds.
    pub fn tool_then_text(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Map<String, serde_json::Value>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            LlmResponse::tool_calls(
                None,
                vec![ToolCallRequest::new(call_id, tool_name, args)],
                small_usage(),
            ),
            LlmResponse::final_answer(final_text, small_usage()),
        ])
    }

    /// Convenience: a transport that fails every call.
    pub fn always_fail(message: impl Into<String>) -> Self {
        Self {
            scripts: Mutex::new(vec![Script::Fail(message.into())]),
            exhausted: Exhausted::RepeatLast,
            calls: AtomicUsize::new(0),
            last_request: Arc::new(Mutex::new(None)),
        }
    }
}

fn small_usage() -> Usage {
    Usage::new(5, 5, Decimal::new(1, 4)) // 0.0001 USD
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn generate_text(
        &self,
        spec: &ModelSpec,
        messages: &[Message],
        opts: GenerateOptions,
    ) -> anyhow::Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() =
            Some((spec.clone(), messages.to_vec(), opts.tools.len()));

        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.len() > 1 {
                scripts.remove(0)
            } else if scripts.len() == 1 {
                match self.exhausted {
                    Exhausted::RepeatLast => scripts[0].clone(),
                    Exhausted::Text(_) => scripts.remove(0),
                }
            } else {
                match &self.exhausted {
                    Exhausted::Text(t) => {
                        Script::Respond(LlmResponse::final_answer(t.clone(), Usage::default()))
                    }
                    // Unreachable in practice: RepeatLast never drains the queue.
                    Exhausted::RepeatLast => {
                        Script::Fail("scripted client has no scripts".into())
                    }
                }
            }
        };

        match script {
            Script::Respond(r) => Ok(r),
            Script::Fail(msg) => Err(anyhow::anyhow!(msg)),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Classification;

    fn req() -> (ModelSpec, Vec<Message>) {
        (ModelSpec::parse("mock:m"), vec![Message::user("hi")])
    }

    #[tokio::test]
    async fn pops_scripts_in_order() {
        let client = ScriptedClient::new(vec![
            LlmResponse::final_answer("one", Usage::default()),
            LlmResponse::final_answer("two", Usage::default()),
        ]);
        let (spec, msgs) = req();
        for expected in ["one", "two"] {
            let r = client
                .generate_text(&spec, &msgs, GenerateOptions::default())
                .await
                .unwrap();
            assert!(matches!(r.classify(), Classification::FinalAnswer { text } if text == expected));
        }
    }

    #[tokio::test]
    async fn repeat_last_replays_forever() {
        let client = ScriptedClient::always_text("same", Usage::default());
        let (spec, msgs) = req();
        for _ in 0..3 {
            let r = client
                .generate_text(&spec, &msgs, GenerateOptions::default())
                .await
                .unwrap();
            assert!(matches!(r.classify(), Classification::FinalAnswer { text } if text == "same"));
        }
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn exhausted_queue_returns_canned_text() {
        let client = ScriptedClient::new(vec![]);
        let (spec, msgs) = req();
        let r = client
            .generate_text(&spec, &msgs, GenerateOptions::default())
            .await
            .unwrap();
        assert!(
            matches!(r.classify(), Classification::FinalAnswer { text } if text.contains("no more scripts"))
        );
    }

    #[tokio::test]
    async fn always_fail_errors_every_call() {
        let client = ScriptedClient::always_fail("connection reset");
        let (spec, msgs) = req();
        let err = client
            .generate_text(&spec, &msgs, GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn last_request_captures_messages() {
        let client = ScriptedClient::always_text("ok", Usage::default());
        let (spec, msgs) = req();
        client
            .generate_text(&spec, &msgs, GenerateOptions::default())
            .await
            .unwrap();
        let captured = client.last_request.lock().unwrap().take().unwrap();
        assert_eq!(captured.1.len(), 1);
        assert_eq!(captured.1[0].content_str(), "hi");
    }
}
