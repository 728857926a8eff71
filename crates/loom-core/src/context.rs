// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use loom_config::ContextConfig;
use loom_graph::{format_timeline, DecisionGraph};
use loom_model::{context_limit, estimate_tokens, Message, ModelSpec};

/// External collaborator that summarises the repository layout for prompt
/// injection.  The file-watcher/symbol-extractor side implements this; the
/// window builder only bounds and places the text.
pub trait RepoMapSource: Send + Sync {
    fn repo_map(&self, project_path: &Path) -> Option<String>;
}

/// Marker appended whenever an injected fragment had material chopped.
const TRUNCATION_MARKER: &str = "[truncated...]";

/// Builds the windowed transcript for one model call.
///
/// The output is the synthesised system message followed by the longest
/// suffix of the history whose estimated tokens fit the model budget.
/// Messages are included whole or not at all, and the system message is
/// never elided.
#[derive(Clone)]
pub struct ContextWindow {
    reserved_output: usize,
    max_repo_map_tokens: usize,
    max_decision_context_tokens: usize,
    repo_map: Option<Arc<dyn RepoMapSource>>,
    graph: Option<DecisionGraph>,
    model_limit_override: Option<usize>,
}

impl ContextWindow {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            reserved_output: config.reserved_output_tokens,
            max_repo_map_tokens: config.max_repo_map_tokens,
            max_decision_context_tokens: config.max_decision_context_tokens,
            repo_map: None,
            graph: None,
            model_limit_override: None,
        }
    }

    /// Attach a repository-map collaborator.
    pub fn with_repo_map(mut self, source: Arc<dyn RepoMapSource>) -> Self {
        self.repo_map = Some(source);
        self
    }

    /// Attach the decision graph for decision-context injection.
    pub fn with_graph(mut self, graph: DecisionGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Override the model-resolved context limit.  Tests use this to force
    /// tiny windows.
    pub fn with_model_limit(mut self, limit: usize) -> Self {
        self.model_limit_override = Some(limit);
        self
    }

    /// Build the window: system message first, then the longest suffix of
    /// `messages` that fits `model_limit − system_tokens − reserved_output`.
    pub fn build(
        &self,
        messages: &[Message],
        system_prompt: &str,
        model: &ModelSpec,
        session_id: Option<&str>,
        project_path: Option<&Path>,
    ) -> Vec<Message> {
        let model_limit = self
            .model_limit_override
            .unwrap_or_else(|| context_limit(model));

        let system_text =
            self.compose_system(system_prompt, model_limit, session_id, project_path);
        let system_message = Message::system(system_text);

        let available = model_limit
            .saturating_sub(system_message.estimated_tokens())
            .saturating_sub(self.reserved_output);

        // Newest to oldest; stop at the first message that would overflow so
        // the result is a contiguous suffix.
        let mut selected: Vec<Message> = Vec::new();
        let mut used = 0usize;
        for message in messages.iter().rev() {
            let cost = message.estimated_tokens();
            if used + cost > available {
                break;
            }
            used += cost;
            selected.push(message.clone());
        }
        selected.reverse();

        debug!(
            total = messages.len(),
            kept = selected.len(),
            used,
            available,
            "built context window"
        );

        let mut window = Vec::with_capacity(selected.len() + 1);
        window.push(system_message);
        window.extend(selected);
        window
    }

    /// Extend the composed system prompt with the bounded intelligence
    /// fragments.  Both fragments together may never push the system portion
    /// past `model_limit − reserved_output`.
    fn compose_system(
        &self,
        base: &str,
        model_limit: usize,
        session_id: Option<&str>,
        project_path: Option<&Path>,
    ) -> String {
        let (Some(session_id), Some(project_path)) = (session_id, project_path) else {
            return base.to_string();
        };

        let hard_cap = model_limit.saturating_sub(self.reserved_output);
        let mut text = base.to_string();
        let mut remaining = hard_cap.saturating_sub(estimate_tokens(Some(text.as_str())));

        if let Some(source) = &self.repo_map {
            if let Some(map) = source.repo_map(project_path) {
                let cap = self.max_repo_map_tokens.min(remaining);
                if cap > 0 {
                    let fragment = truncate_paragraphs(&map, cap);
                    if !fragment.is_empty() {
                        text.push_str("\n\n## Repository map\n");
                        text.push_str(&fragment);
                        remaining = hard_cap.saturating_sub(estimate_tokens(Some(text.as_str())));
                    }
                }
            }
        }

        if let Some(graph) = &self.graph {
            if let Some(context) = decision_context(graph, session_id) {
                let cap = self.max_decision_context_tokens.min(remaining);
                if cap > 0 {
                    let fragment = truncate_paragraphs(&context, cap);
                    if !fragment.is_empty() {
                        text.push_str("\n\n## Decision context\n");
                        text.push_str(&fragment);
                    }
                }
            }
        }

        text
    }
}

/// Render the decision-context block: active goals, recent decisions, and
/// this session's timeline.  `None` when the graph has nothing to say.
fn decision_context(graph: &DecisionGraph, session_id: &str) -> Option<String> {
    let goals = graph.active_goals().ok()?;
    let recent = graph.recent_decisions(5).ok()?;
    let session_nodes = graph.for_session(session_id).ok()?;

    if goals.is_empty() && recent.is_empty() && session_nodes.is_empty() {
        return None;
    }

    let mut sections = Vec::new();
    if !goals.is_empty() {
        sections.push(format!("Active goals:\n{}", format_timeline(&goals)));
    }
    if !recent.is_empty() {
        sections.push(format!("Recent decisions:\n{}", format_timeline(&recent)));
    }
    if !session_nodes.is_empty() {
        sections.push(format!(
            "This session:\n{}",
            format_timeline(&session_nodes)
        ));
    }
    Some(sections.join("\n\n"))
}

/// Chop `text` at whole paragraph boundaries so its estimate fits
/// `cap_tokens`, appending the truncation marker when material was cut.
fn truncate_paragraphs(text: &str, cap_tokens: usize) -> String {
    if estimate_tokens(Some(text)) <= cap_tokens {
        return text.to_string();
    }

    let mut kept = String::new();
    for paragraph in text.split("\n\n") {
        let candidate_len = if kept.is_empty() {
            paragraph.len()
        } else {
            kept.len() + 2 + paragraph.len()
        };
        // Reserve room for the marker we know we will append.
        if (candidate_len + TRUNCATION_MARKER.len() + 2) / 4 > cap_tokens {
            break;
        }
        if !kept.is_empty() {
            kept.push_str("\n\n");
        }
        kept.push_str(paragraph);
    }

    if kept.is_empty() {
        TRUNCATION_MARKER.to_string()
    } else {
        format!("{kept}\n\n{TRUNCATION_MARKER}")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use loom_config::ContextConfig;
    use loom_graph::{NewNode, NodeKind};
    use loom_store::MemoryStore;

    fn window() -> ContextWindow {
        ContextWindow::new(&ContextConfig::default())
    }

    fn spec() -> ModelSpec {
        ModelSpec::parse("anthropic:claude-sonnet-4-6")
    }

    #[test]
    fn empty_history_yields_single_system_message() {
        let out = window().build(&[], "", &spec(), None, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, loom_model::Role::System);
        assert_eq!(out[0].content_str(), "");
    }

    #[test]
    fn system_message_is_always_first() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let out = window().build(&history, "sys", &spec(), None, None);
        assert_eq!(out[0].role, loom_model::Role::System);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn truncation_keeps_contiguous_suffix() {
        // Limit 100, system "x"*40 → 10 tokens + 4 overhead, reserved 20.
        // available = 100 − 14 − 20 = 66.
        let cfg = ContextConfig {
            reserved_output_tokens: 20,
            ..ContextConfig::default()
        };
        let w = ContextWindow::new(&cfg).with_model_limit(100);
        let system = "x".repeat(40);
        // 40 messages of 20 chars → 5 content tokens + 4 overhead = 9 each.
        let history: Vec<Message> = (0..40)
            .map(|i| Message::user(format!("msg{i:02} {}", "y".repeat(14))))
            .collect();

        let out = w.build(&history, &system, &spec(), None, None);
        let kept = &out[1..];
        // 66 / 9 = 7 whole messages fit.
        assert_eq!(kept.len(), 7);
        // Budget invariant.
        let system_tokens = out[0].estimated_tokens();
        let kept_tokens: usize = kept.iter().map(|m| m.estimated_tokens()).sum();
        assert!(system_tokens + kept_tokens + 20 <= 100);
        // Contiguous suffix: exactly the last 7 of the input, in order.
        for (kept_msg, original) in kept.iter().zip(&history[33..]) {
            assert_eq!(kept_msg.content_str(), original.content_str());
        }
    }

    #[test]
    fn oversized_single_message_is_dropped_whole() {
        let cfg = ContextConfig {
            reserved_output_tokens: 10,
            ..ContextConfig::default()
        };
        let w = ContextWindow::new(&cfg).with_model_limit(50);
        let history = vec![Message::user("z".repeat(4000))];
        let out = w.build(&history, "", &spec(), None, None);
        // Partially-truncated messages are never emitted.
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn zero_available_still_emits_system() {
        let w = window().with_model_limit(10); // below reserved_output
        let history = vec![Message::user("hello there")];
        let out = w.build(&history, "a long system prompt", &spec(), None, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, loom_model::Role::System);
    }

    #[test]
    fn decision_context_is_injected_when_present() {
        let graph = DecisionGraph::new(Arc::new(MemoryStore::new()));
        graph
            .add_node(NewNode::new(NodeKind::Goal, "Ship the parser").session("s1"))
            .unwrap();
        let w = window().with_graph(graph);
        let out = w.build(&[], "base", &spec(), Some("s1"), Some(Path::new("/p")));
        let system = out[0].content_str();
        assert!(system.contains("Decision context"));
        assert!(system.contains("Ship the parser"));
    }

    #[test]
    fn no_injection_without_session_context() {
        let graph = DecisionGraph::new(Arc::new(MemoryStore::new()));
        graph
            .add_node(NewNode::new(NodeKind::Goal, "Ship it"))
            .unwrap();
        let w = window().with_graph(graph);
        let out = w.build(&[], "base", &spec(), None, None);
        assert_eq!(out[0].content_str(), "base");
    }

    #[test]
    fn repo_map_is_injected_and_bounded() {
        struct BigMap;
        impl RepoMapSource for BigMap {
            fn repo_map(&self, _p: &Path) -> Option<String> {
                // Many paragraphs, far beyond the cap.
                Some((0..100).map(|i| format!("para {i} {}", "w".repeat(200)))
                    .collect::<Vec<_>>()
                    .join("\n\n"))
            }
        }
        let cfg = ContextConfig {
            max_repo_map_tokens: 100,
            ..ContextConfig::default()
        };
        let w = ContextWindow::new(&cfg).with_repo_map(Arc::new(BigMap));
        let out = w.build(&[], "base", &spec(), Some("s1"), Some(Path::new("/p")));
        let system = out[0].content_str();
        assert!(system.contains("Repository map"));
        assert!(system.contains(TRUNCATION_MARKER));
    }

    // ── truncate_paragraphs ───────────────────────────────────────────────────

    #[test]
    fn truncate_noop_when_under_cap() {
        assert_eq!(truncate_paragraphs("short", 100), "short");
    }

    #[test]
    fn truncate_chops_at_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(100), "b".repeat(100));
        // Cap of 40 tokens fits the first paragraph (25) + marker but not both.
        let out = truncate_paragraphs(&text, 40);
        assert!(out.starts_with(&"a".repeat(100)));
        assert!(!out.contains('b'));
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn truncate_to_marker_only_when_nothing_fits() {
        let out = truncate_paragraphs(&"a".repeat(1000), 10);
        assert_eq!(out, TRUNCATION_MARKER);
    }
}
