// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be on unless explicitly disabled
/// need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub decisions: DecisionsConfig,
}

impl Config {
    /// Resolve the SQLite database path for a project.
    ///
    /// `LOOM_DB_PATH` wins when set; otherwise the store lives under the
    /// project's `.loom/` directory.
    pub fn db_path(&self, project_path: &Path) -> PathBuf {
        match std::env::var("LOOM_DB_PATH") {
            Ok(p) if !p.is_empty() => PathBuf::from(p),
            _ => project_path.join(".loom").join("loom.db"),
        }
    }
}

fn default_model() -> String {
    "anthropic:claude-sonnet-4-6".into()
}
fn default_weak_model() -> String {
    "anthropic:claude-haiku-4-5".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model spec (`provider:model_id`) used by the main session loop.
    #[serde(default = "default_model")]
    pub default: String,
    /// Cheaper model for sub-agent and utility calls.
    #[serde(default = "default_weak_model")]
    pub weak: String,
    /// Planning model for the architect pipeline.  Falls back to `default`.
    #[serde(default)]
    pub architect: Option<String>,
    /// Execution model for the architect pipeline.  Falls back to `weak`.
    #[serde(default)]
    pub editor: Option<String>,
}

impl ModelConfig {
    pub fn architect(&self) -> &str {
        self.architect.as_deref().unwrap_or(&self.default)
    }

    pub fn editor(&self) -> &str {
        self.editor.as_deref().unwrap_or(&self.weak)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            weak: default_weak_model(),
            architect: None,
            editor: None,
        }
    }
}

fn default_auto_approve() -> Vec<String> {
    ["file_read", "file_search", "content_search", "directory_list"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// Tool names that never require asking.
    #[serde(default = "default_auto_approve")]
    pub auto_approve: Vec<String>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            auto_approve: default_auto_approve(),
        }
    }
}

fn default_repo_map_tokens() -> usize {
    2048
}
fn default_decision_context_tokens() -> usize {
    1024
}
fn default_reserved_output_tokens() -> usize {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token ceiling for the injected repo-map fragment.
    #[serde(default = "default_repo_map_tokens")]
    pub max_repo_map_tokens: usize,
    /// Token ceiling for the injected decision-context fragment.
    #[serde(default = "default_decision_context_tokens")]
    pub max_decision_context_tokens: usize,
    /// Tokens reserved for the model's reply when sizing the window.
    #[serde(default = "default_reserved_output_tokens")]
    pub reserved_output_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_repo_map_tokens: default_repo_map_tokens(),
            max_decision_context_tokens: default_decision_context_tokens(),
            reserved_output_tokens: default_reserved_output_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionsConfig {
    /// Master switch for decision-graph features.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Require an active decision node before file edits (enforced by the
    /// file-watcher collaborator, not the core).
    #[serde(default)]
    pub enforce_pre_edit: bool,
    /// Log an observation node per VCS commit (captured by the VCS
    /// collaborator, not the core).
    #[serde(default)]
    pub auto_log_commits: bool,
}

impl Default for DecisionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enforce_pre_edit: false,
            auto_log_commits: false,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_sonnet() {
        let cfg = Config::default();
        assert_eq!(cfg.model.default, "anthropic:claude-sonnet-4-6");
        assert_eq!(cfg.model.weak, "anthropic:claude-haiku-4-5");
    }

    #[test]
    fn architect_and_editor_fall_back() {
        let cfg = ModelConfig::default();
        assert_eq!(cfg.architect(), cfg.default);
        assert_eq!(cfg.editor(), cfg.weak);
    }

    #[test]
    fn architect_override_wins() {
        let cfg = ModelConfig {
            architect: Some("openai:gpt-5".into()),
            ..ModelConfig::default()
        };
        assert_eq!(cfg.architect(), "openai:gpt-5");
    }

    #[test]
    fn default_auto_approve_contains_read_tools() {
        let cfg = PermissionsConfig::default();
        assert!(cfg.auto_approve.iter().any(|t| t == "file_read"));
        assert!(cfg.auto_approve.iter().any(|t| t == "directory_list"));
        assert_eq!(cfg.auto_approve.len(), 4);
    }

    #[test]
    fn default_context_budgets() {
        let cfg = ContextConfig::default();
        assert_eq!(cfg.max_repo_map_tokens, 2048);
        assert_eq!(cfg.max_decision_context_tokens, 1024);
        assert_eq!(cfg.reserved_output_tokens, 4096);
    }

    #[test]
    fn decisions_enabled_by_default() {
        let cfg = DecisionsConfig::default();
        assert!(cfg.enabled);
        assert!(!cfg.enforce_pre_edit);
        assert!(!cfg.auto_log_commits);
    }
}
