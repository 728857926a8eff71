// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;

use loom_model::ModelSpec;

const IDENTITY: &str = "You are Loom, an AI coding assistant. You work on the user's project by \
reasoning step by step and calling tools when you need to read, search, or modify files. Prefer \
small verifiable changes and report what you did.";

const GUIDELINES: &str = "Guidelines:\n\
- Use tools to inspect the project before answering questions about it.\n\
- Never fabricate file contents or command output.\n\
- When a task is complete, reply with a concise final answer instead of more tool calls.\n\
- Record significant decisions and their rationale as you work.";

/// Compose the base system prompt for a session turn: identity, project
/// location, active model, and working guidelines.  Contextual fragments
/// (repo map, decision context) are appended by the window builder, not here.
pub fn compose_system_prompt(project_path: &Path, model: &ModelSpec) -> String {
    format!(
        "{IDENTITY}\n\nProject path: {}\nModel: {model}\n\n{GUIDELINES}",
        project_path.display()
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
