// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use crate::ModelSpec;

/// Fallback context window for models not in the static table.
const DEFAULT_CONTEXT_LIMIT: usize = 128_000;

/// Known model context windows, keyed by `(provider, model_id prefix)`.
///
/// Prefix matching keeps dated snapshot ids (`claude-sonnet-4-6-20260115`)
/// resolving to the same entry as the base id.
const CONTEXT_LIMITS: &[(&str, &str, usize)] = &[
    ("anthropic", "claude-opus-4", 200_000),
    ("anthropic", "claude-sonnet-4", 200_000),
    ("anthropic", "claude-haiku-4", 200_000),
    ("anthropic", "claude-3-5", 200_000),
    ("openai", "gpt-5", 272_000),
    ("openai", "gpt-4o", 128_000),
    ("openai", "gpt-4.1", 1_000_000),
    ("google", "gemini-2", 1_000_000),
];

/// Resolve the context window for a model spec, falling back to 128k.
pub fn context_limit(spec: &ModelSpec) -> usize {
    CONTEXT_LIMITS
        .iter()
        .find(|(provider, prefix, _)| *provider == spec.provider && spec.model_id.starts_with(prefix))
        .map(|(_, _, limit)| *limit)
        .unwrap_or(DEFAULT_CONTEXT_LIMIT)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
