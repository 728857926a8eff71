// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// A `provider:model_id` pair.
///
/// The provider segment is optional in the textual form; a bare model id
/// defaults to the `anthropic` provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider: String,
    pub model_id: String,
}

impl ModelSpec {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
        }
    }

    /// Parse `"provider:model_id"`, splitting on the first `:`.
    pub fn parse(s: &str) -> Self {
        match s.split_once(':') {
            Some((provider, model_id)) if !provider.is_empty() => Self::new(provider, model_id),
            Some((_, model_id)) => Self::new("anthropic", model_id),
            None => Self::new("anthropic", s),
        }
    }
}

impl std::fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model_id)
    }
}

impl From<&str> for ModelSpec {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
