// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Name of the per-project configuration file.
const CONFIG_FILE: &str = ".loom.toml";

/// Load configuration for a project.
///
/// Reads `<project_path>/.loom.toml` when present and deep-merges it into the
/// built-in defaults; a missing file yields the defaults unchanged.  Unknown
/// sections and keys are ignored.  The `LOOM_MODEL` environment variable
/// overrides `model.default` after the merge.
pub fn load(project_path: &Path) -> anyhow::Result<Config> {
    let path = project_path.join(CONFIG_FILE);
    let mut config = if path.is_file() {
        debug!(path = %path.display(), "loading project config");
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        parse_merged(&text).with_context(|| format!("parsing {}", path.display()))?
    } else {
        Config::default()
    };

    if let Ok(model) = std::env::var("LOOM_MODEL") {
        if !model.is_empty() {
            config.model.default = model;
        }
    }
    Ok(config)
}

/// Parse a TOML document and deep-merge it into the defaults.
/// Exposed for tests and for callers that already hold the file contents.
pub fn load_str(text: &str) -> anyhow::Result<Config> {
    parse_merged(text)
}

fn parse_merged(text: &str) -> anyhow::Result<Config> {
    let layer: toml::Value = toml::from_str(text)?;
    let mut merged = toml::Value::try_from(Config::default())?;
    merge_toml(&mut merged, layer);
    // Unknown keys survive the merge; Config's serde derive skips them.
    Ok(merged.try_into()?)
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_toml(dst: &mut toml::Value, src: toml::Value) {
    match (dst, src) {
        (toml::Value::Table(d), toml::Value::Table(s)) => {
            for (k, v) in s {
                match d.get_mut(&k) {
                    Some(entry) => merge_toml(entry, v),
                    None => {
                        d.insert(k, v);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
