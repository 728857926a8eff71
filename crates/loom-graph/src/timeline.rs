// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use loom_store::{DecisionNodeRecord, NodeStatus};

/// Render nodes as a plain-text timeline, one line per node.
///
/// Each line leads with the kind name; the status is appended when the node
/// is no longer active, the confidence when one was recorded:
///
/// ```text
/// [goal] Ship the feature (80%)
/// [decision] Use SQLite (superseded)
/// ```
pub fn format_timeline(nodes: &[DecisionNodeRecord]) -> String {
    nodes
        .iter()
        .map(|node| {
            let mut line = format!("[{}] {}", node.kind.as_str(), node.title);
            if node.status != NodeStatus::Active {
                line.push_str(&format!(" ({})", node.status.as_str()));
            }
            if let Some(confidence) = node.confidence {
                line.push_str(&format!(" ({confidence}%)"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
