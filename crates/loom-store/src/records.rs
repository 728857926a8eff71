// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use loom_model::{Message, SessionStatus};

/// A stored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    /// Model spec, `provider:model_id`.
    pub model: String,
    pub project_path: String,
    pub title: String,
    pub status: SessionStatus,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Exact-decimal cumulative cost in USD.
    pub cost_usd: Decimal,
    pub auto_approve: bool,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attributes for creating a session.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub id: String,
    pub model: String,
    pub project_path: String,
    pub title: String,
    pub auto_approve: bool,
}

/// Partial session update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub title: Option<String>,
    pub status: Option<SessionStatus>,
    pub model: Option<String>,
    pub auto_approve: Option<bool>,
}

/// Filter for `list_sessions`.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub project_path: Option<String>,
    pub include_archived: bool,
}

/// A persisted message with its store-assigned sequence and timestamp.
/// Sequence order is conversational order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub seq: i64,
    pub session_id: String,
    pub message: Message,
    pub created_at: DateTime<Utc>,
}

/// Kind of a decision-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Goal,
    Decision,
    Option,
    Action,
    Outcome,
    Observation,
    Revisit,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Goal => "goal",
            NodeKind::Decision => "decision",
            NodeKind::Option => "option",
            NodeKind::Action => "action",
            NodeKind::Outcome => "outcome",
            NodeKind::Observation => "observation",
            NodeKind::Revisit => "revisit",
        }
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "goal" => Ok(NodeKind::Goal),
            "decision" => Ok(NodeKind::Decision),
            "option" => Ok(NodeKind::Option),
            "action" => Ok(NodeKind::Action),
            "outcome" => Ok(NodeKind::Outcome),
            "observation" => Ok(NodeKind::Observation),
            "revisit" => Ok(NodeKind::Revisit),
            other => Err(format!("unknown node kind: {other}")),
        }
    }
}

/// Lifecycle status of a decision-graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Superseded,
    Resolved,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Active => "active",
            NodeStatus::Superseded => "superseded",
            NodeStatus::Resolved => "resolved",
        }
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(NodeStatus::Active),
            "superseded" => Ok(NodeStatus::Superseded),
            "resolved" => Ok(NodeStatus::Resolved),
            other => Err(format!("unknown node status: {other}")),
        }
    }
}

/// A stored decision-graph node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionNodeRecord {
    pub id: String,
    /// Store-assigned monotonic sequence; insertion order across the graph.
    pub seq: i64,
    pub kind: NodeKind,
    pub title: String,
    pub description: Option<String>,
    /// 0–100 when set.
    pub confidence: Option<u8>,
    pub status: NodeStatus,
    pub session_id: Option<String>,
    pub agent: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Groups nodes produced by the same logical action.
    pub change_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial node update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub confidence: Option<Option<u8>>,
    pub status: Option<NodeStatus>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Filter for `list_nodes`.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub kind: Option<NodeKind>,
    pub status: Option<NodeStatus>,
    pub session_id: Option<String>,
}

/// Kind of a directed decision-graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    LeadsTo,
    Chosen,
    Rejected,
    Requires,
    Blocks,
    Enables,
    Supersedes,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::LeadsTo => "leads_to",
            EdgeKind::Chosen => "chosen",
            EdgeKind::Rejected => "rejected",
            EdgeKind::Requires => "requires",
            EdgeKind::Blocks => "blocks",
            EdgeKind::Enables => "enables",
            EdgeKind::Supersedes => "supersedes",
        }
    }
}

impl std::str::FromStr for EdgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leads_to" => Ok(EdgeKind::LeadsTo),
            "chosen" => Ok(EdgeKind::Chosen),
            "rejected" => Ok(EdgeKind::Rejected),
            "requires" => Ok(EdgeKind::Requires),
            "blocks" => Ok(EdgeKind::Blocks),
            "enables" => Ok(EdgeKind::Enables),
            "supersedes" => Ok(EdgeKind::Supersedes),
            other => Err(format!("unknown edge kind: {other}")),
        }
    }
}

/// A stored directed edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEdgeRecord {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    pub kind: EdgeKind,
    /// Optional weight in (0, 1].
    pub weight: Option<f64>,
    pub rationale: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filter for `list_edges`.
#[derive(Debug, Clone, Default)]
pub struct EdgeFilter {
    pub kind: Option<EdgeKind>,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// A session-scoped permission grant.  Created on approval, never mutated,
/// cleared when the session ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRecord {
    pub session_id: String,
    pub tool: String,
    /// Literal path or the wildcard `*`.
    pub scope: String,
    pub created_at: DateTime<Utc>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_kind_round_trips_through_str() {
        for kind in [
            NodeKind::Goal,
            NodeKind::Decision,
            NodeKind::Option,
            NodeKind::Action,
            NodeKind::Outcome,
            NodeKind::Observation,
            NodeKind::Revisit,
        ] {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
        }
    }

    #[test]
    fn edge_kind_round_trips_through_str() {
        for kind in [
            EdgeKind::LeadsTo,
            EdgeKind::Chosen,
            EdgeKind::Rejected,
            EdgeKind::Requires,
            EdgeKind::Blocks,
            EdgeKind::Enables,
            EdgeKind::Supersedes,
        ] {
            assert_eq!(kind.as_str().parse::<EdgeKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_strings_are_rejected() {
        assert!("wish".parse::<NodeKind>().is_err());
        assert!("loops_to".parse::<EdgeKind>().is_err());
        assert!("dormant".parse::<NodeStatus>().is_err());
    }
}
