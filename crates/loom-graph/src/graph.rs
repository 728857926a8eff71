// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use loom_store::{
    DecisionEdgeRecord, DecisionNodeRecord, EdgeFilter, EdgeKind, NodeFilter, NodeKind,
    NodeStatus, NodeUpdate, Store, StoreError,
};

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for GraphError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => GraphError::NotFound,
            StoreError::Validation(msg) => GraphError::Validation(msg),
            other => GraphError::Store(other),
        }
    }
}

/// Attributes for a new node.  `change_id` groups nodes produced by one
/// logical action; omit it to start a new group.
#[derive(Debug, Clone, Default)]
pub struct NewNode {
    pub kind: Option<NodeKind>,
    pub title: String,
    pub description: Option<String>,
    pub confidence: Option<u32>,
    pub session_id: Option<String>,
    pub agent: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub change_id: Option<String>,
}

impl NewNode {
    pub fn new(kind: NodeKind, title: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn confidence(mut self, confidence: u32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Options for a new edge.
#[derive(Debug, Clone, Default)]
pub struct EdgeOpts {
    /// Weight in (0, 1] when set.
    pub weight: Option<f64>,
    pub rationale: Option<String>,
}

/// Typed-node/typed-edge reasoning store shared across sessions.
///
/// Validation lives here; durability lives in the [`Store`].  Cycles are
/// permitted in the edge set — every traversal tracks visited ids.
#[derive(Clone)]
pub struct DecisionGraph {
    store: Arc<dyn Store>,
}

impl DecisionGraph {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Validate and insert a node.  Returns the stored record with its
    /// assigned id, sequence, and change id.
    pub fn add_node(&self, attrs: NewNode) -> Result<DecisionNodeRecord> {
        let kind = attrs
            .kind
            .ok_or_else(|| GraphError::Validation("node kind is required".into()))?;
        if attrs.title.trim().is_empty() {
            return Err(GraphError::Validation("node title is required".into()));
        }
        let confidence = match attrs.confidence {
            Some(c) if c > 100 => {
                return Err(GraphError::Validation(format!(
                    "confidence must be within 0..=100, got {c}"
                )))
            }
            Some(c) => Some(c as u8),
            None => None,
        };

        let now = Utc::now();
        let node = DecisionNodeRecord {
            id: Uuid::new_v4().to_string(),
            seq: 0,
            kind,
            title: attrs.title,
            description: attrs.description,
            confidence,
            status: NodeStatus::Active,
            session_id: attrs.session_id,
            agent: attrs.agent,
            metadata: attrs.metadata,
            change_id: attrs
                .change_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            created_at: now,
            updated_at: now,
        };
        let stored = self.store.insert_node(&node)?;
        debug!(id = %stored.id, kind = %kind.as_str(), "logged decision node");
        Ok(stored)
    }

    pub fn get_node(&self, id: &str) -> Result<DecisionNodeRecord> {
        Ok(self.store.get_node(id)?)
    }

    pub fn list_nodes(&self, filter: &NodeFilter) -> Result<Vec<DecisionNodeRecord>> {
        Ok(self.store.list_nodes(filter)?)
    }

    pub fn update_node(&self, id: &str, update: NodeUpdate) -> Result<DecisionNodeRecord> {
        if let Some(Some(c)) = update.confidence {
            if c as u32 > 100 {
                return Err(GraphError::Validation(format!(
                    "confidence must be within 0..=100, got {c}"
                )));
            }
        }
        if let Some(title) = &update.title {
            if title.trim().is_empty() {
                return Err(GraphError::Validation("node title is required".into()));
            }
        }
        Ok(self.store.update_node(id, &update)?)
    }

    pub fn delete_node(&self, id: &str) -> Result<()> {
        Ok(self.store.delete_node(id)?)
    }

    /// Insert a directed edge.  Endpoints must exist; a weight outside
    /// (0, 1] is rejected.
    pub fn add_edge(
        &self,
        from: &str,
        to: &str,
        kind: EdgeKind,
        opts: EdgeOpts,
    ) -> Result<DecisionEdgeRecord> {
        if let Some(w) = opts.weight {
            if !(w > 0.0 && w <= 1.0) {
                return Err(GraphError::Validation(format!(
                    "edge weight must be within (0, 1], got {w}"
                )));
            }
        }
        let edge = DecisionEdgeRecord {
            id: Uuid::new_v4().to_string(),
            from_id: from.to_string(),
            to_id: to.to_string(),
            kind,
            weight: opts.weight,
            rationale: opts.rationale,
            created_at: Utc::now(),
        };
        self.store.insert_edge(&edge)?;
        Ok(edge)
    }

    pub fn list_edges(&self, filter: &EdgeFilter) -> Result<Vec<DecisionEdgeRecord>> {
        Ok(self.store.list_edges(filter)?)
    }

    /// Nodes with kind `goal` and status `active`.
    pub fn active_goals(&self) -> Result<Vec<DecisionNodeRecord>> {
        self.list_nodes(&NodeFilter {
            kind: Some(NodeKind::Goal),
            status: Some(NodeStatus::Active),
            session_id: None,
        })
    }

    /// The most recent `decision` and `option` nodes, newest first.
    pub fn recent_decisions(&self, limit: usize) -> Result<Vec<DecisionNodeRecord>> {
        let mut nodes = self.list_nodes(&NodeFilter {
            kind: Some(NodeKind::Decision),
            ..NodeFilter::default()
        })?;
        nodes.extend(self.list_nodes(&NodeFilter {
            kind: Some(NodeKind::Option),
            ..NodeFilter::default()
        })?);
        nodes.sort_by_key(|n| std::cmp::Reverse(n.seq));
        nodes.truncate(limit);
        Ok(nodes)
    }

    /// Mark `old_id` superseded by `new_id`.  The `supersedes` edge and the
    /// status change commit atomically; re-applying produces at most one
    /// edge.
    pub fn supersede(&self, old_id: &str, new_id: &str, rationale: &str) -> Result<()> {
        let edge = DecisionEdgeRecord {
            id: Uuid::new_v4().to_string(),
            from_id: new_id.to_string(),
            to_id: old_id.to_string(),
            kind: EdgeKind::Supersedes,
            weight: None,
            rationale: Some(rationale.to_string()),
            created_at: Utc::now(),
        };
        Ok(self.store.supersede(old_id, new_id, &edge)?)
    }

    /// All nodes logged against a session, ascending by insertion.
    pub fn for_session(&self, session_id: &str) -> Result<Vec<DecisionNodeRecord>> {
        self.list_nodes(&NodeFilter {
            session_id: Some(session_id.to_string()),
            ..NodeFilter::default()
        })
    }

    /// Transitive closure from a goal via outgoing edges of any kind.
    ///
    /// The edge set may contain cycles; traversal tracks visited ids and
    /// terminates on re-visit.  The goal itself is the first element.
    pub fn for_goal(&self, goal_id: &str) -> Result<Vec<DecisionNodeRecord>> {
        let root = self.get_node(goal_id)?;
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut out = Vec::new();

        visited.insert(root.id.clone());
        queue.push_back(root.id.clone());
        out.push(root);

        while let Some(current) = queue.pop_front() {
            let edges = self.list_edges(&EdgeFilter {
                from: Some(current),
                ..EdgeFilter::default()
            })?;
            for edge in edges {
                if visited.insert(edge.to_id.clone()) {
                    // A dangling endpoint (node deleted after edge creation)
                    // is skipped rather than failing the walk.
                    if let Ok(node) = self.get_node(&edge.to_id) {
                        queue.push_back(node.id.clone());
                        out.push(node);
                    }
                }
            }
        }
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use loom_store::MemoryStore;

    fn graph() -> DecisionGraph {
        DecisionGraph::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn add_node_assigns_id_and_change_id() {
        let g = graph();
        let node = g.add_node(NewNode::new(NodeKind::Goal, "Ship it")).unwrap();
        assert!(!node.id.is_empty());
        assert!(!node.change_id.is_empty());
        assert_eq!(node.status, NodeStatus::Active);
    }

    #[test]
    fn add_node_get_node_round_trip() {
        let g = graph();
        let created = g
            .add_node(
                NewNode::new(NodeKind::Decision, "Use SQLite")
                    .confidence(85)
                    .session("s1"),
            )
            .unwrap();
        let fetched = g.get_node(&created.id).unwrap();
        assert_eq!(fetched.title, created.title);
        assert_eq!(fetched.kind, created.kind);
        assert_eq!(fetched.confidence, created.confidence);
        assert_eq!(fetched.session_id, created.session_id);
        assert_eq!(fetched.change_id, created.change_id);
    }

    #[test]
    fn confidence_101_is_rejected() {
        let g = graph();
        let result = g.add_node(NewNode::new(NodeKind::Goal, "x").confidence(101));
        assert!(matches!(result, Err(GraphError::Validation(_))));
    }

    #[test]
    fn empty_title_is_rejected() {
        let g = graph();
        let result = g.add_node(NewNode::new(NodeKind::Goal, "   "));
        assert!(matches!(result, Err(GraphError::Validation(_))));
    }

    #[test]
    fn missing_kind_is_rejected() {
        let g = graph();
        let result = g.add_node(NewNode {
            title: "untyped".into(),
            ..NewNode::default()
        });
        assert!(matches!(result, Err(GraphError::Validation(_))));
    }

    #[test]
    fn edge_weight_out_of_range_is_rejected() {
        let g = graph();
        let a = g.add_node(NewNode::new(NodeKind::Goal, "a")).unwrap();
        let b = g.add_node(NewNode::new(NodeKind::Decision, "b")).unwrap();
        for bad in [0.0, -0.5, 1.5] {
            let result = g.add_edge(
                &a.id,
                &b.id,
                EdgeKind::LeadsTo,
                EdgeOpts {
                    weight: Some(bad),
                    rationale: None,
                },
            );
            assert!(matches!(result, Err(GraphError::Validation(_))), "weight {bad}");
        }
        assert!(g
            .add_edge(
                &a.id,
                &b.id,
                EdgeKind::LeadsTo,
                EdgeOpts {
                    weight: Some(1.0),
                    rationale: None,
                },
            )
            .is_ok());
    }

    #[test]
    fn active_goals_excludes_superseded() {
        let g = graph();
        let old = g.add_node(NewNode::new(NodeKind::Goal, "Old")).unwrap();
        let new = g.add_node(NewNode::new(NodeKind::Goal, "New")).unwrap();
        g.supersede(&old.id, &new.id, "better").unwrap();

        let goals = g.active_goals().unwrap();
        assert_eq!(goals.len(), 1);
        assert_eq!(goals[0].id, new.id);
        for goal in &goals {
            assert_eq!(goal.kind, NodeKind::Goal);
            assert_eq!(goal.status, NodeStatus::Active);
        }
    }

    #[test]
    fn supersede_creates_exactly_one_edge() {
        let g = graph();
        let old = g.add_node(NewNode::new(NodeKind::Goal, "Old")).unwrap();
        let new = g.add_node(NewNode::new(NodeKind::Goal, "New")).unwrap();
        g.supersede(&old.id, &new.id, "better").unwrap();
        g.supersede(&old.id, &new.id, "again").unwrap();

        let edges = g
            .list_edges(&EdgeFilter {
                kind: Some(EdgeKind::Supersedes),
                from: Some(new.id.clone()),
                to: Some(old.id.clone()),
            })
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(g.get_node(&old.id).unwrap().status, NodeStatus::Superseded);
    }

    #[test]
    fn recent_decisions_newest_first_with_limit() {
        let g = graph();
        g.add_node(NewNode::new(NodeKind::Goal, "goal")).unwrap();
        let d1 = g.add_node(NewNode::new(NodeKind::Decision, "d1")).unwrap();
        let o1 = g.add_node(NewNode::new(NodeKind::Option, "o1")).unwrap();
        let d2 = g.add_node(NewNode::new(NodeKind::Decision, "d2")).unwrap();

        let recent = g.recent_decisions(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, d2.id);
        assert_eq!(recent[1].id, o1.id);

        let all = g.recent_decisions(10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].id, d1.id);
    }

    #[test]
    fn for_session_ascending_by_insertion() {
        let g = graph();
        let a = g
            .add_node(NewNode::new(NodeKind::Action, "first").session("s1"))
            .unwrap();
        g.add_node(NewNode::new(NodeKind::Action, "other").session("s2"))
            .unwrap();
        let b = g
            .add_node(NewNode::new(NodeKind::Outcome, "second").session("s1"))
            .unwrap();

        let nodes = g.for_session("s1").unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, a.id);
        assert_eq!(nodes[1].id, b.id);
    }

    #[test]
    fn for_goal_walks_transitively() {
        let g = graph();
        let goal = g.add_node(NewNode::new(NodeKind::Goal, "goal")).unwrap();
        let decision = g.add_node(NewNode::new(NodeKind::Decision, "d")).unwrap();
        let action = g.add_node(NewNode::new(NodeKind::Action, "a")).unwrap();
        let unrelated = g.add_node(NewNode::new(NodeKind::Action, "x")).unwrap();

        g.add_edge(&goal.id, &decision.id, EdgeKind::LeadsTo, EdgeOpts::default())
            .unwrap();
        g.add_edge(&decision.id, &action.id, EdgeKind::Chosen, EdgeOpts::default())
            .unwrap();

        let reachable = g.for_goal(&goal.id).unwrap();
        let ids: Vec<&str> = reachable.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids[0], goal.id);
        assert!(ids.contains(&decision.id.as_str()));
        assert!(ids.contains(&action.id.as_str()));
        assert!(!ids.contains(&unrelated.id.as_str()));
    }

    #[test]
    fn for_goal_terminates_on_cycles() {
        let g = graph();
        let a = g.add_node(NewNode::new(NodeKind::Goal, "a")).unwrap();
        let b = g.add_node(NewNode::new(NodeKind::Decision, "b")).unwrap();
        g.add_edge(&a.id, &b.id, EdgeKind::LeadsTo, EdgeOpts::default())
            .unwrap();
        g.add_edge(&b.id, &a.id, EdgeKind::Requires, EdgeOpts::default())
            .unwrap();

        let reachable = g.for_goal(&a.id).unwrap();
        assert_eq!(reachable.len(), 2);
    }

    #[test]
    fn for_goal_on_missing_node_is_not_found() {
        let g = graph();
        assert!(matches!(g.for_goal("nope"), Err(GraphError::NotFound)));
    }

    #[test]
    fn update_node_validates_confidence() {
        let g = graph();
        let n = g.add_node(NewNode::new(NodeKind::Goal, "g")).unwrap();
        let result = g.update_node(
            &n.id,
            NodeUpdate {
                confidence: Some(Some(200)),
                ..NodeUpdate::default()
            },
        );
        assert!(matches!(result, Err(GraphError::Validation(_))));
    }
}
