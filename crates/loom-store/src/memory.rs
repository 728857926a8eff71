// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use rust_decimal::Decimal;

use loom_model::{Message, SessionStatus};

use crate::records::*;
use crate::store::Store;
use crate::{Result, StoreError};

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionRecord>,
    messages: HashMap<String, Vec<MessageRecord>>,
    next_message_seq: i64,
    nodes: HashMap<String, DecisionNodeRecord>,
    next_node_seq: i64,
    edges: Vec<DecisionEdgeRecord>,
    grants: Vec<GrantRecord>,
}

/// In-memory `Store` for tests and ephemeral runs.  Mirrors the SQLite
/// implementation's semantics exactly, including atomic supersession and
/// insertion-ordered sequences.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn create_session(&self, attrs: &NewSession) -> Result<SessionRecord> {
        let mut inner = self.inner.lock().unwrap();
        if inner.sessions.contains_key(&attrs.id) {
            return Err(StoreError::Validation(format!(
                "session already exists: {}",
                attrs.id
            )));
        }
        let now = Utc::now();
        let record = SessionRecord {
            id: attrs.id.clone(),
            model: attrs.model.clone(),
            project_path: attrs.project_path.clone(),
            title: attrs.title.clone(),
            status: SessionStatus::Idle,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: Decimal::ZERO,
            auto_approve: attrs.auto_approve,
            archived: false,
            created_at: now,
            updated_at: now,
        };
        inner.sessions.insert(attrs.id.clone(), record.clone());
        Ok(record)
    }

    fn get_session(&self, id: &str) -> Result<SessionRecord> {
        let inner = self.inner.lock().unwrap();
        inner.sessions.get(id).cloned().ok_or(StoreError::NotFound)
    }

    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut sessions: Vec<SessionRecord> = inner
            .sessions
            .values()
            .filter(|s| filter.include_archived || !s.archived)
            .filter(|s| {
                filter
                    .project_path
                    .as_ref()
                    .map(|p| &s.project_path == p)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    fn update_session(&self, id: &str, update: &SessionUpdate) -> Result<SessionRecord> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner.sessions.get_mut(id).ok_or(StoreError::NotFound)?;
        if let Some(title) = &update.title {
            session.title = title.clone();
        }
        if let Some(status) = update.status {
            session.status = status;
        }
        if let Some(model) = &update.model {
            session.model = model.clone();
        }
        if let Some(auto_approve) = update.auto_approve {
            session.auto_approve = auto_approve;
        }
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    fn archive_session(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner.sessions.get_mut(id).ok_or(StoreError::NotFound)?;
        session.archived = true;
        session.updated_at = Utc::now();
        Ok(())
    }

    fn update_costs(
        &self,
        id: &str,
        input_delta: u64,
        output_delta: u64,
        cost_delta: Decimal,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner.sessions.get_mut(id).ok_or(StoreError::NotFound)?;
        session.input_tokens += input_delta;
        session.output_tokens += output_delta;
        session.cost_usd += cost_delta;
        session.updated_at = Utc::now();
        Ok(())
    }

    fn save_message(&self, session_id: &str, message: &Message) -> Result<MessageRecord> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.sessions.contains_key(session_id) {
            return Err(StoreError::NotFound);
        }
        inner.next_message_seq += 1;
        let record = MessageRecord {
            seq: inner.next_message_seq,
            session_id: session_id.to_string(),
            message: message.clone(),
            created_at: Utc::now(),
        };
        inner
            .messages
            .entry(session_id.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    fn load_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.messages.get(session_id).cloned().unwrap_or_default())
    }

    fn insert_node(&self, node: &DecisionNodeRecord) -> Result<DecisionNodeRecord> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_node_seq += 1;
        let mut stored = node.clone();
        stored.seq = inner.next_node_seq;
        inner.nodes.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    fn get_node(&self, id: &str) -> Result<DecisionNodeRecord> {
        let inner = self.inner.lock().unwrap();
        inner.nodes.get(id).cloned().ok_or(StoreError::NotFound)
    }

    fn list_nodes(&self, filter: &NodeFilter) -> Result<Vec<DecisionNodeRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut nodes: Vec<DecisionNodeRecord> = inner
            .nodes
            .values()
            .filter(|n| filter.kind.map(|k| n.kind == k).unwrap_or(true))
            .filter(|n| filter.status.map(|s| n.status == s).unwrap_or(true))
            .filter(|n| {
                filter
                    .session_id
                    .as_ref()
                    .map(|id| n.session_id.as_ref() == Some(id))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.seq);
        Ok(nodes)
    }

    fn update_node(&self, id: &str, update: &NodeUpdate) -> Result<DecisionNodeRecord> {
        let mut inner = self.inner.lock().unwrap();
        let node = inner.nodes.get_mut(id).ok_or(StoreError::NotFound)?;
        if let Some(title) = &update.title {
            node.title = title.clone();
        }
        if let Some(description) = &update.description {
            node.description = description.clone();
        }
        if let Some(confidence) = update.confidence {
            node.confidence = confidence;
        }
        if let Some(status) = update.status {
            node.status = status;
        }
        if let Some(metadata) = &update.metadata {
            node.metadata = metadata.clone();
        }
        node.updated_at = Utc::now();
        Ok(node.clone())
    }

    fn delete_node(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.nodes.remove(id).ok_or(StoreError::NotFound)?;
        inner.edges.retain(|e| e.from_id != id && e.to_id != id);
        Ok(())
    }

    fn insert_edge(&self, edge: &DecisionEdgeRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for endpoint in [&edge.from_id, &edge.to_id] {
            if !inner.nodes.contains_key(endpoint) {
                return Err(StoreError::Validation(format!(
                    "edge endpoint does not exist: {endpoint}"
                )));
            }
        }
        inner.edges.push(edge.clone());
        Ok(())
    }

    fn list_edges(&self, filter: &EdgeFilter) -> Result<Vec<DecisionEdgeRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .edges
            .iter()
            .filter(|e| filter.kind.map(|k| e.kind == k).unwrap_or(true))
            .filter(|e| filter.from.as_ref().map(|f| &e.from_id == f).unwrap_or(true))
            .filter(|e| filter.to.as_ref().map(|t| &e.to_id == t).unwrap_or(true))
            .cloned()
            .collect())
    }

    fn supersede(&self, old_id: &str, new_id: &str, edge: &DecisionEdgeRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.nodes.contains_key(old_id) || !inner.nodes.contains_key(new_id) {
            return Err(StoreError::NotFound);
        }
        let already_linked = inner.edges.iter().any(|e| {
            e.kind == EdgeKind::Supersedes && e.from_id == new_id && e.to_id == old_id
        });
        if !already_linked {
            let mut stored = edge.clone();
            stored.from_id = new_id.to_string();
            stored.to_id = old_id.to_string();
            stored.kind = EdgeKind::Supersedes;
            inner.edges.push(stored);
        }
        let old = inner.nodes.get_mut(old_id).ok_or(StoreError::NotFound)?;
        old.status = NodeStatus::Superseded;
        old.updated_at = Utc::now();
        Ok(())
    }

    fn record_grant(&self, grant: &GrantRecord) -> Result<()> {
        self.inner.lock().unwrap().grants.push(grant.clone());
        Ok(())
    }

    fn grants_for_session(&self, session_id: &str) -> Result<Vec<GrantRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .grants
            .iter()
            .filter(|g| g.session_id == session_id)
            .cloned()
            .collect())
    }

    fn clear_grants(&self, session_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.grants.retain(|g| g.session_id != session_id);
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
