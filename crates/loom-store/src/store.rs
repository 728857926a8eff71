// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use rust_decimal::Decimal;

use loom_model::Message;

use crate::records::{
    DecisionEdgeRecord, DecisionNodeRecord, EdgeFilter, GrantRecord, MessageRecord, NewSession,
    NodeFilter, NodeUpdate, SessionFilter, SessionRecord, SessionUpdate,
};
use crate::Result;

/// Durable storage consumed by the core.
///
/// All operations are synchronous from the engine's viewpoint; a write MUST
/// complete before the engine publishes the matching broadcast.  The backing
/// store is pluggable — [`SqliteStore`](crate::SqliteStore) is the reference
/// implementation, [`MemoryStore`](crate::MemoryStore) backs tests.
pub trait Store: Send + Sync {
    // ── Sessions ─────────────────────────────────────────────────────────────
    fn create_session(&self, attrs: &NewSession) -> Result<SessionRecord>;
    fn get_session(&self, id: &str) -> Result<SessionRecord>;
    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>>;
    fn update_session(&self, id: &str, update: &SessionUpdate) -> Result<SessionRecord>;
    /// Soft-delete: the session stops appearing in unfiltered listings but
    /// its log remains intact.
    fn archive_session(&self, id: &str) -> Result<()>;
    /// Additive counters; `cost_delta` accumulates in exact decimal.
    fn update_costs(
        &self,
        id: &str,
        input_delta: u64,
        output_delta: u64,
        cost_delta: Decimal,
    ) -> Result<()>;

    // ── Messages ─────────────────────────────────────────────────────────────
    /// Append a message; returns the stored record including the assigned
    /// sequence and timestamp.
    fn save_message(&self, session_id: &str, message: &Message) -> Result<MessageRecord>;
    /// All messages for a session, ascending by insertion order.
    fn load_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>>;

    // ── Decision graph ───────────────────────────────────────────────────────
    fn insert_node(&self, node: &DecisionNodeRecord) -> Result<DecisionNodeRecord>;
    fn get_node(&self, id: &str) -> Result<DecisionNodeRecord>;
    fn list_nodes(&self, filter: &NodeFilter) -> Result<Vec<DecisionNodeRecord>>;
    fn update_node(&self, id: &str, update: &NodeUpdate) -> Result<DecisionNodeRecord>;
    fn delete_node(&self, id: &str) -> Result<()>;
    /// Insert an edge; both endpoints must exist.
    fn insert_edge(&self, edge: &DecisionEdgeRecord) -> Result<()>;
    fn list_edges(&self, filter: &EdgeFilter) -> Result<Vec<DecisionEdgeRecord>>;
    /// Atomically insert `edge` (a `supersedes` edge from new to old) and set
    /// the old node's status to superseded.  Both effects succeed together or
    /// neither.  Re-applying produces at most one edge.
    fn supersede(&self, old_id: &str, new_id: &str, edge: &DecisionEdgeRecord) -> Result<()>;

    // ── Permission grants ────────────────────────────────────────────────────
    fn record_grant(&self, grant: &GrantRecord) -> Result<()>;
    fn grants_for_session(&self, session_id: &str) -> Result<Vec<GrantRecord>>;
    fn clear_grants(&self, session_id: &str) -> Result<()>;
}
