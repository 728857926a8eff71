// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::debug;

use loom_model::Message;

use crate::records::*;
use crate::store::Store;
use crate::{Result, StoreError};

// Schema version (increment when changing table definitions)
const SCHEMA_VERSION: i32 = 1;

/// Reference `Store` implementation on SQLite.
///
/// A single connection behind a mutex: SQLite serialises writers anyway, and
/// the engine's writes are short.  Transactions guard the two multi-statement
/// operations (`update_costs`, `supersede`).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(db_path)?;
        debug!(path = %db_path.display(), "opened session store");
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if current != 0 && current != SCHEMA_VERSION {
            return Err(StoreError::Validation(format!(
                "unsupported schema version {current} (expected {SCHEMA_VERSION})"
            )));
        }

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS sessions (
                id            TEXT PRIMARY KEY,
                model         TEXT NOT NULL,
                project_path  TEXT NOT NULL,
                title         TEXT NOT NULL,
                status        TEXT NOT NULL,
                input_tokens  INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cost_usd      TEXT NOT NULL DEFAULT '0',
                auto_approve  INTEGER NOT NULL DEFAULT 0,
                is_archived   INTEGER NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq          INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id   TEXT NOT NULL,
                role         TEXT NOT NULL,
                content      TEXT,
                tool_calls   TEXT,
                tool_call_id TEXT,
                created_at   TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE TABLE IF NOT EXISTS decision_nodes (
                id          TEXT PRIMARY KEY,
                seq         INTEGER NOT NULL,
                kind        TEXT NOT NULL,
                title       TEXT NOT NULL,
                description TEXT,
                confidence  INTEGER,
                status      TEXT NOT NULL,
                session_id  TEXT,
                agent       TEXT,
                metadata    TEXT NOT NULL DEFAULT '{}',
                change_id   TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS decision_edges (
                id         TEXT PRIMARY KEY,
                from_id    TEXT NOT NULL,
                to_id      TEXT NOT NULL,
                kind       TEXT NOT NULL,
                weight     REAL,
                rationale  TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (from_id) REFERENCES decision_nodes(id),
                FOREIGN KEY (to_id)   REFERENCES decision_nodes(id)
            );

            CREATE TABLE IF NOT EXISTS permission_grants (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                tool       TEXT NOT NULL,
                scope      TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
            CREATE INDEX IF NOT EXISTS idx_nodes_kind_status ON decision_nodes(kind, status);
            CREATE INDEX IF NOT EXISTS idx_nodes_session ON decision_nodes(session_id);
            CREATE INDEX IF NOT EXISTS idx_edges_from ON decision_edges(from_id);
            CREATE INDEX IF NOT EXISTS idx_edges_to ON decision_edges(to_id);
            CREATE INDEX IF NOT EXISTS idx_grants_session ON permission_grants(session_id);
            "#,
        )?;
        conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])?;
        Ok(())
    }
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_decimal(s: String) -> Result<Decimal> {
    Decimal::from_str(&s).map_err(|e| StoreError::Validation(format!("bad stored decimal: {e}")))
}

const SESSION_COLS: &str = "id, model, project_path, title, status, input_tokens, output_tokens, \
                            cost_usd, auto_approve, is_archived, created_at, updated_at";

#[allow(clippy::type_complexity)]
fn session_from_row(
    row: &Row<'_>,
) -> rusqlite::Result<(
    String, String, String, String, String, i64, i64, String, i64, i64, String, String,
)> {
    Ok((
        row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?,
        row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?,
    ))
}

#[allow(clippy::type_complexity)]
fn finish_session(
    raw: (String, String, String, String, String, i64, i64, String, i64, i64, String, String),
) -> Result<SessionRecord> {
    let (id, model, project_path, title, status, input_tokens, output_tokens, cost, auto_approve,
         archived, created_at, updated_at) = raw;
    Ok(SessionRecord {
        id,
        model,
        project_path,
        title,
        status: status.parse().map_err(StoreError::Validation)?,
        input_tokens: input_tokens as u64,
        output_tokens: output_tokens as u64,
        cost_usd: parse_decimal(cost)?,
        auto_approve: auto_approve != 0,
        archived: archived != 0,
        created_at: parse_ts(created_at),
        updated_at: parse_ts(updated_at),
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, Option<String>, Option<String>, Option<String>, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn finish_message(
    raw: (i64, String, String, Option<String>, Option<String>, Option<String>, String),
) -> Result<MessageRecord> {
    let (seq, session_id, role, content, tool_calls, tool_call_id, created_at) = raw;
    let role = role
        .parse()
        .map_err(|e: String| StoreError::Validation(e))?;
    let tool_calls = match tool_calls {
        Some(json) => serde_json::from_str(&json)?,
        None => Vec::new(),
    };
    Ok(MessageRecord {
        seq,
        session_id,
        message: Message {
            role,
            content,
            tool_calls,
            tool_call_id,
        },
        created_at: parse_ts(created_at),
    })
}

const NODE_COLS: &str = "id, seq, kind, title, description, confidence, status, session_id, \
                         agent, metadata, change_id, created_at, updated_at";

#[allow(clippy::type_complexity)]
fn node_from_row(
    row: &Row<'_>,
) -> rusqlite::Result<(
    String, i64, String, String, Option<String>, Option<i64>, String, Option<String>,
    Option<String>, String, String, String, String,
)> {
    Ok((
        row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?,
        row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?,
        row.get(12)?,
    ))
}

#[allow(clippy::type_complexity)]
fn finish_node(
    raw: (
        String, i64, String, String, Option<String>, Option<i64>, String, Option<String>,
        Option<String>, String, String, String, String,
    ),
) -> Result<DecisionNodeRecord> {
    let (id, seq, kind, title, description, confidence, status, session_id, agent, metadata,
         change_id, created_at, updated_at) = raw;
    Ok(DecisionNodeRecord {
        id,
        seq,
        kind: kind.parse().map_err(StoreError::Validation)?,
        title,
        description,
        confidence: confidence.map(|c| c as u8),
        status: status.parse().map_err(StoreError::Validation)?,
        session_id,
        agent,
        metadata: serde_json::from_str(&metadata)?,
        change_id,
        created_at: parse_ts(created_at),
        updated_at: parse_ts(updated_at),
    })
}

fn edge_from_row(
    row: &Row<'_>,
) -> rusqlite::Result<(String, String, String, String, Option<f64>, Option<String>, String)> {
    Ok((
        row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?,
        row.get(6)?,
    ))
}

fn finish_edge(
    raw: (String, String, String, String, Option<f64>, Option<String>, String),
) -> Result<DecisionEdgeRecord> {
    let (id, from_id, to_id, kind, weight, rationale, created_at) = raw;
    Ok(DecisionEdgeRecord {
        id,
        from_id,
        to_id,
        kind: kind.parse().map_err(StoreError::Validation)?,
        weight,
        rationale,
        created_at: parse_ts(created_at),
    })
}

impl Store for SqliteStore {
    fn create_session(&self, attrs: &NewSession) -> Result<SessionRecord> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO sessions (id, model, project_path, title, status, cost_usd,
                                  auto_approve, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'idle', '0', ?5, ?6, ?6)
            "#,
            params![
                attrs.id,
                attrs.model,
                attrs.project_path,
                attrs.title,
                attrs.auto_approve as i64,
                now.to_rfc3339(),
            ],
        )?;
        drop(conn);
        self.get_session(&attrs.id)
    }

    fn get_session(&self, id: &str) -> Result<SessionRecord> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                &format!("SELECT {SESSION_COLS} FROM sessions WHERE id = ?1"),
                [id],
                session_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;
        finish_session(raw)
    }

    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = format!("SELECT {SESSION_COLS} FROM sessions WHERE 1=1");
        let mut args: Vec<String> = Vec::new();
        if !filter.include_archived {
            sql.push_str(" AND is_archived = 0");
        }
        if let Some(project) = &filter.project_path {
            sql.push_str(" AND project_path = ?1");
            args.push(project.clone());
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), session_from_row)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(finish_session(raw?)?);
        }
        Ok(out)
    }

    fn update_session(&self, id: &str, update: &SessionUpdate) -> Result<SessionRecord> {
        let current = self.get_session(id)?;
        let title = update.title.clone().unwrap_or(current.title);
        let status = update.status.unwrap_or(current.status);
        let model = update.model.clone().unwrap_or(current.model);
        let auto_approve = update.auto_approve.unwrap_or(current.auto_approve);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE sessions SET title = ?2, status = ?3, model = ?4, auto_approve = ?5,
                                updated_at = ?6
            WHERE id = ?1
            "#,
            params![
                id,
                title,
                status.as_str(),
                model,
                auto_approve as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        drop(conn);
        self.get_session(id)
    }

    fn archive_session(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE sessions SET is_archived = 1, updated_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn update_costs(
        &self,
        id: &str,
        input_delta: u64,
        output_delta: u64,
        cost_delta: Decimal,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let cost: Option<String> = tx
            .query_row("SELECT cost_usd FROM sessions WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        let cost = parse_decimal(cost.ok_or(StoreError::NotFound)?)?;
        tx.execute(
            r#"
            UPDATE sessions
            SET input_tokens  = input_tokens + ?2,
                output_tokens = output_tokens + ?3,
                cost_usd      = ?4,
                updated_at    = ?5
            WHERE id = ?1
            "#,
            params![
                id,
                input_delta as i64,
                output_delta as i64,
                (cost + cost_delta).to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn save_message(&self, session_id: &str, message: &Message) -> Result<MessageRecord> {
        let now = Utc::now();
        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&message.tool_calls)?)
        };
        let conn = self.conn.lock().unwrap();
        // Appends must reference a live session so that the log can always be
        // re-hydrated.
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM sessions WHERE id = ?1", [session_id], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }
        conn.execute(
            r#"
            INSERT INTO messages (session_id, role, content, tool_calls, tool_call_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                session_id,
                message.role.as_str(),
                message.content,
                tool_calls,
                message.tool_call_id,
                now.to_rfc3339(),
            ],
        )?;
        let seq = conn.last_insert_rowid();
        Ok(MessageRecord {
            seq,
            session_id: session_id.to_string(),
            message: message.clone(),
            created_at: now,
        })
    }

    fn load_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT seq, session_id, role, content, tool_calls, tool_call_id, created_at
            FROM messages
            WHERE session_id = ?1
            ORDER BY seq ASC
            "#,
        )?;
        let rows = stmt.query_map([session_id], message_from_row)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(finish_message(raw?)?);
        }
        Ok(out)
    }

    fn insert_node(&self, node: &DecisionNodeRecord) -> Result<DecisionNodeRecord> {
        let conn = self.conn.lock().unwrap();
        let seq: i64 = conn
            .query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM decision_nodes", [], |row| {
                row.get(0)
            })?;
        conn.execute(
            &format!(
                "INSERT INTO decision_nodes ({NODE_COLS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                node.id,
                seq,
                node.kind.as_str(),
                node.title,
                node.description,
                node.confidence.map(|c| c as i64),
                node.status.as_str(),
                node.session_id,
                node.agent,
                serde_json::to_string(&node.metadata)?,
                node.change_id,
                node.created_at.to_rfc3339(),
                node.updated_at.to_rfc3339(),
            ],
        )?;
        let mut stored = node.clone();
        stored.seq = seq;
        Ok(stored)
    }

    fn get_node(&self, id: &str) -> Result<DecisionNodeRecord> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                &format!("SELECT {NODE_COLS} FROM decision_nodes WHERE id = ?1"),
                [id],
                node_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;
        finish_node(raw)
    }

    fn list_nodes(&self, filter: &NodeFilter) -> Result<Vec<DecisionNodeRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = format!("SELECT {NODE_COLS} FROM decision_nodes WHERE 1=1");
        let mut args: Vec<String> = Vec::new();
        if let Some(kind) = filter.kind {
            args.push(kind.as_str().to_string());
            sql.push_str(&format!(" AND kind = ?{}", args.len()));
        }
        if let Some(status) = filter.status {
            args.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(session) = &filter.session_id {
            args.push(session.clone());
            sql.push_str(&format!(" AND session_id = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY seq ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), node_from_row)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(finish_node(raw?)?);
        }
        Ok(out)
    }

    fn update_node(&self, id: &str, update: &NodeUpdate) -> Result<DecisionNodeRecord> {
        let current = self.get_node(id)?;
        let title = update.title.clone().unwrap_or(current.title);
        let description = update
            .description
            .clone()
            .unwrap_or(current.description);
        let confidence = update.confidence.unwrap_or(current.confidence);
        let status = update.status.unwrap_or(current.status);
        let metadata = update.metadata.clone().unwrap_or(current.metadata);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE decision_nodes
            SET title = ?2, description = ?3, confidence = ?4, status = ?5, metadata = ?6,
                updated_at = ?7
            WHERE id = ?1
            "#,
            params![
                id,
                title,
                description,
                confidence.map(|c| c as i64),
                status.as_str(),
                serde_json::to_string(&metadata)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        drop(conn);
        self.get_node(id)
    }

    fn delete_node(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        // Incident edges go first; the foreign keys are enforced.
        tx.execute(
            "DELETE FROM decision_edges WHERE from_id = ?1 OR to_id = ?1",
            [id],
        )?;
        let changed = tx.execute("DELETE FROM decision_nodes WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_edge(&self, edge: &DecisionEdgeRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        for endpoint in [&edge.from_id, &edge.to_id] {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM decision_nodes WHERE id = ?1",
                    [endpoint],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::Validation(format!(
                    "edge endpoint does not exist: {endpoint}"
                )));
            }
        }
        conn.execute(
            r#"
            INSERT INTO decision_edges (id, from_id, to_id, kind, weight, rationale, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                edge.id,
                edge.from_id,
                edge.to_id,
                edge.kind.as_str(),
                edge.weight,
                edge.rationale,
                edge.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn list_edges(&self, filter: &EdgeFilter) -> Result<Vec<DecisionEdgeRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = String::from(
            "SELECT id, from_id, to_id, kind, weight, rationale, created_at \
             FROM decision_edges WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(kind) = filter.kind {
            args.push(kind.as_str().to_string());
            sql.push_str(&format!(" AND kind = ?{}", args.len()));
        }
        if let Some(from) = &filter.from {
            args.push(from.clone());
            sql.push_str(&format!(" AND from_id = ?{}", args.len()));
        }
        if let Some(to) = &filter.to {
            args.push(to.clone());
            sql.push_str(&format!(" AND to_id = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY created_at ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), edge_from_row)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(finish_edge(raw?)?);
        }
        Ok(out)
    }

    fn supersede(&self, old_id: &str, new_id: &str, edge: &DecisionEdgeRecord) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for endpoint in [old_id, new_id] {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM decision_nodes WHERE id = ?1",
                    [endpoint],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound);
            }
        }
        // Idempotent in effect: a second supersede of the same pair must not
        // produce a second edge.
        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM decision_edges \
                 WHERE from_id = ?1 AND to_id = ?2 AND kind = 'supersedes'",
                [new_id, old_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_none() {
            tx.execute(
                r#"
                INSERT INTO decision_edges (id, from_id, to_id, kind, weight, rationale, created_at)
                VALUES (?1, ?2, ?3, 'supersedes', ?4, ?5, ?6)
                "#,
                params![
                    edge.id,
                    new_id,
                    old_id,
                    edge.weight,
                    edge.rationale,
                    edge.created_at.to_rfc3339(),
                ],
            )?;
        }
        tx.execute(
            "UPDATE decision_nodes SET status = 'superseded', updated_at = ?2 WHERE id = ?1",
            params![old_id, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn record_grant(&self, grant: &GrantRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO permission_grants (session_id, tool, scope, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                grant.session_id,
                grant.tool,
                grant.scope,
                grant.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn grants_for_session(&self, session_id: &str) -> Result<Vec<GrantRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT session_id, tool, scope, created_at
            FROM permission_grants
            WHERE session_id = ?1
            ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map([session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for raw in rows {
            let (session_id, tool, scope, created_at) = raw?;
            out.push(GrantRecord {
                session_id,
                tool,
                scope,
                created_at: parse_ts(created_at),
            });
        }
        Ok(out)
    }

    fn clear_grants(&self, session_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM permission_grants WHERE session_id = ?1",
            [session_id],
        )?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use loom_model::{Role, ToolCallRequest};
    use uuid::Uuid;

    fn new_session(id: &str) -> NewSession {
        NewSession {
            id: id.into(),
            model: "anthropic:claude-sonnet-4-6".into(),
            project_path: "/tmp/project".into(),
            title: "Test session".into(),
            auto_approve: false,
        }
    }

    fn node(kind: NodeKind, title: &str) -> DecisionNodeRecord {
        let now = Utc::now();
        DecisionNodeRecord {
            id: Uuid::new_v4().to_string(),
            seq: 0,
            kind,
            title: title.into(),
            description: None,
            confidence: None,
            status: NodeStatus::Active,
            session_id: None,
            agent: None,
            metadata: serde_json::Map::new(),
            change_id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn edge(from: &str, to: &str, kind: EdgeKind) -> DecisionEdgeRecord {
        DecisionEdgeRecord {
            id: Uuid::new_v4().to_string(),
            from_id: from.into(),
            to_id: to.into(),
            kind,
            weight: None,
            rationale: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_and_get_session() {
        let store = SqliteStore::open_in_memory().unwrap();
        let created = store.create_session(&new_session("s1")).unwrap();
        assert_eq!(created.status, loom_model::SessionStatus::Idle);
        assert_eq!(created.cost_usd, Decimal::ZERO);
        let fetched = store.get_session("s1").unwrap();
        assert_eq!(fetched.title, "Test session");
    }

    #[test]
    fn get_missing_session_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(store.get_session("nope"), Err(StoreError::NotFound)));
    }

    #[test]
    fn archive_hides_session_from_listing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_session(&new_session("s1")).unwrap();
        store.create_session(&new_session("s2")).unwrap();
        store.archive_session("s1").unwrap();

        let listed = store.list_sessions(&SessionFilter::default()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "s2");

        let all = store
            .list_sessions(&SessionFilter {
                include_archived: true,
                ..SessionFilter::default()
            })
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn update_costs_accumulates_exact_decimal() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_session(&new_session("s1")).unwrap();
        // 0.1 + 0.2 must equal exactly 0.3
        store
            .update_costs("s1", 10, 5, Decimal::new(1, 1))
            .unwrap();
        store
            .update_costs("s1", 20, 10, Decimal::new(2, 1))
            .unwrap();
        let session = store.get_session("s1").unwrap();
        assert_eq!(session.input_tokens, 30);
        assert_eq!(session.output_tokens, 15);
        assert_eq!(session.cost_usd, Decimal::new(3, 1));
    }

    #[test]
    fn messages_append_and_load_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_session(&new_session("s1")).unwrap();

        let mut args = serde_json::Map::new();
        args.insert("path".into(), serde_json::json!("a.txt"));
        store.save_message("s1", &Message::user("hi")).unwrap();
        store
            .save_message(
                "s1",
                &Message::assistant_with_tool_calls(
                    None,
                    vec![ToolCallRequest::new("c1", "file_read", args)],
                ),
            )
            .unwrap();
        store.save_message("s1", &Message::tool("c1", "A")).unwrap();

        let messages = store.load_messages("s1").unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].message.role, Role::User);
        assert_eq!(messages[1].message.tool_calls[0].id, "c1");
        assert_eq!(messages[2].message.tool_call_id.as_deref(), Some("c1"));
        assert!(messages.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[test]
    fn save_message_to_missing_session_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.save_message("ghost", &Message::user("hi"));
        assert!(matches!(result, Err(StoreError::NotFound)));
    }

    #[test]
    fn node_insert_get_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut n = node(NodeKind::Goal, "Ship feature");
        n.confidence = Some(80);
        n.metadata
            .insert("source".into(), serde_json::json!("test"));
        let stored = store.insert_node(&n).unwrap();
        assert!(stored.seq > 0);

        let fetched = store.get_node(&n.id).unwrap();
        assert_eq!(fetched.kind, NodeKind::Goal);
        assert_eq!(fetched.title, "Ship feature");
        assert_eq!(fetched.confidence, Some(80));
        assert_eq!(fetched.metadata["source"], serde_json::json!("test"));
    }

    #[test]
    fn list_nodes_filters_by_kind_and_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_node(&node(NodeKind::Goal, "g1")).unwrap();
        store.insert_node(&node(NodeKind::Decision, "d1")).unwrap();
        let mut resolved = node(NodeKind::Goal, "g2");
        resolved.status = NodeStatus::Resolved;
        store.insert_node(&resolved).unwrap();

        let goals = store
            .list_nodes(&NodeFilter {
                kind: Some(NodeKind::Goal),
                status: Some(NodeStatus::Active),
                ..NodeFilter::default()
            })
            .unwrap();
        assert_eq!(goals.len(), 1);
        assert_eq!(goals[0].title, "g1");
    }

    #[test]
    fn edge_requires_existing_endpoints() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = node(NodeKind::Goal, "a");
        store.insert_node(&a).unwrap();
        let result = store.insert_edge(&edge(&a.id, "missing", EdgeKind::LeadsTo));
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[test]
    fn supersede_is_atomic_and_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let old = node(NodeKind::Goal, "old");
        let new = node(NodeKind::Goal, "new");
        store.insert_node(&old).unwrap();
        store.insert_node(&new).unwrap();

        let e = edge(&new.id, &old.id, EdgeKind::Supersedes);
        store.supersede(&old.id, &new.id, &e).unwrap();
        // Re-apply; must not create a second edge.
        let e2 = edge(&new.id, &old.id, EdgeKind::Supersedes);
        store.supersede(&old.id, &new.id, &e2).unwrap();

        let edges = store
            .list_edges(&EdgeFilter {
                kind: Some(EdgeKind::Supersedes),
                from: Some(new.id.clone()),
                to: Some(old.id.clone()),
            })
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(store.get_node(&old.id).unwrap().status, NodeStatus::Superseded);
    }

    #[test]
    fn delete_node_removes_incident_edges() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = node(NodeKind::Goal, "a");
        let b = node(NodeKind::Decision, "b");
        store.insert_node(&a).unwrap();
        store.insert_node(&b).unwrap();
        store
            .insert_edge(&edge(&a.id, &b.id, EdgeKind::LeadsTo))
            .unwrap();

        store.delete_node(&a.id).unwrap();
        assert!(matches!(store.get_node(&a.id), Err(StoreError::NotFound)));
        assert!(store.list_edges(&EdgeFilter::default()).unwrap().is_empty());
        // The other endpoint is untouched.
        assert!(store.get_node(&b.id).is_ok());
    }

    #[test]
    fn grants_record_list_clear() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .record_grant(&GrantRecord {
                session_id: "s1".into(),
                tool: "file_write".into(),
                scope: "*".into(),
                created_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(store.grants_for_session("s1").unwrap().len(), 1);
        assert!(store.grants_for_session("s2").unwrap().is_empty());
        store.clear_grants("s1").unwrap();
        assert!(store.grants_for_session("s1").unwrap().is_empty());
    }

    #[test]
    fn store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loom.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.create_session(&new_session("s1")).unwrap();
            store.save_message("s1", &Message::user("persisted")).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let messages = store.load_messages("s1").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message.content_str(), "persisted");
    }
}
