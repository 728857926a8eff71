// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use loom_store::{GrantRecord, Store, StoreError};

/// Outcome of a permission check (or of the ask-path prompter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
    Ask,
}

/// Static tool classification used for UI hints only — never for the
/// permission decision itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolClass {
    Read,
    Write,
    Execute,
    Unknown,
}

/// Classify a tool by its name against a fixed table.
pub fn classify_tool(name: &str) -> ToolClass {
    match name {
        "file_read" | "file_search" | "content_search" | "directory_list" => ToolClass::Read,
        "file_write" | "file_edit" | "file_delete" => ToolClass::Write,
        "shell" | "run_command" => ToolClass::Execute,
        _ => ToolClass::Unknown,
    }
}

/// Classifies tool invocations against the auto-approve list and per-session
/// grants.
///
/// Rules, in order: tool on the auto-approve list ⇒ allowed; a grant for this
/// session whose tool matches and whose scope is `*` or equals the target
/// path ⇒ allowed; otherwise ask.  [`grant`](Self::grant) is the only
/// mutator; grants live for the duration of their session.
pub struct PermissionManager {
    auto_approve: Vec<String>,
    store: Arc<dyn Store>,
}

impl PermissionManager {
    pub fn new(auto_approve: Vec<String>, store: Arc<dyn Store>) -> Self {
        Self {
            auto_approve,
            store,
        }
    }

    pub fn check(&self, tool: &str, path: &str, session_id: &str) -> Decision {
        if self.auto_approve.iter().any(|name| name == tool) {
            return Decision::Allowed;
        }
        let grants = match self.store.grants_for_session(session_id) {
            Ok(grants) => grants,
            Err(err) => {
                // A store failure must not silently allow; fall through to ask.
                debug!(session_id, "grant lookup failed: {err}");
                return Decision::Ask;
            }
        };
        let granted = grants
            .iter()
            .any(|g| g.tool == tool && (g.scope == "*" || g.scope == path));
        if granted {
            Decision::Allowed
        } else {
            Decision::Ask
        }
    }

    /// Record a grant for this session.
    pub fn grant(&self, tool: &str, scope: &str, session_id: &str) -> Result<(), StoreError> {
        self.store.record_grant(&GrantRecord {
            session_id: session_id.to_string(),
            tool: tool.to_string(),
            scope: scope.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Drop all grants for a session (called when the session ends).
    pub fn clear(&self, session_id: &str) -> Result<(), StoreError> {
        self.store.clear_grants(session_id)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use loom_store::MemoryStore;

    fn manager(auto: &[&str]) -> PermissionManager {
        PermissionManager::new(
            auto.iter().map(|s| s.to_string()).collect(),
            Arc::new(MemoryStore::new()),
        )
    }

    #[test]
    fn auto_approve_list_allows() {
        let pm = manager(&["file_read"]);
        assert_eq!(pm.check("file_read", "a.txt", "s1"), Decision::Allowed);
    }

    #[test]
    fn unlisted_tool_without_grant_asks() {
        let pm = manager(&["file_read"]);
        assert_eq!(pm.check("file_write", "a.txt", "s1"), Decision::Ask);
    }

    #[test]
    fn exact_path_grant_allows_only_that_path() {
        let pm = manager(&[]);
        pm.grant("file_write", "a.txt", "s1").unwrap();
        assert_eq!(pm.check("file_write", "a.txt", "s1"), Decision::Allowed);
        assert_eq!(pm.check("file_write", "b.txt", "s1"), Decision::Ask);
    }

    #[test]
    fn wildcard_grant_allows_any_path() {
        let pm = manager(&[]);
        pm.grant("shell", "*", "s1").unwrap();
        assert_eq!(pm.check("shell", "anything", "s1"), Decision::Allowed);
    }

    #[test]
    fn grants_are_session_scoped() {
        let pm = manager(&[]);
        pm.grant("file_write", "*", "s1").unwrap();
        assert_eq!(pm.check("file_write", "a.txt", "s2"), Decision::Ask);
    }

    #[test]
    fn grant_for_other_tool_does_not_apply() {
        let pm = manager(&[]);
        pm.grant("file_write", "*", "s1").unwrap();
        assert_eq!(pm.check("file_delete", "a.txt", "s1"), Decision::Ask);
    }

    #[test]
    fn clear_drops_session_grants() {
        let pm = manager(&[]);
        pm.grant("file_write", "*", "s1").unwrap();
        pm.clear("s1").unwrap();
        assert_eq!(pm.check("file_write", "a.txt", "s1"), Decision::Ask);
    }

    #[test]
    fn classification_table() {
        assert_eq!(classify_tool("file_read"), ToolClass::Read);
        assert_eq!(classify_tool("file_edit"), ToolClass::Write);
        assert_eq!(classify_tool("shell"), ToolClass::Execute);
        assert_eq!(classify_tool("quantum_leap"), ToolClass::Unknown);
    }
}
