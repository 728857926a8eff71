// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{info, warn};
use uuid::Uuid;

use loom_model::{Message, SessionStatus};
use loom_store::{NewSession, StoreError};

use crate::engine::{EngineError, EngineHandle, EngineRuntime, SessionEngine};

/// Options for `start_session`.  Everything is optional except the project
/// path; omitted fields fall back to configuration defaults.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Resume this id; a fresh id is generated when absent.
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub project_path: PathBuf,
    pub title: Option<String>,
    pub auto_approve: bool,
}

/// Registry of live engines, one per session id.
///
/// `start_session` is idempotent per id; a crashed engine found on
/// `start_session`/`find_session` is restarted from its persisted state, so
/// the persisted log is always the source of truth after recovery.
pub struct SessionManager {
    runtime: EngineRuntime,
    engines: Mutex<HashMap<String, EngineHandle>>,
}

impl SessionManager {
    pub fn new(runtime: EngineRuntime) -> Self {
        Self {
            runtime,
            engines: Mutex::new(HashMap::new()),
        }
    }

    pub fn runtime(&self) -> &EngineRuntime {
        &self.runtime
    }

    /// Create or resume a session engine.  A duplicate start for a live id
    /// returns the existing handle.
    pub fn start_session(&self, opts: StartOptions) -> Result<EngineHandle, EngineError> {
        let id = opts
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut engines = self.engines.lock().unwrap();
        if let Some(handle) = engines.get(&id) {
            if handle.is_alive() {
                return Ok(handle.clone());
            }
            warn!(session_id = %id, "engine found dead; restarting from persisted state");
            engines.remove(&id);
        }

        let session = match self.runtime.store.get_session(&id) {
            Ok(session) => session,
            Err(StoreError::NotFound) => self.runtime.store.create_session(&NewSession {
                id: id.clone(),
                model: opts
                    .model
                    .unwrap_or_else(|| self.runtime.config.model.default.clone()),
                project_path: opts.project_path.display().to_string(),
                title: opts.title.unwrap_or_default(),
                auto_approve: opts.auto_approve,
            })?,
            Err(err) => return Err(err.into()),
        };

        let messages: Vec<Message> = self
            .runtime
            .store
            .load_messages(&id)?
            .into_iter()
            .map(|record| record.message)
            .collect();

        info!(session_id = %id, resumed = !messages.is_empty(), "starting session engine");
        let handle = SessionEngine::spawn(session, messages, self.runtime.clone());
        engines.insert(id, handle.clone());
        Ok(handle)
    }

    /// Find the live engine for an id, restarting a crashed one from the
    /// store.  `NotFound` when the session was never created.
    pub fn find_session(&self, id: &str) -> Result<EngineHandle, EngineError> {
        {
            let engines = self.engines.lock().unwrap();
            if let Some(handle) = engines.get(id) {
                if handle.is_alive() {
                    return Ok(handle.clone());
                }
            }
        }
        // Dead or unknown: only sessions the store knows can be (re)started.
        self.runtime.store.get_session(id)?;
        self.start_session(StartOptions {
            session_id: Some(id.to_string()),
            ..StartOptions::default()
        })
    }

    /// Stop an engine normally and drop it from the registry.
    pub async fn stop_session(&self, id: &str) -> Result<(), EngineError> {
        let handle = {
            let mut engines = self.engines.lock().unwrap();
            engines.remove(id).ok_or(EngineError::NotFound)?
        };
        handle.stop().await
    }

    /// Scan the registry: `(id, handle, status)` for every live engine.
    /// Dead entries are pruned as a side effect.
    pub async fn list_active(&self) -> Vec<(String, EngineHandle, SessionStatus)> {
        let handles: Vec<(String, EngineHandle)> = {
            let mut engines = self.engines.lock().unwrap();
            engines.retain(|_, handle| handle.is_alive());
            engines
                .iter()
                .map(|(id, handle)| (id.clone(), handle.clone()))
                .collect()
        };

        let mut out = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            if let Ok(status) = handle.get_status().await {
                out.push((id, handle, status));
            }
        }
        out
    }
}
