// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod error;
mod memory;
mod records;
mod sqlite;
mod store;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use records::{
    DecisionEdgeRecord, DecisionNodeRecord, EdgeFilter, EdgeKind, GrantRecord, MessageRecord,
    NewSession, NodeFilter, NodeKind, NodeStatus, NodeUpdate, SessionFilter, SessionRecord,
    SessionUpdate,
};
pub use sqlite::SqliteStore;
pub use store::Store;
