// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod graph;
mod timeline;

pub use graph::{DecisionGraph, EdgeOpts, GraphError, NewNode, Result};
pub use timeline::format_timeline;

pub use loom_store::{
    DecisionEdgeRecord, DecisionNodeRecord, EdgeFilter, EdgeKind, NodeFilter, NodeKind,
    NodeStatus, NodeUpdate,
};
