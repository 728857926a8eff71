// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod bus;
mod event;

pub use bus::{EventBus, EventReceiver, CHANNEL_CAPACITY};
pub use event::{session_topic, team_topic, ArchitectPhase, Event, TELEMETRY_TOPIC};
