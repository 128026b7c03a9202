//! Status records for query replies and the rejection channel.

use serde::Serialize;

use crate::error::EngineError;
use crate::transport::TransportState;

/// Per-slot status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotStatus {
    pub slot: usize,
    pub screen_set: usize,
    pub index_in_set: usize,
    pub name: String,
    pub armed: bool,
    /// The only armed slot of its screen set.
    pub solo: bool,
    pub queued: bool,
    pub recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,
}

/// Snapshot of engine state, ordered by slot index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub screen_set: usize,
    pub notepad: String,
    pub bpm: f64,
    pub transport: TransportState,
    pub tick: i64,
    pub slots: Vec<SlotStatus>,
}

/// Asynchronous notifications from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// A command was dropped.
    Rejected { command: String, error: EngineError },
    TransportChanged(TransportState),
    ScreenSetChanged(usize),
}
