//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::Rate;
use crate::events::EngineEvent;
use crate::scenario::Slot;

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Set letters typed per keystroke; clamped to the valid range
    SetRate { letters_per_keystroke: i64 },

    /// Stop the active scenario
    Stop,

    /// Fetch the text assigned to a slot
    GetScenario { slot: Slot },

    /// Replace all scenarios from a file
    LoadScenarios { path: PathBuf },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to engine event notifications
    Subscribe,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Command queued for the engine
    Accepted,

    /// Text of one slot, `None` when unassigned
    Scenario {
        slot: Slot,
        hotkey: String,
        text: Option<String>,
    },

    /// Scenario file loaded and handed to the engine
    ScenariosLoaded { assigned: usize },

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_owned(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Engine lifecycle event occurred
    Event { event: EngineEvent },
}

/// Progress of the active replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub slot: Slot,
    pub hotkey: String,
    /// Characters replayed so far
    pub position: usize,
    /// Total characters in the scenario
    pub length: usize,
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Active replay, if any
    pub session: Option<SessionStatus>,

    /// Letters typed per intercepted keystroke
    pub letters_per_keystroke: Rate,

    /// Slots that have a scenario text
    pub assigned_slots: usize,

    /// File the scenarios were loaded from
    pub scenario_path: Option<PathBuf>,

    /// Whether the keyboard hook is installed
    pub hook_installed: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            session: None,
            letters_per_keystroke: Rate::default(),
            assigned_slots: 0,
            scenario_path: None,
            hook_installed: false,
            uptime_secs: 0,
        }
    }
}
