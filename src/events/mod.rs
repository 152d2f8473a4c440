//! Lifecycle events emitted by the interception engine
//!
//! These are the only way the engine reports progress; the IPC server and
//! the status log both consume them from a broadcast channel.

use serde::{Deserialize, Serialize};

use crate::engine::Rate;
use crate::scenario::Slot;

/// Notifications for the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A scenario was armed and will replay from its beginning
    Started {
        /// Slot index, 0 for F1
        slot: Slot,
    },

    /// The active session ended (cancelled, replaced, finished or torn down)
    Stopped,

    /// A character was injected
    KeyStroke {
        /// Characters replayed so far in the active session
        position: usize,
    },

    /// Letters-per-keystroke changed
    RateChanged { rate: Rate },
}

impl std::fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineEvent::Started { slot } => write!(f, "STARTED ({})", slot),
            EngineEvent::Stopped => write!(f, "STOPPED"),
            EngineEvent::KeyStroke { position } => write!(f, "KEY_STROKE ({})", position),
            EngineEvent::RateChanged { rate } => write!(f, "RATE_CHANGED ({})", rate),
        }
    }
}
