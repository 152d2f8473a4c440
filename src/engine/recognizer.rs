//! Hotkey grammar
//!
//! Ctrl+Shift+F1..F12 arms a scenario, Ctrl+Shift+Up/Down changes the rate,
//! Escape cancels. While a session is active every other non-modifier key
//! triggers the next replay batch.

use crate::hotkey::{Key, ModifierState};
use crate::scenario::Slot;

/// Classification of a key-down event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start replaying the given slot from its beginning
    Arm(Slot),
    /// Change letters-per-keystroke by +1 or -1
    AdjustRate(i64),
    Cancel,
    /// Replace this keystroke with the next batch of scenario characters
    Replay,
    PassThrough,
}

/// Classify a key-down given the current modifiers and session state
pub fn classify(key: Key, modifiers: &ModifierState, session_active: bool) -> Action {
    if key.is_modifier() {
        return Action::PassThrough;
    }

    if key == Key::Escape {
        return Action::Cancel;
    }

    if modifiers.is_ctrl_shift() {
        match key {
            Key::Function(n) => {
                if let Some(slot) = Slot::from_function_key(n) {
                    return Action::Arm(slot);
                }
            }
            Key::Up => return Action::AdjustRate(1),
            Key::Down => return Action::AdjustRate(-1),
            _ => {}
        }
    }

    if session_active {
        Action::Replay
    } else {
        Action::PassThrough
    }
}
