//! Key identifiers and modifier state tracking
//!
//! Platform backends translate their native key codes into [`Key`] so the
//! engine never sees raw OS values. Anything a backend cannot name becomes
//! [`Key::Other`] and is treated as an ordinary key.

use std::fmt;

/// Logical keys the engine cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    LeftShift,
    RightShift,
    LeftControl,
    RightControl,
    LeftAlt,
    RightAlt,
    LeftMeta,
    RightMeta,
    Escape,
    /// Function key by its printed number (F1 => 1)
    Function(u8),
    Up,
    Down,
    /// Any other key, carrying the backend's native code for logging
    Other(u32),
}

impl Key {
    /// True for Shift, Ctrl, Alt and the OS (Windows/Command) keys
    pub fn is_modifier(self) -> bool {
        matches!(
            self,
            Key::LeftShift
                | Key::RightShift
                | Key::LeftControl
                | Key::RightControl
                | Key::LeftAlt
                | Key::RightAlt
                | Key::LeftMeta
                | Key::RightMeta
        )
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Function(n) => write!(f, "F{}", n),
            Key::Other(code) => write!(f, "Key({})", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Whether a key went down or came up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirection {
    Down,
    Up,
}

/// A single keyboard event as delivered by the hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub direction: KeyDirection,
}

impl KeyEvent {
    pub fn down(key: Key) -> Self {
        Self {
            key,
            direction: KeyDirection::Down,
        }
    }

    pub fn up(key: Key) -> Self {
        Self {
            key,
            direction: KeyDirection::Up,
        }
    }

    pub fn is_down(&self) -> bool {
        self.direction == KeyDirection::Down
    }
}

/// Tracks whether Shift and Ctrl are currently held
///
/// Left and right variants collapse into one logical flag each.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    shift: bool,
    control: bool,
}

impl ModifierState {
    /// Update from a key event; non-modifier keys leave the state unchanged
    pub fn on_key_event(&mut self, key: Key, direction: KeyDirection) {
        let held = direction == KeyDirection::Down;
        match key {
            Key::LeftShift | Key::RightShift => self.shift = held,
            Key::LeftControl | Key::RightControl => self.control = held,
            _ => {}
        }
    }

    pub fn is_shift_held(&self) -> bool {
        self.shift
    }

    pub fn is_ctrl_held(&self) -> bool {
        self.control
    }

    /// Both Ctrl and Shift are down, the prefix of every hotkey
    pub fn is_ctrl_shift(&self) -> bool {
        self.shift && self.control
    }
}
