//! Interception engine
//!
//! Explicit state machine with two states:
//! - Idle: keystrokes pass through, only hotkeys are recognized
//! - Armed: each real keystroke is replaced by the next scenario characters

mod cursor;
mod gate;
mod machine;
mod rate;
mod recognizer;

pub use cursor::Keystroke;
pub use gate::SuppressionGate;
pub use machine::{EngineCommand, InterceptionEngine};
pub use rate::Rate;
