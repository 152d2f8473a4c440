//! Hotkey module: global keyboard hook and synthetic key injection
//!
//! The platform backend feeds every keyboard event into the engine on a
//! dedicated hook thread and injects the replayed characters.

mod backend;
mod keys;
mod listener;
#[cfg(target_os = "macos")]
pub mod macos;

pub use backend::{HookError, KeyInjector, Verdict};
pub use keys::{Key, KeyEvent, ModifierState};
pub use listener::{EngineSetup, HookListener};

#[cfg(test)]
pub use backend::InjectError;
#[cfg(test)]
pub use keys::KeyDirection;
