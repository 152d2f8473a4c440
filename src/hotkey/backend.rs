//! Capabilities the engine needs from the operating system
//!
//! A backend provides a global keyboard hook and a way to synthesize
//! keystrokes. Both are driven from the single hook thread.

use std::time::Duration;

use crate::engine::Keystroke;

use super::keys::KeyEvent;

/// What the hook should do with the event it just delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the event to the rest of the input pipeline unchanged
    PassThrough,
    /// Swallow the event so no application sees it
    Suppress,
}

/// Callback invoked synchronously for every keyboard event
pub type HookHandler = Box<dyn FnMut(KeyEvent) -> Verdict>;

/// A system-wide low-level keyboard hook
pub trait KeyboardHook {
    /// Register the handler; events start flowing on the next `pump`
    fn install(&mut self, handler: HookHandler) -> Result<(), HookError>;

    /// Deliver pending events to the handler, waiting at most `timeout`
    fn pump(&mut self, timeout: Duration);

    /// Remove the hook. Calling it twice is harmless.
    fn uninstall(&mut self);
}

/// Synthesizes a keystroke indistinguishable from real input
///
/// Must complete synchronously on the calling thread.
pub trait KeyInjector {
    fn inject(&mut self, keystroke: &Keystroke) -> Result<(), InjectError>;
}

/// Errors that can occur while installing or running the hook
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("keyboard hook is already running")]
    AlreadyRunning,

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to attach event tap to the run loop")]
    RunLoopSource,

    #[error("failed to create synthetic event source")]
    EventSource,

    #[error("failed to spawn hook thread: {0}")]
    ThreadSpawn(String),

    #[error("hook thread exited before reporting installation")]
    ThreadExited,

    #[error("no keyboard hook backend for this platform")]
    Unsupported,
}

/// Errors from a single synthetic keystroke
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("failed to create keyboard event")]
    EventCreation,

    #[error("injection rejected: {0}")]
    Rejected(String),
}
