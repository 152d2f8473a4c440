//! Re-entrancy guard around synthetic injections
//!
//! While the engine injects a keystroke the hook may be re-entered with
//! that very keystroke. The gate marks that window so such events are
//! passed through instead of being intercepted again.

use std::cell::Cell;

/// Single-threaded interception flag, active unless an injection is running
#[derive(Debug)]
pub struct SuppressionGate {
    active: Cell<bool>,
}

impl SuppressionGate {
    pub fn new() -> Self {
        Self {
            active: Cell::new(true),
        }
    }

    /// Whether the next event should be treated as real input
    pub fn is_interception_active(&self) -> bool {
        self.active.get()
    }

    /// Run `action` with interception disabled, restoring it on every exit path
    pub fn with_suppression_disabled<T>(&self, action: impl FnOnce() -> T) -> T {
        let _window = SuppressionWindow::open(self);
        action()
    }
}

impl Default for SuppressionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Restores interception when dropped, including during unwinding
struct SuppressionWindow<'a> {
    gate: &'a SuppressionGate,
}

impl<'a> SuppressionWindow<'a> {
    fn open(gate: &'a SuppressionGate) -> Self {
        gate.active.set(false);
        Self { gate }
    }
}

impl Drop for SuppressionWindow<'_> {
    fn drop(&mut self) {
        self.gate.active.set(true);
    }
}
