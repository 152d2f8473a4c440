//! Scenario module: the per-hotkey texts the engine replays

mod loader;
mod store;

pub use loader::load;
pub use store::{ScenarioStore, Slot};
