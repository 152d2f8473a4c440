//! Fixed-capacity scenario storage, one text body per hotkey slot

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Number of hotkey slots (F1 through F12)
pub const SLOT_COUNT: usize = 12;

/// Index of a scenario slot, always below [`SLOT_COUNT`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct Slot(u8);

impl Slot {
    pub fn new(index: usize) -> Option<Self> {
        if index < SLOT_COUNT {
            u8::try_from(index).ok().map(Self)
        } else {
            None
        }
    }

    /// Slot for a function key number (F1 => slot 0)
    pub fn from_function_key(number: u8) -> Option<Self> {
        usize::from(number).checked_sub(1).and_then(Self::new)
    }

    /// Slot for a hotkey name such as `"F3"`
    pub fn from_hotkey_name(name: &str) -> Option<Self> {
        let number = name.strip_prefix('F')?.parse::<u8>().ok()?;
        // Reject "F01" and friends, only canonical names map to a slot
        if format!("F{}", number) != name {
            return None;
        }
        Self::from_function_key(number)
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn hotkey_name(self) -> String {
        format!("F{}", self.0 + 1)
    }

    pub fn all() -> impl Iterator<Item = Slot> {
        (0..SLOT_COUNT).filter_map(Slot::new)
    }
}

impl TryFrom<usize> for Slot {
    type Error = String;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        Slot::new(index).ok_or_else(|| format!("slot {} out of range 0..{}", index, SLOT_COUNT))
    }
}

impl From<Slot> for usize {
    fn from(slot: Slot) -> Self {
        slot.index()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hotkey_name())
    }
}

/// Read-only collection of up to twelve scenario texts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioStore {
    slots: [Option<Arc<str>>; SLOT_COUNT],
}

impl ScenarioStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from an ordered list of texts; entries past the last slot are dropped
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<Arc<str>>,
    {
        let mut store = Self::empty();
        for (slot, text) in Slot::all().zip(texts) {
            store.slots[slot.index()] = text.map(Into::into);
        }
        store
    }

    pub(super) fn assign(&mut self, slot: Slot, text: impl Into<Arc<str>>) {
        self.slots[slot.index()] = Some(text.into());
    }

    pub fn get(&self, slot: Slot) -> Option<&str> {
        self.slots[slot.index()].as_deref()
    }

    /// Number of slots holding a text body
    pub fn assigned_count(&self) -> usize {
        self.slots.iter().filter(|text| text.is_some()).count()
    }
}
