//! Letters typed per intercepted keystroke

use std::fmt;

use serde::{Deserialize, Serialize};

/// Throughput of a replay, always within `[Rate::MIN, Rate::MAX]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub struct Rate(u8);

impl Rate {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    /// Clamp any requested value into range
    pub fn clamped(value: i64) -> Self {
        let bounded = value.clamp(i64::from(Self::MIN), i64::from(Self::MAX));
        Self(u8::try_from(bounded).unwrap_or(Self::MIN))
    }

    /// Step up or down by `delta`, clamping at the bounds
    pub fn step(self, delta: i64) -> Self {
        Self::clamped(i64::from(self.0).saturating_add(delta))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Rate {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

impl From<i64> for Rate {
    fn from(value: i64) -> Self {
        Self::clamped(value)
    }
}

impl From<Rate> for u8 {
    fn from(rate: Rate) -> Self {
        rate.0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamps_both_ends() {
        assert_eq!(Rate::clamped(-3).get(), 1);
        assert_eq!(Rate::clamped(0).get(), 1);
        assert_eq!(Rate::clamped(5).get(), 5);
        assert_eq!(Rate::clamped(11).get(), 10);
        assert_eq!(Rate::clamped(i64::MAX).get(), 10);
    }

    #[test]
    fn test_step() {
        assert_eq!(Rate::clamped(9).step(1).get(), 10);
        assert_eq!(Rate::clamped(10).step(1).get(), 10);
        assert_eq!(Rate::clamped(1).step(-1).get(), 1);
        assert_eq!(Rate::clamped(4).step(-1).get(), 3);
    }

    #[test]
    fn test_deserialize_clamps() {
        let rate: Rate = serde_json::from_str("42").unwrap();
        assert_eq!(rate.get(), 10);
        assert_eq!(serde_json::to_string(&Rate::clamped(3)).unwrap(), "3");
    }
}
