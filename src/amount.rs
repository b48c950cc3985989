use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Serialize};

/// Positive transfer amount in whole currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(NonZeroU64);

impl Amount {
    /// Returns `None` for zero, which is not a valid transfer amount.
    pub fn new(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Amount)
    }

    /// Parse a signed amount as it may arrive from a request, rejecting
    /// zero and negatives.
    pub fn from_signed(value: i64) -> Option<Self> {
        u64::try_from(value).ok().and_then(Self::new)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        assert!(Amount::new(0).is_none());
    }

    #[test]
    fn negative_is_rejected() {
        assert!(Amount::from_signed(-50).is_none());
        assert!(Amount::from_signed(0).is_none());
        assert_eq!(Amount::from_signed(50).map(Amount::get), Some(50));
    }

    #[test]
    fn display_is_plain_integer() {
        assert_eq!(Amount::new(150_000).unwrap().to_string(), "150000");
    }

    #[test]
    fn serializes_as_number() {
        let json = serde_json::to_string(&Amount::new(42).unwrap()).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn ordering() {
        let small = Amount::new(100).unwrap();
        let large = Amount::new(200).unwrap();
        assert!(small < large);
    }
}
