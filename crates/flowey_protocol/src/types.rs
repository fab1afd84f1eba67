//! Identity and counter types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Versions wrap back to zero once they reach this value.
pub const VERSION_MODULUS: u32 = 1_000_000;

/// Stable identifier of an authenticated account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Creates a user ID from its raw value.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version counter of a state document.
///
/// Always in `[0, VERSION_MODULUS)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Version(u32);

impl Version {
    /// The initial version of a state that has never been written.
    pub const ZERO: Version = Version(0);

    /// Creates a version, returning `None` if it is out of range.
    pub fn new(value: u64) -> Option<Self> {
        if value < u64::from(VERSION_MODULUS) {
            Some(Self(value as u32))
        } else {
            None
        }
    }

    /// Returns the version that follows this one, wrapping at the modulus.
    #[must_use]
    pub fn next(self) -> Self {
        Self((self.0 + 1) % VERSION_MODULUS)
    }

    /// Returns the raw value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn version_range() {
        assert_eq!(Version::new(0), Some(Version::ZERO));
        assert_eq!(Version::new(999_999).map(Version::get), Some(999_999));
        assert_eq!(Version::new(1_000_000), None);
    }

    #[test]
    fn version_wraps() {
        let last = Version::new(999_999).unwrap();
        assert_eq!(last.next(), Version::ZERO);
        assert_eq!(Version::new(5).unwrap().next().get(), 6);
    }

    #[test]
    fn user_id_serializes_as_number() {
        let json = serde_json::to_string(&UserId::new(42)).unwrap();
        assert_eq!(json, "42");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, UserId::new(42));
    }

    proptest! {
        #[test]
        fn next_stays_in_range(value in 0u64..1_000_000) {
            let next = Version::new(value).unwrap().next();
            prop_assert!(next.get() < VERSION_MODULUS);
            prop_assert_eq!(u64::from(next.get()), (value + 1) % 1_000_000);
        }
    }
}
