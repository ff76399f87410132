//! Version types for data document compatibility.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ShopError;

/// Schema version using semantic versioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Major version (breaking changes)
    pub major: u16,
    /// Minor version (backwards-compatible additions)
    pub minor: u16,
    /// Patch version (bug fixes)
    pub patch: u16,
}

impl SchemaVersion {
    /// Creates a new schema version.
    #[must_use]
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Current dialogue document version.
    pub const DIALOGUE: Self = Self::new(1, 0, 0);

    /// Checks if this version is compatible with another version.
    /// Compatible means same major version and this minor >= other minor.
    #[must_use]
    pub const fn is_compatible_with(&self, other: &Self) -> bool {
        self.major == other.major && self.minor >= other.minor
    }

    /// Checks if this version can read data from another version.
    #[must_use]
    pub const fn can_read(&self, data_version: &Self) -> bool {
        self.major == data_version.major
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SchemaVersion {
    type Err = ShopError;

    /// Parses `major[.minor[.patch]]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ShopError::InvalidVersion(s.to_string());
        let pieces: Vec<&str> = s.trim().split('.').collect();
        if pieces.len() > 3 {
            return Err(invalid());
        }
        let mut parts = [0u16; 3];
        for (slot, piece) in parts.iter_mut().zip(pieces) {
            *slot = piece.parse().map_err(|_| invalid())?;
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_and_short() {
        assert_eq!("1.2.3".parse::<SchemaVersion>().ok(), Some(SchemaVersion::new(1, 2, 3)));
        assert_eq!("2".parse::<SchemaVersion>().ok(), Some(SchemaVersion::new(2, 0, 0)));
        assert_eq!("1.4".parse::<SchemaVersion>().ok(), Some(SchemaVersion::new(1, 4, 0)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<SchemaVersion>().is_err());
        assert!("one.two".parse::<SchemaVersion>().is_err());
        assert!("1.2.3.4".parse::<SchemaVersion>().is_err());
    }

    #[test]
    fn test_can_read_same_major() {
        let current = SchemaVersion::DIALOGUE;
        assert!(current.can_read(&SchemaVersion::new(1, 9, 0)));
        assert!(!current.can_read(&SchemaVersion::new(2, 0, 0)));
    }
}
