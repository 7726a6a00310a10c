//! Migration version identifiers

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{MigrationError, MigrationResult};

/// Totally ordered `major.minor` migration version.
///
/// Ordering is lexicographic: `major` first, then `minor`. The derived
/// `Ord` relies on the field order below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    major: u32,
    minor: u32,
}

impl Version {
    /// Create a new version
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Create a version from signed components, as stored by most backends
    pub fn try_new(major: i64, minor: i64) -> MigrationResult<Self> {
        let component = |value: i64, name: &str| {
            u32::try_from(value).map_err(|_| {
                MigrationError::InvalidVersion(format!(
                    "{} component must be a non-negative 32-bit integer, got {}",
                    name, value
                ))
            })
        };

        Ok(Self::new(component(major, "major")?, component(minor, "minor")?))
    }

    pub const fn major(&self) -> u32 {
        self.major
    }

    pub const fn minor(&self) -> u32 {
        self.minor
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl TryFrom<(i64, i64)> for Version {
    type Error = MigrationError;

    fn try_from((major, minor): (i64, i64)) -> Result<Self, Self::Error> {
        Self::try_new(major, minor)
    }
}

impl From<(u32, u32)> for Version {
    fn from((major, minor): (u32, u32)) -> Self {
        Self::new(major, minor)
    }
}

impl FromStr for Version {
    type Err = MigrationError;

    /// Parses `"major.minor"`; a bare `"major"` means `major.0`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parse = |part: &str| {
            part.parse::<i64>()
                .map_err(|_| MigrationError::InvalidVersion(format!("cannot parse '{}'", s)))
        };

        match trimmed.split_once('.') {
            Some((major, minor)) => Self::try_new(parse(major)?, parse(minor)?),
            None => Self::try_new(parse(trimmed)?, 0),
        }
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexicographic_ordering() {
        assert!(Version::new(1, 0) < Version::new(1, 1));
        assert!(Version::new(1, 9) < Version::new(2, 0));
        assert!(Version::new(2, 0) > Version::new(1, 10));
        assert_eq!(Version::new(3, 4).cmp(&Version::new(3, 4)), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_negative_components_rejected() {
        assert!(matches!(
            Version::try_new(-1, 0),
            Err(MigrationError::InvalidVersion(_))
        ));
        assert!(matches!(
            Version::try_from((1_i64, -3_i64)),
            Err(MigrationError::InvalidVersion(_))
        ));
        assert_eq!(Version::try_new(4, 2).unwrap(), Version::new(4, 2));
    }

    #[test]
    fn test_display_and_parse() {
        let version = Version::new(12, 3);
        assert_eq!(version.to_string(), "12.3");
        assert_eq!("12.3".parse::<Version>().unwrap(), version);
        assert_eq!("7".parse::<Version>().unwrap(), Version::new(7, 0));
        assert!("1.x".parse::<Version>().is_err());
        assert!("-2.0".parse::<Version>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Version::new(2, 5)).unwrap();
        assert_eq!(json, "\"2.5\"");

        let parsed: Version = serde_json::from_str("\"2.5\"").unwrap();
        assert_eq!(parsed, Version::new(2, 5));
    }
}
