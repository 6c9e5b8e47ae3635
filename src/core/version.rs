use super::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A schema version of the migrated data set.
///
/// Versions are written `major[.minor[.patch]]`; missing components default
/// to zero so `"1.2"` and `"1.2.0"` are the same version. Ordering is
/// numeric per component, so `1.10.0 > 1.9.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parses a version string, rejecting qualifiers and empty components.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(MigrateError::InvalidVersion(
                "version string is empty".to_string(),
            ));
        }

        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() > 3 {
            return Err(MigrateError::InvalidVersion(format!(
                "'{}' has more than three components",
                input
            )));
        }

        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(parts.iter()) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(MigrateError::InvalidVersion(format!(
                    "'{}' is not a numeric version (expected e.g. 1.2.0)",
                    input
                )));
            }
            *slot = part.parse::<u32>().map_err(|_| {
                MigrateError::InvalidVersion(format!("component '{}' in '{}' is out of range", part, input))
            })?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }

    /// The `major.minor.0` release line this version belongs to.
    pub fn release_line(&self) -> Self {
        Self::new(self.major, self.minor, 0)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SchemaVersion {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = MigrateError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SchemaVersion> for String {
    fn from(version: SchemaVersion) -> Self {
        version.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_and_short_forms() {
        assert_eq!(SchemaVersion::parse("1.2.3").unwrap(), SchemaVersion::new(1, 2, 3));
        assert_eq!(SchemaVersion::parse("1.2").unwrap(), SchemaVersion::new(1, 2, 0));
        assert_eq!(SchemaVersion::parse(" 2 ").unwrap(), SchemaVersion::new(2, 0, 0));
    }

    #[test]
    fn test_ordering_is_numeric_not_lexical() {
        let v19 = SchemaVersion::parse("1.9.0").unwrap();
        let v110 = SchemaVersion::parse("1.10.0").unwrap();
        assert!(v110 > v19);
        assert!(SchemaVersion::parse("2.0.0").unwrap() > SchemaVersion::parse("1.99.99").unwrap());
    }

    #[test]
    fn test_rejects_malformed_versions() {
        for bad in ["", "abc", "1..2", "1.2.3.4", "1.2.0-SNAPSHOT", "-1.0", "1.x"] {
            let err = SchemaVersion::parse(bad).unwrap_err();
            assert!(matches!(err, MigrateError::InvalidVersion(_)), "{bad}");
        }
    }

    #[test]
    fn test_serde_uses_string_form() {
        let version = SchemaVersion::new(2, 2, 0);
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"2.2.0\"");
        let back: SchemaVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, version);
        assert!(serde_json::from_str::<SchemaVersion>("\"nope\"").is_err());
    }
}
