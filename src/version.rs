//! Firmware version numbers
//!
//! Versions are dotted integers (`3.11.2.5`) and always compare
//! component-wise as numbers, never as strings.

use std::cmp::Ordering;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, UpdateError};

/// Four dotted numeric components anywhere in a file name. `_` counts as a
/// word character, so the edges are "not a digit or dot" instead of `\b`.
static FILENAME_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^0-9.])(\d+\.\d+\.\d+\.\d+)(?:[^0-9.]|$)").expect("static regex")
});

/// Exactly a four-component version
static FULL_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+\.\d+$").expect("static regex"));

/// Numeric dotted version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    parts: Vec<u64>,
}

impl Version {
    /// Parse a dotted version with at least two numeric components
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let parts = trimmed
            .split('.')
            .map(|p| p.parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| UpdateError::InvalidVersionFormat(input.to_string()))?;

        if parts.len() < 2 {
            return Err(UpdateError::InvalidVersionFormat(input.to_string()));
        }

        Ok(Self { parts })
    }

    pub fn major(&self) -> u64 {
        self.parts[0]
    }

    pub fn minor(&self) -> u64 {
        self.parts[1]
    }

    /// `(major, minor)` pair used by the engine and boundary rules
    pub fn major_minor(&self) -> (u64, u64) {
        (self.parts[0], self.parts[1])
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .parts
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&joined)
    }
}

/// Pick the numerically highest version string. Unparsable entries are skipped.
pub fn max_version<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .filter_map(|v| Version::parse(v).ok().map(|parsed| (parsed, v)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, raw)| raw)
}

/// Find a `major.minor.patch.build` version inside a file name
pub fn extract_from_filename(name: &str) -> Option<String> {
    FILENAME_VERSION
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// True when the input is a full four-component version
pub fn is_full_version(input: &str) -> bool {
    FULL_VERSION.is_match(input.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ordering() {
        let a = Version::parse("3.9.5.2026").unwrap();
        let b = Version::parse("3.11.2.5").unwrap();
        assert!(a < b);
        assert!(Version::parse("2.99.9.9999").unwrap() < a);
    }

    #[test]
    fn test_max_version_is_numeric() {
        let versions = ["3.9.5.2026", "3.11.2.5", "2.99.9.9999"];
        assert_eq!(max_version(versions), Some("3.11.2.5"));
    }

    #[test]
    fn test_max_version_empty() {
        assert_eq!(max_version(Vec::<&str>::new()), None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("abc.def").is_err());
        assert!(Version::parse("3").is_err());
        assert!(Version::parse("3.x.1.2").is_err());
    }

    #[test]
    fn test_extract_from_filename() {
        assert_eq!(
            extract_from_filename("3.11.2.5_reMarkable2-qLFGoqPtPL.signed"),
            Some("3.11.2.5".to_string())
        );
        assert_eq!(
            extract_from_filename("remarkable-production-memfault-image-3.20.0.92-ferrari-public"),
            Some("3.20.0.92".to_string())
        );
        assert_eq!(extract_from_filename("firmware.swu"), None);
        assert_eq!(extract_from_filename("v3.11.swu"), None);
        assert_eq!(extract_from_filename("3.11.2.5.1_custom.swu"), None);
    }

    #[test]
    fn test_extract_from_vendor_file_names() {
        use crate::download::vendor_file_name;
        use crate::hardware::HardwareClass;

        for (hardware, version) in [
            (HardwareClass::Rm1, "2.15.1.1189"),
            (HardwareClass::Rm2, "3.11.2.5"),
        ] {
            let name = vendor_file_name(hardware, version, "abc");
            assert_eq!(extract_from_filename(&name), Some(version.to_string()), "{}", name);
        }
        assert_eq!(
            extract_from_filename("/tmp/updates/2.15.1.1189_reMarkable2-7fd7a0ab.signed"),
            Some("2.15.1.1189".to_string())
        );
    }

    #[test]
    fn test_is_full_version() {
        assert!(is_full_version("3.20.0.92"));
        assert!(!is_full_version("3.20"));
        assert!(!is_full_version("latest"));
        assert!(!is_full_version("3.20.0.92_x"));
        assert!(is_full_version(" 3.20.0.92 "));
    }

    #[test]
    fn test_display_roundtrips_input() {
        assert_eq!(Version::parse("3.22.0.64").unwrap().to_string(), "3.22.0.64");
    }
}
