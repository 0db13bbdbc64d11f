//! Version handling for pack descriptions.
//!
//! Pack releases carry semantic versions, optionally with build metadata
//! (`1.2.3+build7`). Ordering between two releases ignores the metadata;
//! the metadata is preserved so that callers can warn when two requirements
//! resolve to the same release but disagree on it.

use crate::error;
use semver::Version;
use std::cmp::Ordering;

type Result<T> = crate::Result<T>;

/// Parse a version string, tolerating the shortened `major.minor` and
/// `major` forms that appear in hand-written pack requirements.
pub fn parse_lenient(value: &str) -> Result<Version> {
    let value = value.trim();
    if let Ok(version) = Version::parse(value) {
        return Ok(version);
    }
    // Split optional pre-release/build suffixes off before padding.
    let (digits, suffix) = match value.find(['-', '+']) {
        Some(pos) => (&value[..pos], &value[pos..]),
        None => (value, ""),
    };
    let dots = digits.chars().filter(|c| *c == '.').count();
    let padded = match dots {
        0 => format!("{digits}.0.0{suffix}"),
        1 => format!("{digits}.0{suffix}"),
        _ => value.to_string(),
    };
    Version::parse(&padded).map_err(|e| {
        error::VersionParseSnafu {
            value: value.to_string(),
            reason: e.to_string(),
        }
        .build()
        .into()
    })
}

/// Compare two versions by precedence, ignoring build metadata.
pub fn compare_versions(a: &Version, b: &Version) -> Ordering {
    a.cmp_precedence(b)
}

/// A pack version requirement.
///
/// The textual forms are: empty (any version, latest preferred),
/// `<min>` (open-ended), and `<min>:<max>` (inclusive on both ends).
/// A fixed requirement is expressed as `<v>:<v>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionRange {
    pub min: Option<Version>,
    pub max: Option<Version>,
}

impl VersionRange {
    /// The unconstrained range.
    pub fn any() -> Self {
        Self::default()
    }

    /// A range matching exactly one version.
    pub fn exact(version: Version) -> Self {
        Self {
            min: Some(version.clone()),
            max: Some(version),
        }
    }

    /// An open-ended range starting at `version`.
    pub fn from_min(version: Version) -> Self {
        Self {
            min: Some(version),
            max: None,
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(Self::any());
        }
        match value.split_once(':') {
            None => Ok(Self::from_min(parse_lenient(value)?)),
            Some((min, max)) => {
                let range = Self {
                    min: Some(parse_lenient(min)?),
                    max: Some(parse_lenient(max)?),
                };
                if let (Some(min), Some(max)) = (&range.min, &range.max) {
                    if compare_versions(min, max) == Ordering::Greater {
                        return Err(error::VersionRangeParseSnafu {
                            value: value.to_string(),
                            reason: "minimum is greater than maximum".to_string(),
                        }
                        .build()
                        .into());
                    }
                }
                Ok(range)
            }
        }
    }

    pub fn is_any(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Whether the range represents a single fixed version.
    pub fn is_exact(&self) -> bool {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => compare_versions(min, max) == Ordering::Equal,
            _ => false,
        }
    }

    pub fn contains(&self, version: &Version) -> bool {
        if let Some(min) = &self.min {
            if compare_versions(version, min) == Ordering::Less {
                return false;
            }
        }
        if let Some(max) = &self.max {
            if compare_versions(version, max) == Ordering::Greater {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Display for VersionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.min, &self.max) {
            (None, None) => Ok(()),
            (Some(min), None) => write!(f, "{min}"),
            (Some(min), Some(max)) => write!(f, "{min}:{max}"),
            (None, Some(max)) => write!(f, ":{max}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_lenient_pads_short_versions() {
        assert_eq!(parse_lenient("1").unwrap(), Version::new(1, 0, 0));
        assert_eq!(parse_lenient("1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(parse_lenient("1.2.3").unwrap(), Version::new(1, 2, 3));
        assert_eq!(
            parse_lenient("5.9.0-dev1").unwrap().to_string(),
            "5.9.0-dev1"
        );
    }

    #[test]
    fn ordering_ignores_build_metadata() {
        let a = Version::parse("1.2.3+build7").unwrap();
        let b = Version::parse("1.2.3+build9").unwrap();
        assert_eq!(compare_versions(&a, &b), Ordering::Equal);
    }

    #[test]
    fn range_forms() {
        let any = VersionRange::parse("").unwrap();
        assert!(any.is_any());
        assert!(any.contains(&Version::new(0, 0, 1)));

        let open = VersionRange::parse("5.5.0").unwrap();
        assert!(open.contains(&Version::new(5, 5, 0)));
        assert!(open.contains(&Version::new(6, 0, 0)));
        assert!(!open.contains(&Version::new(5, 4, 9)));

        let closed = VersionRange::parse("1.0.0:1.9.9").unwrap();
        assert!(closed.contains(&Version::new(1, 5, 0)));
        assert!(!closed.contains(&Version::new(2, 0, 0)));

        let exact = VersionRange::exact(Version::new(1, 2, 3));
        assert!(exact.is_exact());
        assert!(exact.contains(&Version::new(1, 2, 3)));
        assert!(!exact.contains(&Version::new(1, 2, 4)));
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        assert!(VersionRange::parse("2.0.0:1.0.0").is_err());
    }

    #[test]
    fn pre_release_is_below_release() {
        let range = VersionRange::parse("1.0.0").unwrap();
        assert!(!range.contains(&Version::parse("1.0.0-rc1").unwrap()));
    }
}
