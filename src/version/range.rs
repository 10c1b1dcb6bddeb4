//! Version ranges and constraints.

use std::fmt;
use std::str::FromStr;

use super::{Version, VersionError};

/// One end of a version range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

/// An interval of versions, e.g. `[1.0,2.0)`.
///
/// A missing lower or upper bound leaves that side open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    lower: Option<Bound>,
    upper: Option<Bound>,
}

impl VersionRange {
    /// Parse one range in bracket notation.
    pub fn parse(range: &str) -> Result<Self, VersionError> {
        let invalid = |reason: &str| VersionError::InvalidRange {
            range: range.to_string(),
            reason: reason.to_string(),
        };

        let text = range.trim();
        let lower_inclusive = match text.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => return Err(invalid("must start with '[' or '('")),
        };
        let upper_inclusive = match text.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(invalid("must end with ']' or ')'")),
        };
        if text.len() < 2 {
            return Err(invalid("missing bounds"));
        }
        let inner = &text[1..text.len() - 1];

        let Some((low, high)) = inner.split_once(',') else {
            if !lower_inclusive || !upper_inclusive {
                return Err(invalid("a single version must be enclosed in '[' and ']'"));
            }
            let version = Version::parse(inner).map_err(|e| invalid(&e.to_string()))?;
            return Ok(Self::exact(version));
        };

        if high.contains(',') {
            return Err(invalid("a range takes at most two bounds"));
        }

        let parse_bound = |text: &str, inclusive: bool| -> Result<Option<Bound>, VersionError> {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            let version = Version::parse(text).map_err(|e| invalid(&e.to_string()))?;
            Ok(Some(Bound { version, inclusive }))
        };

        let lower = parse_bound(low, lower_inclusive)?;
        let upper = parse_bound(high, upper_inclusive)?;

        if let (Some(lo), Some(hi)) = (&lower, &upper) {
            if lo.version > hi.version {
                return Err(invalid("lower bound exceeds upper bound"));
            }
            if lo.version == hi.version && !(lo.inclusive && hi.inclusive) {
                return Err(invalid("range is empty"));
            }
        }

        Ok(Self { lower, upper })
    }

    /// A range matching exactly one version.
    pub fn exact(version: Version) -> Self {
        Self {
            lower: Some(Bound {
                version: version.clone(),
                inclusive: true,
            }),
            upper: Some(Bound {
                version,
                inclusive: true,
            }),
        }
    }

    pub fn new(lower: Option<Bound>, upper: Option<Bound>) -> Self {
        Self { lower, upper }
    }

    pub fn lower(&self) -> Option<&Bound> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Bound> {
        self.upper.as_ref()
    }

    pub fn contains_version(&self, version: &Version) -> bool {
        if let Some(lo) = &self.lower {
            let ok = if lo.inclusive {
                version >= &lo.version
            } else {
                version > &lo.version
            };
            if !ok {
                return false;
            }
        }
        if let Some(hi) = &self.upper {
            let ok = if hi.inclusive {
                version <= &hi.version
            } else {
                version < &hi.version
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionRange::parse(s)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let (Some(lo), Some(hi)) = (&self.lower, &self.upper) {
            if lo.inclusive && hi.inclusive && lo.version == hi.version {
                return write!(f, "[{}]", lo.version);
            }
        }
        match &self.lower {
            Some(lo) if lo.inclusive => write!(f, "[{}", lo.version)?,
            Some(lo) => write!(f, "({}", lo.version)?,
            None => write!(f, "(")?,
        }
        write!(f, ",")?;
        match &self.upper {
            Some(hi) if hi.inclusive => write!(f, "{}]", hi.version),
            Some(hi) => write!(f, "{})", hi.version),
            None => write!(f, ")"),
        }
    }
}

/// A version requirement: a preferred version, a set of ranges, or both.
///
/// Ranges make a constraint "hard". A constraint without ranges accepts
/// every version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionConstraint {
    ranges: Vec<VersionRange>,
    version: Option<Version>,
}

impl VersionConstraint {
    /// Parse either a plain version (`1.2`) or a list of ranges (`[1,2),[3,)`).
    pub fn parse(constraint: &str) -> Result<Self, VersionError> {
        let text = constraint.trim();
        if !(text.starts_with('[') || text.starts_with('(')) {
            return Ok(Self::soft(Version::parse(text)?));
        }

        let mut ranges = Vec::new();
        let mut rest = text;
        while rest.starts_with('[') || rest.starts_with('(') {
            let close = rest
                .find([']', ')'])
                .ok_or_else(|| VersionError::InvalidConstraint {
                    constraint: constraint.to_string(),
                    reason: "unterminated range".to_string(),
                })?;
            let (range, tail) = rest.split_at(close + 1);
            ranges.push(VersionRange::parse(range)?);
            rest = tail.trim_start();
            if let Some(tail) = rest.strip_prefix(',') {
                rest = tail.trim_start();
            }
        }

        if !rest.is_empty() {
            return Err(VersionError::InvalidConstraint {
                constraint: constraint.to_string(),
                reason: format!("unexpected trailing text '{}'", rest),
            });
        }

        Ok(Self::hard(ranges))
    }

    /// A soft constraint on a preferred version.
    pub fn soft(version: Version) -> Self {
        Self {
            ranges: Vec::new(),
            version: Some(version),
        }
    }

    /// A hard constraint made of explicit ranges.
    pub fn hard(ranges: Vec<VersionRange>) -> Self {
        Self {
            ranges,
            version: None,
        }
    }

    pub fn ranges(&self) -> &[VersionRange] {
        &self.ranges
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn is_hard(&self) -> bool {
        !self.ranges.is_empty()
    }

    pub fn contains_version(&self, version: &Version) -> bool {
        self.ranges.is_empty() || self.ranges.iter().any(|r| r.contains_version(version))
    }
}

impl FromStr for VersionConstraint {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionConstraint::parse(s)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ranges.is_empty() {
            return match &self.version {
                Some(version) => write!(f, "{}", version),
                None => Ok(()),
            };
        }
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", range)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_range_bounds() {
        let range = VersionRange::parse("[1.0,2.0)").unwrap();
        assert!(range.contains_version(&v("1.0")));
        assert!(range.contains_version(&v("1.9.9")));
        assert!(!range.contains_version(&v("2.0")));
        assert!(!range.contains_version(&v("0.9")));
    }

    #[test]
    fn test_open_ended_ranges() {
        let range = VersionRange::parse("[1.5,)").unwrap();
        assert!(range.contains_version(&v("100")));
        assert!(!range.contains_version(&v("1.4")));

        let range = VersionRange::parse("(,1.0]").unwrap();
        assert!(range.contains_version(&v("0.1")));
        assert!(range.contains_version(&v("1.0")));
        assert!(!range.contains_version(&v("1.0.1")));
    }

    #[test]
    fn test_exact_range() {
        let range = VersionRange::parse("[1.2]").unwrap();
        assert!(range.contains_version(&v("1.2.0")));
        assert!(!range.contains_version(&v("1.2.1")));
        assert_eq!(range.to_string(), "[1.2]");
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(VersionRange::parse("1.0").is_err());
        assert!(VersionRange::parse("[2.0,1.0]").is_err());
        assert!(VersionRange::parse("(1.0)").is_err());
        assert!(VersionRange::parse("[1.0,1.0)").is_err());
        assert!(VersionRange::parse("[1,2,3]").is_err());
    }

    #[test]
    fn test_range_display_round_trips_syntax() {
        for text in ["[1.0,2.0)", "(1.0,2.0]", "[1.0,)", "(,2.0)"] {
            assert_eq!(VersionRange::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_soft_constraint_accepts_anything() {
        let constraint = VersionConstraint::parse("1.2").unwrap();
        assert!(!constraint.is_hard());
        assert_eq!(constraint.version(), Some(&v("1.2")));
        assert!(constraint.contains_version(&v("7")));
    }

    #[test]
    fn test_multi_range_constraint() {
        let constraint = VersionConstraint::parse("[1,2), [3,)").unwrap();
        assert!(constraint.is_hard());
        assert_eq!(constraint.ranges().len(), 2);
        assert!(constraint.contains_version(&v("1.5")));
        assert!(!constraint.contains_version(&v("2.5")));
        assert!(constraint.contains_version(&v("3.1")));
        assert_eq!(constraint.to_string(), "[1,2),[3,)");
    }

    #[test]
    fn test_constraint_trailing_garbage_rejected() {
        assert!(VersionConstraint::parse("[1,2) junk").is_err());
        assert!(VersionConstraint::parse("[1,2").is_err());
    }
}
