//! Version ordering and version constraints.
//!
//! Versions are compared item by item after splitting on separators and
//! digit/letter transitions. Trailing zero and release items do not affect
//! ordering, so `1.0` and `1` are the same version.

mod range;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub use range::{Bound, VersionConstraint, VersionRange};

/// Errors raised while parsing versions, ranges and constraints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Invalid version '{0}': version must not be empty")]
    EmptyVersion(String),

    #[error("Invalid version range '{range}': {reason}")]
    InvalidRange { range: String, reason: String },

    #[error("Invalid version constraint '{constraint}': {reason}")]
    InvalidConstraint { constraint: String, reason: String },
}

/// Rank of the implicit release qualifier. Missing items compare as this.
const RELEASE_RANK: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Item {
    /// Decimal digits without leading zeros ("0" for zero).
    Number(String),
    /// Lowercased qualifier, with aliases folded to one spelling.
    Qualifier(String),
}

impl Item {
    fn number(digits: &str) -> Self {
        let trimmed = digits.trim_start_matches('0');
        if trimmed.is_empty() {
            Item::Number("0".to_string())
        } else {
            Item::Number(trimmed.to_string())
        }
    }

    fn qualifier(text: &str) -> Self {
        let canonical = match text {
            "a" => "alpha",
            "b" => "beta",
            "m" => "milestone",
            "cr" => "rc",
            "ga" | "final" | "release" => "",
            other => other,
        };
        Item::Qualifier(canonical.to_string())
    }

    /// Compares this item against the implicit item used to pad the shorter version.
    fn cmp_to_padding(&self) -> Ordering {
        match self {
            Item::Number(digits) if digits == "0" => Ordering::Equal,
            Item::Number(_) => Ordering::Greater,
            Item::Qualifier(q) => qualifier_rank(q).cmp(&RELEASE_RANK),
        }
    }
}

fn qualifier_rank(qualifier: &str) -> u8 {
    match qualifier {
        "alpha" => 0,
        "beta" => 1,
        "milestone" => 2,
        "rc" => 3,
        "snapshot" => 4,
        "" => RELEASE_RANK,
        "sp" => 6,
        _ => 7,
    }
}

fn cmp_digits(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn cmp_items(a: Option<&Item>, b: Option<&Item>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(x), None) => x.cmp_to_padding(),
        (None, Some(y)) => y.cmp_to_padding().reverse(),
        (Some(Item::Number(x)), Some(Item::Number(y))) => cmp_digits(x, y),
        (Some(Item::Number(_)), Some(Item::Qualifier(_))) => Ordering::Greater,
        (Some(Item::Qualifier(_)), Some(Item::Number(_))) => Ordering::Less,
        (Some(Item::Qualifier(x)), Some(Item::Qualifier(y))) => qualifier_rank(x)
            .cmp(&qualifier_rank(y))
            .then_with(|| x.cmp(y)),
    }
}

/// A totally ordered version value.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    items: Vec<Item>,
}

impl Version {
    /// Parse a version string. Only empty strings are rejected.
    pub fn parse(version: &str) -> Result<Self, VersionError> {
        let raw = version.trim();
        if raw.is_empty() {
            return Err(VersionError::EmptyVersion(version.to_string()));
        }

        let mut items = Vec::new();
        let mut current = String::new();
        let mut digits = false;

        for c in raw.chars() {
            if matches!(c, '.' | '-' | '_') {
                flush(&mut items, &mut current, digits);
                continue;
            }
            let is_digit = c.is_ascii_digit();
            if !current.is_empty() && is_digit != digits {
                flush(&mut items, &mut current, digits);
            }
            digits = is_digit;
            current.push(c.to_ascii_lowercase());
        }
        flush(&mut items, &mut current, digits);

        while items
            .last()
            .is_some_and(|item| item.cmp_to_padding() == Ordering::Equal)
        {
            items.pop();
        }

        Ok(Self {
            raw: raw.to_string(),
            items,
        })
    }

    /// The version exactly as it was written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn flush(items: &mut Vec<Item>, current: &mut String, digits: bool) {
    if current.is_empty() {
        return;
    }
    if digits {
        items.push(Item::number(current));
    } else {
        items.push(Item::qualifier(current));
    }
    current.clear();
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.items.len().max(other.items.len());
        for i in 0..len {
            match cmp_items(self.items.get(i), other.items.get(i)) {
                Ordering::Equal => {}
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

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}
