//! Four-part plugin and host versions (`major.minor.revision.build`, optionally beta).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::IcyError;

const BETA_MARKER: &str = "beta";

/// A plugin or host version.
///
/// Ordering is numeric on the four components; for identical numbers a beta
/// sorts below the matching release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
    pub build: u32,
    pub beta: bool,
}

impl Version {
    pub const fn new(major: u32, minor: u32, revision: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            revision,
            build,
            beta: false,
        }
    }

    pub const fn with_beta(mut self, beta: bool) -> Self {
        self.beta = beta;
        self
    }

    /// `0.0.0.0`, used for "no requirement".
    pub fn is_empty(&self) -> bool {
        *self == Version::default()
    }

    pub fn is_beta(&self) -> bool {
        self.beta
    }

    pub fn is_lower(&self, other: &Version) -> bool {
        self < other
    }

    pub fn is_lower_or_equal(&self, other: &Version) -> bool {
        self <= other
    }

    pub fn is_greater(&self, other: &Version) -> bool {
        self > other
    }

    pub fn is_greater_or_equal(&self, other: &Version) -> bool {
        self >= other
    }

    fn numbers(&self) -> [u32; 4] {
        [self.major, self.minor, self.revision, self.build]
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.numbers()
            .cmp(&other.numbers())
            .then_with(|| other.beta.cmp(&self.beta))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = IcyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Version::default());
        }

        let lower = trimmed.to_ascii_lowercase();
        let (numbers, beta) = match lower.strip_suffix(BETA_MARKER) {
            Some(rest) => (rest.trim_end_matches([' ', '-', '.', '_']), true),
            None => (lower.as_str(), false),
        };

        let parts: Vec<&str> = numbers.split('.').collect();
        if parts.len() > 4 {
            return Err(IcyError::InvalidVersion(s.to_string()));
        }

        let mut values = [0u32; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part
                .trim()
                .parse()
                .map_err(|_| IcyError::InvalidVersion(s.to_string()))?;
        }

        Ok(Version {
            major: values[0],
            minor: values[1],
            revision: values[2],
            build: values[3],
            beta,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.revision, self.build
        )?;
        if self.beta {
            write!(f, " {BETA_MARKER}")?;
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
