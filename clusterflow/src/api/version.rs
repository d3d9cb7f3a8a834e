//! Cluster version parsing and floor comparisons.

use crate::errors::ClusterflowError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A `major.minor.patch` cluster version, optionally with a pre-release
/// suffix (`4.10.0-rc.1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterVersion {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
    /// Pre-release suffix without the leading dash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

impl ClusterVersion {
    /// Creates a release version.
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            suffix: None,
        }
    }

    /// Parses a version string.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterflowError::InvalidVersion`] if the string does not
    /// have three numeric components.
    pub fn parse(raw: &str) -> Result<Self, ClusterflowError> {
        let invalid = |reason: &str| ClusterflowError::InvalidVersion {
            version: raw.to_string(),
            reason: reason.to_string(),
        };

        let (core, suffix) = match raw.trim().split_once('-') {
            Some((core, suffix)) if !suffix.is_empty() => (core, Some(suffix.to_string())),
            Some(_) => return Err(invalid("empty pre-release suffix")),
            None => (raw.trim(), None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(invalid("expected major.minor.patch"));
        }

        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| invalid("components must be numeric"))?;
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            suffix,
        })
    }

    /// Returns the `major.minor` floor of this version, so that every patch
    /// release compares equal to its minor line.
    #[must_use]
    pub const fn minor_floor(&self) -> (u32, u32) {
        (self.major, self.minor)
    }

    /// Returns true if this version's minor line is at or above `floor`'s.
    #[must_use]
    pub fn at_least_minor(&self, floor: &Self) -> bool {
        self.minor_floor() >= floor.minor_floor()
    }

    /// Returns true if this version's minor line is strictly above `floor`'s.
    #[must_use]
    pub fn above_minor(&self, floor: &Self) -> bool {
        self.minor_floor() > floor.minor_floor()
    }
}

impl FromStr for ClusterVersion {
    type Err = ClusterflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(suffix) = &self.suffix {
            write!(f, "-{suffix}")?;
        }
        Ok(())
    }
}

impl PartialOrd for ClusterVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClusterVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.suffix, &other.suffix) {
                (None, None) => Ordering::Equal,
                // a pre-release sorts before its release
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}
