use std::fmt;
use std::str::FromStr;

use semver::{Version, VersionReq};

/// Error type for version constraint parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("Invalid version '{input}': {message}")]
    InvalidVersion { input: String, message: String },
    #[error("Invalid version constraint '{input}': {message}")]
    InvalidConstraint { input: String, message: String },
}

/// Parses a plain semantic version such as `1.2.3`.
pub fn parse_version(input: &str) -> Result<Version, VersionError> {
    Version::parse(input.trim()).map_err(|e| VersionError::InvalidVersion {
        input: input.to_string(),
        message: e.to_string(),
    })
}

/// Represents a version requirement range using semver constraints.
#[derive(Debug, Clone)]
pub struct VersionRange {
    /// The original constraint string (e.g., "^1.2.3", ">=2.0")
    constraint: String,
    req: VersionReq,
}

impl VersionRange {
    /// Creates a new version range from a constraint string.
    pub fn from_constraint(constraint: &str) -> Result<Self, VersionError> {
        let trimmed = constraint.trim();
        let req = VersionReq::parse(trimmed).map_err(|e| VersionError::InvalidConstraint {
            input: constraint.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            constraint: trimmed.to_string(),
            req,
        })
    }

    /// Checks if a specific `semver::Version` satisfies this range.
    pub fn includes(&self, version: &Version) -> bool {
        self.req.matches(version)
    }

    pub fn semver_req(&self) -> &VersionReq {
        &self.req
    }

    /// Returns the original constraint string.
    pub fn constraint_string(&self) -> &str {
        &self.constraint
    }
}

// Two ranges are equal when they were written the same way.
impl PartialEq for VersionRange {
    fn eq(&self, other: &Self) -> bool {
        self.constraint == other.constraint
    }
}

impl Eq for VersionRange {}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constraint)
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionRange::from_constraint(s)
    }
}
