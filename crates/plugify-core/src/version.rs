//! Semantic versions for extensions.
//!
//! A version is a `major.minor.patch` triple with an optional pre-release
//! tag and build metadata. Precedence follows semver: numeric fields
//! first, a pre-release sorts below its plain release, build metadata
//! never participates in ordering.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from version and constraint parsing
#[derive(Debug, Clone, Error)]
pub enum VersionError {
    /// Invalid version format
    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    /// Invalid constraint format
    #[error("Invalid constraint format: {0}")]
    InvalidConstraint(String),
}

/// Semantic version (MAJOR.MINOR.PATCH with optional pre-release and build)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl Version {
    /// Create a new version without pre-release or build metadata
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Parse a version literal such as `1.4.0-rc.2+build.7`.
    ///
    /// Stricter than a plain numeric split: components may not carry
    /// leading zeros, pre-release and build tags are limited to
    /// dot-separated ASCII alphanumerics and hyphens, and trailing
    /// garbage is rejected. A leading `v` is tolerated.
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let mut cursor = Cursor::new(input.trim());
        cursor.eat('v');

        let major = cursor.component("major")?;
        cursor.dot()?;
        let minor = cursor.component("minor")?;
        cursor.dot()?;
        let patch = cursor.component("patch")?;

        let prerelease = if cursor.eat('-') {
            Some(cursor.identifiers("pre-release")?)
        } else {
            None
        };
        let build = if cursor.eat('+') {
            Some(cursor.identifiers("build")?)
        } else {
            None
        };
        cursor.end()?;

        Ok(Version {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }

    /// Check if this is a prerelease version
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }
}

/// Consumes a version literal left to right.
struct Cursor<'a> {
    rest: &'a str,
    full: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor { rest: text, full: text }
    }

    fn error(&self, detail: impl fmt::Display) -> VersionError {
        VersionError::InvalidVersion(format!("{} in '{}'", detail, self.full))
    }

    /// Consume `c` if it is next.
    fn eat(&mut self, c: char) -> bool {
        match self.rest.strip_prefix(c) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn dot(&mut self) -> Result<(), VersionError> {
        if self.eat('.') {
            Ok(())
        } else {
            Err(self.error("expected '.'"))
        }
    }

    /// One numeric component, no leading zeros.
    fn component(&mut self, what: &str) -> Result<u64, VersionError> {
        let end = self
            .rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.rest.len());
        let (digits, rest) = self.rest.split_at(end);

        if digits.is_empty() {
            return Err(self.error(format_args!("missing {} component", what)));
        }
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(self.error(format_args!("leading zero in {} component", what)));
        }

        self.rest = rest;
        digits
            .parse()
            .map_err(|_| self.error(format_args!("{} component out of range", what)))
    }

    /// A dot-separated identifier tag, running up to the next `+` or the
    /// end of input.
    fn identifiers(&mut self, what: &str) -> Result<String, VersionError> {
        let end = self.rest.find('+').unwrap_or(self.rest.len());
        let (tag, rest) = self.rest.split_at(end);

        let malformed = tag.split('.').any(|part| {
            part.is_empty()
                || !part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        });
        if malformed {
            return Err(self.error(format_args!("malformed {} tag", what)));
        }

        self.rest = rest;
        Ok(tag.to_string())
    }

    fn end(&self) -> Result<(), VersionError> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                // A pre-release sorts below its release; build metadata
                // never participates
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}
