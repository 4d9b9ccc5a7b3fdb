//! Version constraints over [`Version`].
//!
//! A constraint is a union of comparator sets: sets are separated by `||`,
//! comparators within a set are whitespace-separated and all must hold.
//! `">=1.2.0 <2.0.0 || =3.0.0"` matches anything in [1.2.0, 2.0.0) plus
//! exactly 3.0.0.

use crate::version::{Version, VersionError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a single comparator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Exact version (=1.2.3 or bare 1.2.3)
    Exact,

    /// Anything but this version (!=1.2.3)
    NotEqual,

    /// Greater than (>1.2.3)
    Greater,

    /// Greater than or equal (>=1.2.3)
    GreaterEq,

    /// Less than (<1.2.3)
    Less,

    /// Less than or equal (<=1.2.3)
    LessEq,

    /// Compatible with the same major (~>1.2.3 → >=1.2.3 <2.0.0)
    Compatible,
}

/// A single operator + version pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    pub op: Op,
    pub version: Version,
}

impl Comparator {
    fn parse(s: &str) -> Result<Self, VersionError> {
        // Longest operators first so ">=" never parses as ">"
        let table: &[(&str, Op)] = &[
            ("~>", Op::Compatible),
            (">=", Op::GreaterEq),
            ("<=", Op::LessEq),
            ("!=", Op::NotEqual),
            (">", Op::Greater),
            ("<", Op::Less),
            ("=", Op::Exact),
        ];

        for (prefix, op) in table {
            if let Some(rest) = s.strip_prefix(prefix) {
                let version = Version::parse(rest.trim())?;
                return Ok(Comparator { op: *op, version });
            }
        }

        // Default: exact version
        let version = Version::parse(s)?;
        Ok(Comparator {
            op: Op::Exact,
            version,
        })
    }

    /// Check if a version satisfies this comparator
    pub fn matches(&self, version: &Version) -> bool {
        let v = &self.version;
        match self.op {
            Op::Exact => {
                version.major == v.major
                    && version.minor == v.minor
                    && version.patch == v.patch
                    && version.prerelease == v.prerelease
            }
            Op::NotEqual => {
                version.major != v.major
                    || version.minor != v.minor
                    || version.patch != v.patch
                    || version.prerelease != v.prerelease
            }
            Op::Greater => version > v,
            Op::GreaterEq => version >= v,
            Op::Less => version < v,
            Op::LessEq => version <= v,
            Op::Compatible => version >= v && version.major == v.major,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            Op::Exact => "=",
            Op::NotEqual => "!=",
            Op::Greater => ">",
            Op::GreaterEq => ">=",
            Op::Less => "<",
            Op::LessEq => "<=",
            Op::Compatible => "~>",
        };
        write!(f, "{}{}", op, self.version)
    }
}

/// Union of comparator sets over [`Version`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    /// Each inner vec is a conjunction; the outer vec is a union.
    /// An empty conjunction matches everything (`*`).
    sets: Vec<Vec<Comparator>>,
}

impl Constraint {
    /// Constraint matching any version (`*`)
    pub fn any() -> Self {
        Constraint { sets: vec![vec![]] }
    }

    /// Constraint matching exactly one version
    pub fn exact(version: Version) -> Self {
        Constraint {
            sets: vec![vec![Comparator {
                op: Op::Exact,
                version,
            }]],
        }
    }

    /// Parse a constraint string
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Constraint::any());
        }

        let mut sets = Vec::new();
        for part in s.split("||") {
            let part = part.trim();
            if part == "*" || part.is_empty() {
                sets.push(vec![]);
                continue;
            }
            let mut comparators = Vec::new();
            for token in part.split_whitespace() {
                comparators.push(Comparator::parse(token)?);
            }
            sets.push(comparators);
        }

        if sets.is_empty() {
            return Err(VersionError::InvalidConstraint(s.to_string()));
        }

        Ok(Constraint { sets })
    }

    /// Check if a version satisfies this constraint
    pub fn satisfied_by(&self, version: &Version) -> bool {
        self.sets
            .iter()
            .any(|set| set.iter().all(|c| c.matches(version)))
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first_set = true;
        for set in &self.sets {
            if !first_set {
                write!(f, " || ")?;
            }
            first_set = false;

            if set.is_empty() {
                write!(f, "*")?;
                continue;
            }
            let mut first = true;
            for comparator in set {
                if !first {
                    write!(f, " ")?;
                }
                first = false;
                write!(f, "{}", comparator)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Constraint {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Constraint::parse(s)
    }
}

impl Serialize for Constraint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Constraint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Constraint::parse(&s).map_err(serde::de::Error::custom)
    }
}
