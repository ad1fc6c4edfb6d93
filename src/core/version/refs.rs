use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::value::Version;
use crate::core::error::{ModError, ModResult};

/// Stable identifier of a package (mod), independent of version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageRef(String);

impl PackageRef {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    /// Parse a package identifier, rejecting blank ones.
    pub fn parse(uid: &str) -> ModResult<Self> {
        let uid = uid.trim();
        if uid.is_empty() {
            return Err(ModError::parse("uid", "empty package identifier"));
        }
        Ok(Self(uid.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One end of a version interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

/// The version constraint half of a [`VersionRef`].
///
/// Supported formats:
///   `*` or empty      — any version
///   `1.0`             — exactly that version
///   `[1.0]`           — exactly that version
///   `[1.0,2.0)`       — Maven-style interval, either end may be open: `[1.0,)`, `(,2.0]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionReq {
    Any,
    Exact(Version),
    Range {
        lower: Option<Bound>,
        upper: Option<Bound>,
    },
}

impl VersionReq {
    pub fn parse(input: &str) -> ModResult<Self> {
        let raw = input.trim();
        if raw.is_empty() || raw == "*" {
            return Ok(VersionReq::Any);
        }

        let opens = raw.starts_with('[') || raw.starts_with('(');
        if !opens {
            return Ok(VersionReq::Exact(Version::parse(raw)?));
        }

        let lower_inclusive = raw.starts_with('[');
        let upper_inclusive = match raw.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => {
                return Err(ModError::parse(
                    "version",
                    format!("unterminated interval '{}'", raw),
                ))
            }
        };
        let inner = &raw[1..raw.len() - 1];

        let Some((low, high)) = inner.split_once(',') else {
            // `[1.0]` pins one version; `(1.0)` is meaningless.
            if lower_inclusive && upper_inclusive {
                return Ok(VersionReq::Exact(Version::parse(inner)?));
            }
            return Err(ModError::parse(
                "version",
                format!("single-version interval must be inclusive: '{}'", raw),
            ));
        };

        let bound = |text: &str, inclusive: bool| -> ModResult<Option<Bound>> {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            Ok(Some(Bound {
                version: Version::parse(text)?,
                inclusive,
            }))
        };

        Ok(VersionReq::Range {
            lower: bound(low, lower_inclusive)?,
            upper: bound(high, upper_inclusive)?,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionReq::Any => true,
            VersionReq::Exact(v) => v == version,
            VersionReq::Range { lower, upper } => {
                let above = lower.as_ref().map_or(true, |b| {
                    if b.inclusive {
                        version >= &b.version
                    } else {
                        version > &b.version
                    }
                });
                let below = upper.as_ref().map_or(true, |b| {
                    if b.inclusive {
                        version <= &b.version
                    } else {
                        version < &b.version
                    }
                });
                above && below
            }
        }
    }

    /// The single version this constraint pins, if it is exact.
    pub fn exact(&self) -> Option<&Version> {
        match self {
            VersionReq::Exact(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for VersionReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionReq::Any => f.write_str("*"),
            VersionReq::Exact(v) => write!(f, "{}", v),
            VersionReq::Range { lower, upper } => {
                match lower {
                    Some(b) => write!(f, "{}{}", if b.inclusive { '[' } else { '(' }, b.version)?,
                    None => f.write_str("(")?,
                }
                f.write_str(",")?;
                match upper {
                    Some(b) => write!(f, "{}{}", b.version, if b.inclusive { ']' } else { ')' }),
                    None => f.write_str(")"),
                }
            }
        }
    }
}

impl FromStr for VersionReq {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionReq::parse(s)
    }
}

impl Serialize for VersionReq {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionReq {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        VersionReq::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A package plus a version constraint; with an exact constraint it names
/// one published version and is the unit handed to the installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRef {
    pub package: PackageRef,
    pub req: VersionReq,
}

impl VersionRef {
    pub fn new(package: PackageRef, req: VersionReq) -> Self {
        Self { package, req }
    }

    pub fn exact(package: PackageRef, version: Version) -> Self {
        Self {
            package,
            req: VersionReq::Exact(version),
        }
    }

    pub fn any(package: PackageRef) -> Self {
        Self {
            package,
            req: VersionReq::Any,
        }
    }

    /// Does `(package, version)` satisfy this reference?
    pub fn is_satisfied_by(&self, package: &PackageRef, version: &Version) -> bool {
        &self.package == package && self.req.matches(version)
    }
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.package, self.req)
    }
}
