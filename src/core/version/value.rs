use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::error::{ModError, ModResult};

/// A parsed, totally ordered version value.
///
/// Supported formats are dot/dash/underscore separated sections where each
/// section is a number with an optional string suffix, or a bare string:
///   `1.7.10`
///   `2.0-beta3`
///   `1.0rc1`
///
/// Ordering rules:
///   - numbers compare numerically (`1.10 > 1.9`)
///   - a suffixed number sorts before the bare number (`1.0rc1 < 1.0`)
///   - a bare string section sorts before any numbered one (`1.0-beta < 1.0`)
///   - missing trailing sections count as `0` (`1.0 == 1.0.0`)
///
/// The canonical string is the trimmed input, so `parse(v.to_string()) == v`.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    sections: Vec<Section>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Section {
    /// `beta`, `rc1`, `SNAPSHOT`
    Text(String),
    /// `3rc1`: number followed by a pre-release style suffix
    Suffixed(u64, String),
    /// `3`
    Number(u64),
}

// Text < any numbered section; Suffixed(n) sorts between Number(n - 1) and Number(n).
impl Section {
    fn key(&self) -> (u8, u64, u8, &str) {
        match self {
            Section::Text(s) => (0, 0, 0, s.as_str()),
            Section::Suffixed(n, s) => (1, *n, 0, s.as_str()),
            Section::Number(n) => (1, *n, 1, ""),
        }
    }

    fn cmp_key(&self, other: &Section) -> Ordering {
        self.key().cmp(&other.key())
    }

    fn parse(raw: &str, full: &str) -> ModResult<Self> {
        if raw.is_empty() {
            return Err(ModError::parse(
                "version",
                format!("empty section in '{}'", full),
            ));
        }

        let digits_end = raw
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(raw.len());

        if digits_end == 0 {
            return Ok(Section::Text(raw.to_string()));
        }

        let number: u64 = raw[..digits_end].parse().map_err(|_| {
            ModError::parse("version", format!("numeric overflow in '{}'", full))
        })?;

        if digits_end == raw.len() {
            Ok(Section::Number(number))
        } else {
            Ok(Section::Suffixed(number, raw[digits_end..].to_string()))
        }
    }
}

static ZERO: Section = Section::Number(0);
const SEPARATORS: [char; 3] = ['.', '-', '_'];

impl Version {
    /// Parse a version string.
    pub fn parse(input: &str) -> ModResult<Self> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(ModError::parse("version", "empty version string"));
        }

        let sections = raw
            .split(SEPARATORS)
            .map(|s| Section::parse(s, raw))
            .collect::<ModResult<Vec<_>>>()?;

        Ok(Self {
            raw: raw.to_string(),
            sections,
        })
    }

    /// Keep an unparsable version string around so an invalid entity can
    /// still be named. Sorts as a single text section.
    pub(crate) fn opaque(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            sections: vec![Section::Text(raw.to_string())],
        }
    }

    /// Canonical string form (what the descriptor declared, trimmed).
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Sections with trailing zero sections removed; equal versions share it.
    fn normalized(&self) -> &[Section] {
        let mut end = self.sections.len();
        while end > 0 && self.sections[end - 1] == ZERO {
            end -= 1;
        }
        &self.sections[..end]
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.sections.len().max(other.sections.len());
        for i in 0..len {
            let a = self.sections.get(i).unwrap_or(&ZERO);
            let b = other.sections.get(i).unwrap_or(&ZERO);
            match a.cmp_key(b) {
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

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse(&raw).map_err(serde::de::Error::custom)
    }
}
