use std::fmt;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::core::error::{ModError, ModResult};

/// Content hash algorithm. Descriptors without a declared kind use SHA-1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    #[default]
    Sha1,
    Sha256,
    Md5,
}

impl ChecksumKind {
    /// Length of the hex digest.
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumKind::Sha1 => 40,
            ChecksumKind::Sha256 => 64,
            ChecksumKind::Md5 => 32,
        }
    }

    pub fn digest(&self, bytes: &[u8]) -> String {
        match self {
            ChecksumKind::Sha1 => hex::encode(Sha1::digest(bytes)),
            ChecksumKind::Sha256 => hex::encode(Sha256::digest(bytes)),
            ChecksumKind::Md5 => hex::encode(Md5::digest(bytes)),
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumKind::Sha1 => write!(f, "sha1"),
            ChecksumKind::Sha256 => write!(f, "sha256"),
            ChecksumKind::Md5 => write!(f, "md5"),
        }
    }
}

impl FromStr for ChecksumKind {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "").as_str() {
            "sha1" => Ok(ChecksumKind::Sha1),
            "sha256" => Ok(ChecksumKind::Sha256),
            "md5" => Ok(ChecksumKind::Md5),
            other => Err(ModError::parse(
                "checksumType",
                format!("unsupported checksum algorithm '{}'", other),
            )),
        }
    }
}

/// An expected content hash, stored as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub kind: ChecksumKind,
    pub value: String,
}

impl Checksum {
    pub fn parse(kind: ChecksumKind, value: &str) -> ModResult<Self> {
        let value = value.trim().to_lowercase();
        if value.len() != kind.hex_len() || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ModError::parse(
                "checksum",
                format!("'{}' is not a {} hex digest", value, kind),
            ));
        }
        Ok(Self { kind, value })
    }

    pub fn sha1(value: &str) -> ModResult<Self> {
        Self::parse(ChecksumKind::Sha1, value)
    }

    /// Hash `bytes` with the same algorithm.
    pub fn compute(&self, bytes: &[u8]) -> String {
        self.kind.digest(bytes)
    }

    pub fn matches(&self, bytes: &[u8]) -> bool {
        self.compute(bytes) == self.value
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}
