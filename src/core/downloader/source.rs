use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{ModError, ModResult};

/// How a download location must be used. Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadKind {
    /// A plain URL pointing at the file.
    Direct,
    /// Whitespace separated mirrors of the same file, any one will do.
    Parallel,
    /// A web page the user has to visit; cannot be fetched automatically.
    Browser,
}

impl DownloadKind {
    pub fn is_automatic(&self) -> bool {
        !matches!(self, DownloadKind::Browser)
    }
}

impl fmt::Display for DownloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadKind::Direct => write!(f, "direct"),
            DownloadKind::Parallel => write!(f, "parallel"),
            DownloadKind::Browser => write!(f, "browser"),
        }
    }
}

impl FromStr for DownloadKind {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(DownloadKind::Direct),
            "parallel" | "mirror" => Ok(DownloadKind::Parallel),
            "browser" | "manual" => Ok(DownloadKind::Browser),
            other => Err(ModError::parse(
                "downloadType",
                format!("unknown download type '{}'", other),
            )),
        }
    }
}

/// One declared download location for a version's artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSource {
    pub kind: DownloadKind,
    pub url: String,
    /// Declared file type (`jar`, `zip`, `litemod`), if any.
    pub hint: Option<String>,
}

impl DownloadSource {
    pub fn new(kind: DownloadKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Candidate URLs in try order. A mirror group expands to each mirror.
    pub fn urls(&self) -> Vec<&str> {
        match self.kind {
            DownloadKind::Parallel => self.url.split_whitespace().collect(),
            _ => vec![self.url.trim()],
        }
    }

    /// File extension: the hint if declared, else the last URL path segment's extension.
    pub fn extension(&self) -> Option<String> {
        if let Some(hint) = self.hint.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            return Some(hint.trim_start_matches('.').to_lowercase());
        }

        let first = self.urls().into_iter().next()?;
        let path = first.split(['?', '#']).next().unwrap_or(first);
        let path = path.split_once("://").map_or(path, |(_, rest)| rest);
        let (_, segment) = path.rsplit_once('/')?;
        let (stem, ext) = segment.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(ext.to_lowercase())
    }
}

/// Pick the download to use.
///
/// With a preferred kind, the first source of that kind wins. Otherwise, or
/// when nothing of that kind is declared, the best kind wins with
/// declaration order breaking ties.
pub fn select_best(
    sources: &[DownloadSource],
    preferred: Option<DownloadKind>,
) -> ModResult<&DownloadSource> {
    if let Some(kind) = preferred {
        if let Some(found) = sources.iter().find(|s| s.kind == kind) {
            debug!("Selected preferred {} source {}", kind, found.url);
            return Ok(found);
        }
    }

    // min_by_key keeps the first of equal keys.
    let best = sources
        .iter()
        .min_by_key(|s| s.kind)
        .ok_or_else(|| ModError::NotFound("no download sources declared".into()))?;

    debug!("Selected {} source {}", best.kind, best.url);
    Ok(best)
}
