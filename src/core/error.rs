use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the resolver/installer core.
/// Every module returns `Result<T, ModError>`.
#[derive(Debug, Error)]
pub enum ModError {
    // ── Descriptor ──────────────────────────────────────
    #[error("Parse error in {field}: {message}")]
    Parse { field: String, message: String },

    #[error("Refusing to install invalid entity {0}")]
    InvalidEntity(String),

    // ── Lookup ──────────────────────────────────────────
    #[error("Not found: {0}")]
    NotFound(String),

    // ── Integrity ───────────────────────────────────────
    #[error("Checksum mismatch for {path:?}: expected {expected}, got {actual}")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // ── Network ─────────────────────────────────────────
    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    // ── Install ─────────────────────────────────────────
    #[error("Dependency unsatisfied for {dependent}: {missing}")]
    DependencyUnsatisfied { dependent: String, missing: String },

    #[error("Placement failed at {path:?}: {message}")]
    Placement { path: PathBuf, message: String },

    #[error("Install of {0} was cancelled")]
    Cancelled(String),

    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Archive ─────────────────────────────────────────
    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type ModResult<T> = Result<T, ModError>;

impl ModError {
    pub fn parse(field: impl Into<String>, message: impl Into<String>) -> Self {
        ModError::Parse {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ModError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the caller may retry the same operation (possibly from another source).
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModError::Transport { .. } | ModError::Http(_) | ModError::Integrity { .. }
        )
    }
}

impl From<std::io::Error> for ModError {
    fn from(source: std::io::Error) -> Self {
        ModError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}
