use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::downloader::DownloadKind;
use crate::core::error::{ModError, ModResult};
use crate::core::http::APP_USER_AGENT;

const APP_DIR_NAME: &str = "QuickMod";
const SETTINGS_FILE: &str = "quickmod_settings.json";

fn default_concurrency() -> usize {
    8
}

fn default_user_agent() -> String {
    APP_USER_AGENT.to_string()
}

/// Resolver settings, stored as `quickmod_settings.json` in the data dir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverSettings {
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub preferred_download_kind: Option<DownloadKind>,
    /// Max parallel library fetches.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl ResolverSettings {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            cache_dir: data_dir.join("cache"),
            preferred_download_kind: None,
            concurrency: default_concurrency(),
            user_agent: default_user_agent(),
        }
    }

    /// Load from `data_dir`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not read {:?}: {}, using defaults", path, e);
                }
                return Self::with_data_dir(data_dir);
            }
        };

        match serde_json::from_str::<Self>(&raw) {
            Ok(mut settings) => {
                if settings.concurrency == 0 {
                    settings.concurrency = 1;
                }
                settings
            }
            Err(e) => {
                warn!("Corrupt settings at {:?}: {}, using defaults", path, e);
                Self::with_data_dir(data_dir)
            }
        }
    }

    pub fn save(&self, data_dir: &Path) -> ModResult<()> {
        std::fs::create_dir_all(data_dir).map_err(|e| ModError::io(data_dir, e))?;
        let path = data_dir.join(SETTINGS_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|e| ModError::io(path, e))
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::with_data_dir(&default_data_dir())
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = ResolverSettings::load(dir.path());
        assert_eq!(settings.cache_dir, dir.path().join("cache"));
        assert_eq!(settings.concurrency, 8);
        assert_eq!(settings.preferred_download_kind, None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let mut settings = ResolverSettings::with_data_dir(dir.path());
        settings.preferred_download_kind = Some(DownloadKind::Parallel);
        settings.concurrency = 2;
        settings.save(dir.path()).unwrap();

        assert_eq!(ResolverSettings::load(dir.path()), settings);
    }

    #[test]
    fn corrupt_file_falls_back() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "[not settings").unwrap();
        assert_eq!(
            ResolverSettings::load(dir.path()),
            ResolverSettings::with_data_dir(dir.path())
        );
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{ "cache_dir": "/tmp/qm", "preferred_download_kind": "direct" }"#,
        )
        .unwrap();
        let settings = ResolverSettings::load(dir.path());
        assert_eq!(settings.cache_dir, PathBuf::from("/tmp/qm"));
        assert_eq!(settings.preferred_download_kind, Some(DownloadKind::Direct));
        assert_eq!(settings.user_agent, APP_USER_AGENT);
    }
}
