use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::checksum::Checksum;
use crate::core::error::{ModError, ModResult};
use crate::core::locks::KeyedLocks;
use crate::core::quickmod::PackageVersion;

/// A cache slot for one version's artifact.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    key: String,
    path: PathBuf,
    checksum: Checksum,
    verified: bool,
}

impl CacheHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Canonical path of the slot.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// True only when the slot holds bytes matching the expected checksum.
    pub fn is_verified(&self) -> bool {
        self.verified
    }
}

/// Content cache for downloaded artifacts.
///
/// Layout: `<root>/<uid>/<version>/<file name>`. Bytes reach the canonical
/// path only after verification; anything under it that fails verification
/// is deleted. Fills are single-flight per slot.
pub struct ContentCache {
    root: PathBuf,
    locks: KeyedLocks,
}

impl ContentCache {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            locks: KeyedLocks::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn storage_path(&self, version: &PackageVersion) -> PathBuf {
        self.root.join(version.storage_path())
    }

    /// Acquire the slot for `version`, creating its directory if needed.
    /// A present file is re-hashed; a mismatching one is removed.
    pub async fn entry(&self, version: &PackageVersion) -> ModResult<CacheHandle> {
        let checksum = version.checksum.clone().ok_or_else(|| {
            ModError::NotFound(format!("{} has no artifact to cache", version.id()))
        })?;
        let path = self.storage_path(version);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ModError::io(parent, e))?;
        }

        let verified = check_slot(&path, &checksum).await?;
        Ok(CacheHandle {
            key: path.to_string_lossy().to_string(),
            path,
            checksum,
            verified,
        })
    }

    /// Check `bytes` against `checksum`.
    pub fn verify(bytes: &[u8], checksum: &Checksum, path: &Path) -> ModResult<()> {
        let actual = checksum.compute(bytes);
        if actual != checksum.value {
            return Err(ModError::Integrity {
                path: path.to_path_buf(),
                expected: checksum.value.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Verify and write `bytes` into the slot. On mismatch the slot is
    /// invalidated and `Integrity` is returned.
    pub async fn store(&self, handle: &mut CacheHandle, bytes: &[u8]) -> ModResult<()> {
        handle.verified = false;

        if let Err(e) = Self::verify(bytes, &handle.checksum, &handle.path) {
            warn!("Rejecting bytes for {:?}: {}", handle.path, e);
            self.invalidate(handle).await?;
            return Err(e);
        }

        let part = part_path(&handle.path);
        {
            let mut file = tokio::fs::File::create(&part)
                .await
                .map_err(|e| ModError::io(&part, e))?;
            file.write_all(bytes)
                .await
                .map_err(|e| ModError::io(&part, e))?;
            file.flush().await.map_err(|e| ModError::io(&part, e))?;
        }
        tokio::fs::rename(&part, &handle.path)
            .await
            .map_err(|e| ModError::io(&handle.path, e))?;

        handle.verified = true;
        debug!("Cached {} bytes at {:?}", bytes.len(), handle.path);
        Ok(())
    }

    /// Read verified bytes. An unverified slot reads as absent; a slot whose
    /// content changed since verification is invalidated.
    pub async fn read(&self, handle: &mut CacheHandle) -> ModResult<Vec<u8>> {
        if !handle.verified {
            return Err(ModError::NotFound(format!(
                "no verified artifact at {:?}",
                handle.path
            )));
        }

        let bytes = tokio::fs::read(&handle.path)
            .await
            .map_err(|e| ModError::io(&handle.path, e))?;
        if let Err(e) = Self::verify(&bytes, &handle.checksum, &handle.path) {
            self.invalidate(handle).await?;
            return Err(e);
        }
        Ok(bytes)
    }

    /// Remove whatever the slot holds and mark it unverified.
    pub async fn invalidate(&self, handle: &mut CacheHandle) -> ModResult<()> {
        handle.verified = false;
        for path in [handle.path.clone(), part_path(&handle.path)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Invalidated {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ModError::io(path, e)),
            }
        }
        Ok(())
    }

    /// Return a verified slot for `version`, calling `fill` to produce the
    /// bytes on a miss. Concurrent callers for the same slot wait for the
    /// first one and reuse its result instead of fetching again.
    pub async fn obtain<F, Fut>(&self, version: &PackageVersion, fill: F) -> ModResult<CacheHandle>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ModResult<Vec<u8>>>,
    {
        let key = self.storage_path(version).to_string_lossy().to_string();
        let _guard = self.locks.lock(&key).await;

        let mut handle = self.entry(version).await?;
        if handle.verified {
            debug!("Cache hit for {}", version.id());
            return Ok(handle);
        }

        info!("Cache miss for {}, fetching", version.id());
        let bytes = fill().await?;
        self.store(&mut handle, &bytes).await?;
        Ok(handle)
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(".part");
    PathBuf::from(raw)
}

async fn check_slot(path: &Path, checksum: &Checksum) -> ModResult<bool> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(ModError::io(path, e)),
    };

    if checksum.matches(&bytes) {
        return Ok(true);
    }

    warn!("Cached file {:?} does not match {}, discarding", path, checksum);
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| ModError::io(path, e))?;
    Ok(false)
}
