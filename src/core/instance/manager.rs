use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{DeployRecord, InstanceLayout};
use super::target::TargetEnvironment;
use crate::core::error::{ModError, ModResult};
use crate::core::locks::KeyedLocks;
use crate::core::quickmod::ModArea;
use crate::core::version::PackageRef;

/// A Minecraft instance directory acting as the deploy target.
///
/// Writes to the same area are serialized; different areas proceed in
/// parallel. Files are written next to their destination and renamed into
/// place, archives are unpacked into a staging directory first.
pub struct InstanceTarget {
    layout: InstanceLayout,
    locks: KeyedLocks,
}

impl InstanceTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: InstanceLayout::new(root),
            locks: KeyedLocks::new(),
        }
    }

    pub fn layout(&self) -> &InstanceLayout {
        &self.layout
    }

    async fn load_records(&self) -> ModResult<BTreeMap<PackageRef, DeployRecord>> {
        let path = self.layout.records_path();
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(ModError::io(path, e)),
        };

        // A corrupt file is reported rather than read as empty, so `record`
        // never writes a fresh map over it.
        serde_json::from_str(&json).map_err(|e| {
            warn!("Corrupt deploy records at {:?}: {}", path, e);
            ModError::Json(e)
        })
    }

    /// Unpack `archive` under `dest`, all-or-nothing.
    async fn unpack_into(&self, archive: &[u8], dest: PathBuf) -> ModResult<Vec<PathBuf>> {
        let staging = self.layout.staging_dir().join(Uuid::new_v4().to_string());
        let unpacked = {
            let archive = archive.to_vec();
            let staging = staging.clone();
            tokio::task::spawn_blocking(move || unpack_zip(&archive, &staging))
                .await
                .map_err(|e| ModError::Other(format!("unpack task failed: {}", e)))
        };

        let result = match unpacked {
            Ok(Ok(files)) => promote(&staging, &files, &dest).await.map(|()| files),
            Ok(Err(e)) | Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not clean staging dir {:?}: {}", staging, e);
            }
        }

        let files = result?;
        Ok(files
            .into_iter()
            .map(|rel| self.layout.relative(&dest.join(rel)))
            .collect())
    }
}

#[async_trait]
impl TargetEnvironment for InstanceTarget {
    fn id(&self) -> String {
        self.layout.root.to_string_lossy().to_string()
    }

    async fn deployed(&self, package: &PackageRef) -> ModResult<Option<DeployRecord>> {
        Ok(self.load_records().await?.remove(package))
    }

    async fn deployments(&self) -> ModResult<Vec<DeployRecord>> {
        Ok(self.load_records().await?.into_values().collect())
    }

    async fn has_library(&self, relative: &Path) -> ModResult<bool> {
        let path = self.layout.libraries_dir().join(checked_relative(relative)?);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| ModError::io(path, e))
    }

    async fn write_library(&self, relative: &Path, bytes: &[u8]) -> ModResult<PathBuf> {
        let _guard = self.locks.lock("libraries").await;
        let dest = self.layout.libraries_dir().join(checked_relative(relative)?);
        write_atomic(&dest, bytes).await?;
        debug!("Placed library {:?}", dest);
        Ok(self.layout.relative(&dest))
    }

    async fn write_mod(&self, area: ModArea, file_name: &str, bytes: &[u8]) -> ModResult<PathBuf> {
        let _guard = self.locks.lock(area.dir_name()).await;
        let dest = self
            .layout
            .mod_dir(area)
            .join(checked_relative(Path::new(file_name))?);
        write_atomic(&dest, bytes).await?;
        info!("Placed {} into {:?}", file_name, area);
        Ok(self.layout.relative(&dest))
    }

    async fn write_config(&self, archive: &[u8]) -> ModResult<Vec<PathBuf>> {
        let _guard = self.locks.lock("config").await;
        self.unpack_into(archive, self.layout.config_dir()).await
    }

    async fn extract_into_root(&self, archive: &[u8]) -> ModResult<Vec<PathBuf>> {
        let _guard = self.locks.lock("game").await;
        self.unpack_into(archive, self.layout.game_dir()).await
    }

    async fn remove(&self, relative: &Path) -> ModResult<()> {
        let path = self.layout.root.join(checked_relative(relative)?);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ModError::io(path, e)),
        }
    }

    async fn record(&self, record: DeployRecord) -> ModResult<()> {
        let _guard = self.locks.lock("records").await;
        let mut records = self.load_records().await?;
        records.insert(record.package.clone(), record);
        let json = serde_json::to_string_pretty(&records)?;
        write_atomic(&self.layout.records_path(), json.as_bytes()).await
    }
}

/// Reject absolute paths and `..` so nothing escapes its area.
fn checked_relative(path: &Path) -> ModResult<&Path> {
    let safe = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe || path.as_os_str().is_empty() {
        return Err(ModError::Placement {
            path: path.to_path_buf(),
            message: "path escapes its target area".into(),
        });
    }
    Ok(path)
}

fn placement(path: &Path, e: impl std::fmt::Display) -> ModError {
    ModError::Placement {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Write `bytes` to a sibling temp file and rename it over `dest`.
async fn write_atomic(dest: &Path, bytes: &[u8]) -> ModResult<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| placement(dest, "destination has no parent directory"))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| placement(parent, e))?;

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = parent.join(format!(".{}.{}.part", file_name, Uuid::new_v4()));

    let written = async {
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, dest).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(placement(dest, e));
    }
    Ok(())
}

/// Unpack a zip into `staging`, returning the file paths relative to it.
fn unpack_zip(bytes: &[u8], staging: &Path) -> ModResult<Vec<PathBuf>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut files = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(placement(
                Path::new(entry.name()),
                "archive entry escapes its target",
            ));
        };
        let out = staging.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out).map_err(|e| ModError::io(&out, e))?;
            continue;
        }

        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ModError::io(parent, e))?;
        }
        let mut file = std::fs::File::create(&out).map_err(|e| ModError::io(&out, e))?;
        std::io::copy(&mut entry, &mut file).map_err(|e| ModError::io(&out, e))?;
        files.push(relative);
    }

    Ok(files)
}

/// Move staged files into `dest`, backing up anything they replace. If a
/// move fails, moved files are taken back out and backups restored.
async fn promote(staging: &Path, files: &[PathBuf], dest: &Path) -> ModResult<()> {
    let backup_root = staging.join(".backup");
    let mut moved: Vec<(PathBuf, Option<PathBuf>)> = Vec::new();

    for rel in files {
        let target = dest.join(rel);
        let backup = backup_root.join(rel);
        match promote_one(&staging.join(rel), &target, &backup).await {
            Ok(had_previous) => moved.push((target, had_previous.then_some(backup))),
            Err(e) => {
                warn!("Placement into {:?} failed, rolling back: {}", dest, e);
                for (placed, backup) in moved.into_iter().rev() {
                    let _ = tokio::fs::remove_file(&placed).await;
                    if let Some(backup) = backup {
                        let _ = tokio::fs::rename(&backup, &placed).await;
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

async fn promote_one(src: &Path, target: &Path, backup: &Path) -> ModResult<bool> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| placement(parent, e))?;
    }

    let had_previous = tokio::fs::try_exists(target)
        .await
        .map_err(|e| placement(target, e))?;
    if had_previous {
        if let Some(parent) = backup.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| placement(parent, e))?;
        }
        tokio::fs::rename(target, backup)
            .await
            .map_err(|e| placement(target, e))?;
    }

    if let Err(e) = tokio::fs::rename(src, target).await {
        if had_previous {
            let _ = tokio::fs::rename(backup, target).await;
        }
        return Err(placement(target, e));
    }
    Ok(had_previous)
}
