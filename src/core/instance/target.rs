use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::model::DeployRecord;
use crate::core::error::ModResult;
use crate::core::quickmod::ModArea;
use crate::core::version::PackageRef;

/// The runtime environment artifacts are deployed into.
///
/// Every write must be all-or-nothing per call: either the new content is
/// fully in place or the previous content is untouched. Returned paths are
/// relative to the environment root.
#[async_trait]
pub trait TargetEnvironment: Send + Sync {
    /// Stable identifier, used to serialize installs per environment.
    fn id(&self) -> String;

    /// Record of what is deployed for `package`, if anything.
    async fn deployed(&self, package: &PackageRef) -> ModResult<Option<DeployRecord>>;

    async fn deployments(&self) -> ModResult<Vec<DeployRecord>>;

    async fn has_library(&self, relative: &Path) -> ModResult<bool>;

    async fn write_library(&self, relative: &Path, bytes: &[u8]) -> ModResult<PathBuf>;

    async fn write_mod(&self, area: ModArea, file_name: &str, bytes: &[u8]) -> ModResult<PathBuf>;

    /// Unpack `archive` into the configuration area, replacing existing files.
    async fn write_config(&self, archive: &[u8]) -> ModResult<Vec<PathBuf>>;

    /// Unpack `archive` into the environment root.
    async fn extract_into_root(&self, archive: &[u8]) -> ModResult<Vec<PathBuf>>;

    /// Remove a previously deployed file. Missing files are not an error.
    async fn remove(&self, relative: &Path) -> ModResult<()>;

    async fn record(&self, record: DeployRecord) -> ModResult<()>;
}
