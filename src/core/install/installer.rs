use std::path::PathBuf;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::cache::ContentCache;
use crate::core::downloader::{fetch_first, DownloadKind, Fetcher, HttpFetcher};
use crate::core::error::{ModError, ModResult};
use crate::core::instance::{DeployRecord, TargetEnvironment};
use crate::core::locks::KeyedLocks;
use crate::core::maven::MAVEN_CENTRAL;
use crate::core::quickmod::{InstallType, PackageVersion};
use crate::core::settings::ResolverSettings;

/// Progress of one install attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    Pending,
    /// Already deployed with the same checksum; nothing was touched.
    NotNeeded,
    /// Libraries fetched and the artifact verified, placement not started.
    Staged,
    Deployed,
    Failed(String),
}

impl InstallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstallState::NotNeeded | InstallState::Deployed | InstallState::Failed(_)
        )
    }
}

/// Everything an install needs in memory before the target is touched.
struct Staged {
    libraries: Vec<(PathBuf, Vec<u8>)>,
    artifact: Option<Vec<u8>>,
}

/// Installs package versions into target environments.
///
/// An install runs in two phases. Staging fetches every library and obtains
/// the verified artifact through the content cache; it can fail or be
/// cancelled without the target noticing. Placement then writes libraries,
/// dispatches the artifact on its install type and records the deployment.
pub struct QuickModInstaller {
    cache: Arc<ContentCache>,
    fetcher: Arc<dyn Fetcher>,
    preferred_kind: Option<DownloadKind>,
    concurrency: usize,
    inflight: KeyedLocks,
}

impl QuickModInstaller {
    pub fn new(cache: Arc<ContentCache>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            cache,
            fetcher,
            preferred_kind: None,
            concurrency: 8,
            inflight: KeyedLocks::new(),
        }
    }

    pub fn from_settings(settings: &ResolverSettings) -> ModResult<Self> {
        let fetcher = HttpFetcher::new(&settings.user_agent)?;
        Ok(Self::new(
            Arc::new(ContentCache::new(settings.cache_dir.clone())),
            Arc::new(fetcher),
        )
        .with_preferred_kind(settings.preferred_download_kind)
        .with_concurrency(settings.concurrency))
    }

    pub fn with_preferred_kind(mut self, kind: Option<DownloadKind>) -> Self {
        self.preferred_kind = kind;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// False when `target` already holds exactly this version with the same
    /// checksum.
    pub async fn needs_deploy(
        &self,
        version: &PackageVersion,
        target: &dyn TargetEnvironment,
    ) -> ModResult<bool> {
        Ok(match target.deployed(&version.package).await? {
            Some(record) => !record.is_same_deployment(version),
            None => true,
        })
    }

    pub async fn install(
        &self,
        version: &PackageVersion,
        target: &dyn TargetEnvironment,
    ) -> ModResult<InstallState> {
        self.install_with_token(version, target, &CancellationToken::new(), None)
            .await
    }

    /// Install `version`, giving up before placement if `cancel` fires.
    /// State transitions are published on `progress` when given.
    pub async fn install_with_token(
        &self,
        version: &PackageVersion,
        target: &dyn TargetEnvironment,
        cancel: &CancellationToken,
        progress: Option<&watch::Sender<InstallState>>,
    ) -> ModResult<InstallState> {
        let report = |state: InstallState| {
            if let Some(tx) = progress {
                tx.send_replace(state);
            }
        };

        if !version.is_valid() {
            return Err(ModError::InvalidEntity(format!(
                "{} ({})",
                version.id(),
                version.problems.join("; ")
            )));
        }

        let key = format!("{}#{}", target.id(), version.package);
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ModError::Cancelled(version.id())),
            guard = self.inflight.lock(&key) => guard,
        };

        if !self.needs_deploy(version, target).await? {
            info!("{} already deployed, skipping", version.id());
            report(InstallState::NotNeeded);
            return Ok(InstallState::NotNeeded);
        }

        let staged = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Install of {} cancelled before placement", version.id());
                return Err(ModError::Cancelled(version.id()));
            }
            staged = self.stage(version, target) => staged?,
        };
        report(InstallState::Staged);

        self.place(version, target, staged).await?;
        report(InstallState::Deployed);
        info!("Deployed {} ({})", version.id(), version.install_type);
        Ok(InstallState::Deployed)
    }

    /// Fetch and place the libraries of `version` that `target` lacks.
    pub async fn install_libraries_into(
        &self,
        version: &PackageVersion,
        target: &dyn TargetEnvironment,
    ) -> ModResult<Vec<PathBuf>> {
        let fetched = self.fetch_libraries(version, target).await?;
        let mut placed = Vec::with_capacity(fetched.len());
        for (relative, bytes) in fetched {
            placed.push(target.write_library(&relative, &bytes).await?);
        }
        Ok(placed)
    }

    async fn stage(
        &self,
        version: &PackageVersion,
        target: &dyn TargetEnvironment,
    ) -> ModResult<Staged> {
        if version.install_type == InstallType::Group {
            self.check_group_dependencies(version, target).await?;
        }

        let libraries = self.fetch_libraries(version, target).await?;
        let artifact = if version.install_type.has_artifact() {
            Some(self.fetch_artifact(version).await?)
        } else {
            None
        };

        Ok(Staged { libraries, artifact })
    }

    /// A group places nothing itself, so its mandatory dependencies must
    /// already be deployed.
    async fn check_group_dependencies(
        &self,
        version: &PackageVersion,
        target: &dyn TargetEnvironment,
    ) -> ModResult<()> {
        let deployed = target.deployments().await?;
        let missing: Vec<String> = version
            .dependencies()
            .filter(|d| d.mandatory)
            .filter(|d| !deployed.iter().any(|r| r.satisfies(&d.target)))
            .map(|d| d.target.to_string())
            .collect();

        if missing.is_empty() {
            return Ok(());
        }
        Err(ModError::DependencyUnsatisfied {
            dependent: version.id(),
            missing: missing.join(", "),
        })
    }

    async fn fetch_libraries(
        &self,
        version: &PackageVersion,
        target: &dyn TargetEnvironment,
    ) -> ModResult<Vec<(PathBuf, Vec<u8>)>> {
        let dependent = version.id();

        let mut wanted: Vec<(String, PathBuf, String)> = Vec::new();
        for library in &version.libraries {
            let artifact = library
                .artifact()
                .map_err(|e| unsatisfied_library(&dependent, &library.name, e))?;
            let relative = artifact.local_path();
            if target.has_library(&relative).await? {
                debug!("Library {} already present", artifact);
                continue;
            }
            let repo = if library.repo.trim().is_empty() {
                MAVEN_CENTRAL
            } else {
                library.repo.as_str()
            };
            wanted.push((library.name.clone(), relative, artifact.url(repo)));
        }

        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        info!("Fetching {} libraries for {}", wanted.len(), dependent);

        let fetcher = self.fetcher.clone();
        stream::iter(wanted)
            .map(move |(name, relative, url)| {
                let fetcher = fetcher.clone();
                let dependent = dependent.clone();
                async move {
                    let bytes = fetcher
                        .fetch(&url)
                        .await
                        .map_err(|e| unsatisfied_library(&dependent, &name, e))?;
                    Ok::<_, ModError>((relative, bytes))
                }
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await
    }

    /// Verified artifact bytes, from the cache or fetched into it.
    async fn fetch_artifact(&self, version: &PackageVersion) -> ModResult<Vec<u8>> {
        let source = version.highest_priority_download(self.preferred_kind)?;
        if !source.kind.is_automatic() {
            return Err(ModError::NotFound(format!(
                "{} requires a manual download from {}",
                version.id(),
                source.url
            )));
        }
        debug!("Selected {} source {} for {}", source.kind, source.url, version.id());

        let urls = source.urls();
        let fetcher = self.fetcher.as_ref();
        let mut handle = self
            .cache
            .obtain(version, || fetch_first(fetcher, &urls))
            .await?;
        self.cache.read(&mut handle).await
    }

    async fn place(
        &self,
        version: &PackageVersion,
        target: &dyn TargetEnvironment,
        staged: Staged,
    ) -> ModResult<()> {
        for (relative, bytes) in &staged.libraries {
            target.write_library(relative, bytes).await?;
        }

        let previous = target.deployed(&version.package).await?;
        let files = match (version.install_type, staged.artifact) {
            (InstallType::Group, _) => Vec::new(),
            (InstallType::Extract, Some(bytes)) => target.extract_into_root(&bytes).await?,
            (InstallType::ConfigOverlay, Some(bytes)) => target.write_config(&bytes).await?,
            (kind, Some(bytes)) => {
                let area = kind.mod_area().ok_or_else(|| {
                    ModError::Other(format!("{} has no mod area", kind))
                })?;
                vec![target.write_mod(area, &version.file_name(), &bytes).await?]
            }
            (kind, None) => {
                return Err(ModError::Other(format!(
                    "{} of type {} was staged without an artifact",
                    version.id(),
                    kind
                )))
            }
        };

        // Single-file types replace the previous version's file; archives
        // overlay in place and have nothing to take back out.
        let single_file = version.install_type.mod_area().is_some();
        let previous_files: Vec<PathBuf> = previous
            .filter(|p| p.install_type.mod_area().is_some())
            .map(|p| p.files)
            .unwrap_or_default();

        if let Err(e) = target.record(DeployRecord::new(version, files.clone())).await {
            warn!("Recording {} failed, removing placed files: {}", version.id(), e);
            if single_file {
                let placed: Vec<&PathBuf> = files
                    .iter()
                    .filter(|f| !previous_files.contains(f))
                    .collect();
                for placed in placed {
                    if let Err(cleanup) = target.remove(placed).await {
                        warn!("Could not remove {:?}: {}", placed, cleanup);
                    }
                }
            }
            return Err(match e {
                ModError::Placement { .. } => e,
                other => ModError::Placement {
                    path: PathBuf::from("deploy records"),
                    message: other.to_string(),
                },
            });
        }

        let stale: Vec<PathBuf> = previous_files
            .into_iter()
            .filter(|f| !files.contains(f))
            .collect();
        for path in stale {
            debug!("Removing superseded {:?}", path);
            target.remove(&path).await?;
        }
        Ok(())
    }
}

fn unsatisfied_library(dependent: &str, library: &str, e: ModError) -> ModError {
    ModError::DependencyUnsatisfied {
        dependent: dependent.to_string(),
        missing: format!("library {} ({})", library, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::ChecksumKind;
    use crate::core::downloader::MockFetcher;
    use crate::core::instance::InstanceTarget;
    use crate::core::quickmod::ModArea;
    use crate::core::version::{PackageRef, Version};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    struct Env {
        _dir: TempDir,
        root: PathBuf,
        cache: Arc<ContentCache>,
        target: InstanceTarget,
    }

    fn env() -> Env {
        let dir = tempdir().unwrap();
        let root = dir.path().join("instance");
        Env {
            cache: Arc::new(ContentCache::new(dir.path().join("cache"))),
            target: InstanceTarget::new(&root),
            root,
            _dir: dir,
        }
    }

    fn installer(env: &Env, fetcher: MockFetcher) -> QuickModInstaller {
        QuickModInstaller::new(env.cache.clone(), Arc::new(fetcher))
    }

    fn mod_version(uid: &str, version: &str, bytes: &[u8], extra: Value) -> PackageVersion {
        let mut raw = json!({
            "version": version,
            "checksum": ChecksumKind::Sha1.digest(bytes),
            "urls": [{ "url": format!("https://files.example/{}-{}.jar", uid, version) }]
        });
        if let (Some(raw), Some(extra)) = (raw.as_object_mut(), extra.as_object()) {
            raw.extend(extra.clone());
        }
        PackageVersion::from_json(PackageRef::new(uid), &raw)
    }

    fn serve(fetcher: &mut MockFetcher, prefix: &'static str, bytes: &'static [u8]) {
        fetcher
            .expect_fetch()
            .withf(move |url| url.starts_with(prefix))
            .times(1)
            .returning(move |_| Ok(bytes.to_vec()));
    }

    #[tokio::test]
    async fn invalid_entities_fail_before_any_io() {
        let env = env();
        let broken = PackageVersion::from_json(
            PackageRef::new("broken"),
            &json!({ "version": "1.0", "urls": [{ "url": "https://e.com/x.jar" }] }),
        );
        let err = installer(&env, MockFetcher::new())
            .install(&broken, &env.target)
            .await
            .unwrap_err();
        assert!(matches!(err, ModError::InvalidEntity(_)));
        assert!(!env.root.exists());
    }

    #[tokio::test]
    async fn forge_mod_is_deployed_once() {
        let env = env();
        let mut fetcher = MockFetcher::new();
        serve(&mut fetcher, "https://files.example/jei", b"jei jar");
        let installer = installer(&env, fetcher);
        let version = mod_version("jei", "4.2", b"jei jar", json!({}));

        assert!(installer.needs_deploy(&version, &env.target).await.unwrap());
        let state = installer.install(&version, &env.target).await.unwrap();
        assert_eq!(state, InstallState::Deployed);
        assert_eq!(
            std::fs::read(env.root.join("mods/jei-4.2.jar")).unwrap(),
            b"jei jar"
        );

        assert!(!installer.needs_deploy(&version, &env.target).await.unwrap());
        let again = installer.install(&version, &env.target).await.unwrap();
        assert_eq!(again, InstallState::NotNeeded);
    }

    #[tokio::test]
    async fn changed_checksum_needs_deploy() {
        let env = env();
        let mut fetcher = MockFetcher::new();
        serve(&mut fetcher, "https://files.example/jei", b"jei jar");
        let installer = installer(&env, fetcher);
        installer
            .install(&mod_version("jei", "4.2", b"jei jar", json!({})), &env.target)
            .await
            .unwrap();

        let rebuilt = mod_version("jei", "4.2", b"rebuilt jar", json!({}));
        assert!(installer.needs_deploy(&rebuilt, &env.target).await.unwrap());
    }

    #[tokio::test]
    async fn integrity_failure_leaves_instance_untouched() {
        let env = env();
        let mut fetcher = MockFetcher::new();
        serve(&mut fetcher, "https://files.example/jei", b"tampered");
        let version = mod_version("jei", "4.2", b"jei jar", json!({}));

        let err = installer(&env, fetcher)
            .install(&version, &env.target)
            .await
            .unwrap_err();
        assert!(matches!(err, ModError::Integrity { .. }));
        assert!(!env.root.join("mods").exists());
        assert!(env.target.deployed(&version.package).await.unwrap().is_none());
        assert!(!env.cache.storage_path(&version).exists());
    }

    #[tokio::test]
    async fn core_mods_and_loader_mods_use_their_own_areas() {
        let env = env();
        let mut fetcher = MockFetcher::new();
        serve(&mut fetcher, "https://files.example/core", b"core");
        serve(&mut fetcher, "https://files.example/lite", b"lite");
        let installer = installer(&env, fetcher);

        let core = mod_version("core", "1", b"core", json!({ "installType": "forgeCoreMod" }));
        let lite = mod_version("lite", "1", b"lite", json!({ "installType": "liteloaderMod" }));
        installer.install(&core, &env.target).await.unwrap();
        installer.install(&lite, &env.target).await.unwrap();

        assert!(env.root.join("coremods/core-1.jar").exists());
        assert!(env.root.join("litemods/lite-1.jar").exists());
        assert!(!env.root.join("mods").exists());
    }

    #[tokio::test]
    async fn libraries_are_placed_before_the_artifact() {
        let env = env();
        let mut fetcher = MockFetcher::new();
        serve(&mut fetcher, "https://maven.example/org/lib/", b"lib jar");
        serve(&mut fetcher, "https://files.example/needy", b"needy");
        let version = mod_version(
            "needy",
            "1.0",
            b"needy",
            json!({ "libraries": [{ "name": "org:lib:2.0", "repo": "https://maven.example" }] }),
        );

        installer(&env, fetcher)
            .install(&version, &env.target)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(env.root.join("libraries/org/lib/2.0/lib-2.0.jar")).unwrap(),
            b"lib jar"
        );
        assert!(env.root.join("mods/needy-1.0.jar").exists());
    }

    #[tokio::test]
    async fn present_libraries_are_not_refetched() {
        let env = env();
        env.target
            .write_library(Path::new("org/lib/2.0/lib-2.0.jar"), b"old")
            .await
            .unwrap();
        let version = PackageVersion::from_json(
            PackageRef::new("pack"),
            &json!({
                "version": "1",
                "installType": "group",
                "libraries": [{ "name": "org:lib:2.0", "repo": "https://maven.example" }]
            }),
        );

        let placed = installer(&env, MockFetcher::new())
            .install_libraries_into(&version, &env.target)
            .await
            .unwrap();
        assert!(placed.is_empty());
    }

    #[tokio::test]
    async fn missing_library_aborts_before_artifact_fetch() {
        let env = env();
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|url| url.starts_with("https://repo1.maven.org/"))
            .times(1)
            .returning(|url| {
                Err(ModError::Transport {
                    url: url.to_string(),
                    message: "HTTP 404".into(),
                })
            });
        let version = mod_version(
            "needy",
            "1.0",
            b"needy",
            json!({ "libraries": [{ "name": "org:gone:1.0", "repo": "" }] }),
        );

        let err = installer(&env, fetcher)
            .install(&version, &env.target)
            .await
            .unwrap_err();
        assert!(matches!(err, ModError::DependencyUnsatisfied { .. }));
        assert!(!env.root.exists());
    }

    #[tokio::test]
    async fn manual_only_sources_are_not_installable() {
        let env = env();
        let version = PackageVersion::from_json(
            PackageRef::new("manual"),
            &json!({
                "version": "1",
                "checksum": ChecksumKind::Sha1.digest(b"x"),
                "urls": [{ "url": "https://site.example/download", "downloadType": "browser" }]
            }),
        );

        let err = installer(&env, MockFetcher::new())
            .install(&version, &env.target)
            .await
            .unwrap_err();
        assert!(matches!(err, ModError::NotFound(_)));
    }

    #[tokio::test]
    async fn upgrade_removes_the_superseded_file() {
        let env = env();
        let mut fetcher = MockFetcher::new();
        serve(&mut fetcher, "https://files.example/jei-1", b"one");
        serve(&mut fetcher, "https://files.example/jei-2", b"two");
        let installer = installer(&env, fetcher);

        installer
            .install(&mod_version("jei", "1", b"one", json!({})), &env.target)
            .await
            .unwrap();
        installer
            .install(&mod_version("jei", "2", b"two", json!({})), &env.target)
            .await
            .unwrap();

        assert!(!env.root.join("mods/jei-1.jar").exists());
        assert!(env.root.join("mods/jei-2.jar").exists());
    }

    /// Delegates to a real instance but fails the n-th `record` call.
    struct FailingRecords {
        inner: InstanceTarget,
        records: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl TargetEnvironment for FailingRecords {
        fn id(&self) -> String {
            self.inner.id()
        }
        async fn deployed(&self, package: &PackageRef) -> ModResult<Option<DeployRecord>> {
            self.inner.deployed(package).await
        }
        async fn deployments(&self) -> ModResult<Vec<DeployRecord>> {
            self.inner.deployments().await
        }
        async fn has_library(&self, relative: &Path) -> ModResult<bool> {
            self.inner.has_library(relative).await
        }
        async fn write_library(&self, relative: &Path, bytes: &[u8]) -> ModResult<PathBuf> {
            self.inner.write_library(relative, bytes).await
        }
        async fn write_mod(&self, area: ModArea, file_name: &str, bytes: &[u8]) -> ModResult<PathBuf> {
            self.inner.write_mod(area, file_name, bytes).await
        }
        async fn write_config(&self, archive: &[u8]) -> ModResult<Vec<PathBuf>> {
            self.inner.write_config(archive).await
        }
        async fn extract_into_root(&self, archive: &[u8]) -> ModResult<Vec<PathBuf>> {
            self.inner.extract_into_root(archive).await
        }
        async fn remove(&self, relative: &Path) -> ModResult<()> {
            self.inner.remove(relative).await
        }
        async fn record(&self, record: DeployRecord) -> ModResult<()> {
            if self.records.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(ModError::io(
                    "quickmods.json",
                    std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                ));
            }
            self.inner.record(record).await
        }
    }

    #[tokio::test]
    async fn failed_record_keeps_the_previous_deployment() {
        let env = env();
        let mut fetcher = MockFetcher::new();
        serve(&mut fetcher, "https://files.example/jei-1", b"one");
        serve(&mut fetcher, "https://files.example/jei-2", b"two");
        let installer = installer(&env, fetcher);
        let target = FailingRecords {
            inner: InstanceTarget::new(&env.root),
            records: AtomicUsize::new(0),
            fail_on: 2,
        };

        installer
            .install(&mod_version("jei", "1", b"one", json!({})), &target)
            .await
            .unwrap();
        let err = installer
            .install(&mod_version("jei", "2", b"two", json!({})), &target)
            .await
            .unwrap_err();

        assert!(matches!(err, ModError::Placement { .. }));
        assert_eq!(std::fs::read(env.root.join("mods/jei-1.jar")).unwrap(), b"one");
        assert!(!env.root.join("mods/jei-2.jar").exists());
        let record = target.deployed(&PackageRef::new("jei")).await.unwrap().unwrap();
        assert_eq!(record.version, Version::parse("1").unwrap());
        assert_eq!(record.files, vec![PathBuf::from("mods/jei-1.jar")]);
    }

    #[tokio::test]
    async fn group_requires_deployed_dependencies_and_never_fetches() {
        let env = env();
        let installer = installer(&env, MockFetcher::new());
        let group = PackageVersion::from_json(
            PackageRef::new("pack"),
            &json!({
                "version": "1",
                "installType": "group",
                "depends": { "X": { "version": "1.0" } }
            }),
        );

        let err = installer.install(&group, &env.target).await.unwrap_err();
        assert!(matches!(err, ModError::DependencyUnsatisfied { .. }));

        let x = mod_version("X", "1.0", b"x", json!({}));
        env.target.record(DeployRecord::new(&x, vec![])).await.unwrap();
        let state = installer.install(&group, &env.target).await.unwrap();
        assert_eq!(state, InstallState::Deployed);
    }

    #[tokio::test]
    async fn extract_unpacks_into_the_game_dir() {
        let mut archive = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut archive);
            writer
                .start_file("scripts/init.zs", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"print('hi');").unwrap();
            writer.finish().unwrap();
        }
        let bytes: &'static [u8] = Box::leak(archive.into_inner().into_boxed_slice());

        let env = env();
        let mut fetcher = MockFetcher::new();
        serve(&mut fetcher, "https://files.example/scripts", bytes);
        let version = mod_version(
            "scripts",
            "1",
            bytes,
            json!({ "installType": "extract" }),
        );

        installer(&env, fetcher)
            .install(&version, &env.target)
            .await
            .unwrap();
        assert!(env.root.join("minecraft/scripts/init.zs").exists());
        let record = env.target.deployed(&version.package).await.unwrap().unwrap();
        assert_eq!(record.files, vec![PathBuf::from("minecraft/scripts/init.zs")]);
    }
}
