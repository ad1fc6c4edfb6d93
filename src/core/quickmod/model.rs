use std::fmt::{self, Write as _};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::relations::{Relation, RelationKind, RelationshipTable};
use crate::core::cache::Checksum;
use crate::core::downloader::{select_best, DownloadKind, DownloadSource};
use crate::core::error::{ModError, ModResult};
use crate::core::maven::MavenArtifact;
use crate::core::version::{PackageRef, Version, VersionRef, VersionReq};

/// How an artifact is placed into an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstallType {
    ForgeMod,
    ForgeCoreMod,
    #[serde(alias = "liteloaderMod")]
    LoaderMod,
    Extract,
    #[serde(alias = "configPack")]
    ConfigOverlay,
    Group,
}

/// Instance sub-area a mod file lands in. The three never share a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModArea {
    Mods,
    CoreMods,
    LoaderMods,
}

impl InstallType {
    /// Does this type come with a downloadable file?
    pub fn has_artifact(&self) -> bool {
        !matches!(self, InstallType::Group)
    }

    /// Mod area for single-file installs; `None` for archive and meta types.
    pub fn mod_area(&self) -> Option<ModArea> {
        match self {
            InstallType::ForgeMod => Some(ModArea::Mods),
            InstallType::ForgeCoreMod => Some(ModArea::CoreMods),
            InstallType::LoaderMod => Some(ModArea::LoaderMods),
            InstallType::Extract | InstallType::ConfigOverlay | InstallType::Group => None,
        }
    }

    fn default_extension(&self) -> &'static str {
        match self {
            InstallType::Extract | InstallType::ConfigOverlay => "zip",
            InstallType::LoaderMod => "litemod",
            _ => "jar",
        }
    }
}

impl fmt::Display for InstallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallType::ForgeMod => write!(f, "forgeMod"),
            InstallType::ForgeCoreMod => write!(f, "forgeCoreMod"),
            InstallType::LoaderMod => write!(f, "loaderMod"),
            InstallType::Extract => write!(f, "extract"),
            InstallType::ConfigOverlay => write!(f, "configOverlay"),
            InstallType::Group => write!(f, "group"),
        }
    }
}

impl FromStr for InstallType {
    type Err = ModError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "forgemod" => Ok(InstallType::ForgeMod),
            "forgecoremod" => Ok(InstallType::ForgeCoreMod),
            "loadermod" | "liteloadermod" => Ok(InstallType::LoaderMod),
            "extract" => Ok(InstallType::Extract),
            "configoverlay" | "configpack" => Ok(InstallType::ConfigOverlay),
            "group" => Ok(InstallType::Group),
            other => Err(ModError::parse(
                "installType",
                format!("unknown install type '{}'", other),
            )),
        }
    }
}

/// A library a mod needs at runtime, fetched from its own repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    /// Maven coordinate.
    pub name: String,
    /// Repository base URL.
    pub repo: String,
}

impl Library {
    pub fn new(name: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repo: repo.into(),
        }
    }

    pub fn artifact(&self) -> ModResult<MavenArtifact> {
        MavenArtifact::parse(&self.name)
    }
}

/// One published, installable version of one package.
///
/// Built by parsing a descriptor (see [`super::descriptor`]) and never
/// mutated afterwards. The owning package is referenced by identifier only;
/// the [`super::Catalog`] owns the package → versions mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageVersion {
    pub package: PackageRef,
    pub version: Version,

    // ── Display ──
    /// Human readable name ("name" in the descriptor).
    pub name: String,
    pub version_string: String,
    /// Release label such as "release" or "beta"; not interpreted.
    pub release_type: String,

    /// Minecraft versions this build supports. Empty means unchecked.
    pub mc_versions: Vec<String>,

    pub relations: RelationshipTable,

    // ── Artifact ──
    /// Expected hash of the artifact; `None` only for `Group`.
    pub checksum: Option<Checksum>,
    pub install_type: InstallType,
    pub libraries: Vec<Library>,
    pub downloads: Vec<DownloadSource>,

    /// False when parsing hit structural errors; see `problems`.
    pub valid: bool,
    pub problems: Vec<String>,
}

impl PackageVersion {
    /// Canonical version string.
    pub fn descriptor(&self) -> &str {
        self.version.as_str()
    }

    /// Display name, falling back to the version string.
    pub fn name(&self) -> &str {
        if self.name.is_empty() {
            self.descriptor()
        } else {
            &self.name
        }
    }

    pub fn type_string(&self) -> &str {
        &self.release_type
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Exact reference to this version.
    pub fn version_ref(&self) -> VersionRef {
        VersionRef::exact(self.package.clone(), self.version.clone())
    }

    /// `package@version`, used in logs, errors and lock keys.
    pub fn id(&self) -> String {
        format!("{}@{}", self.package, self.version)
    }

    pub fn supports_runtime(&self, mc_version: &str) -> bool {
        self.mc_versions.is_empty() || self.mc_versions.iter().any(|v| v == mc_version)
    }

    // ── Relationships ──

    pub fn relations_of(&self, kind: RelationKind) -> impl Iterator<Item = &Relation> + '_ {
        self.relations.of_kind(kind)
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &Relation> + '_ {
        self.relations.of_kind(RelationKind::Depends)
    }

    pub fn recommendations(&self) -> impl Iterator<Item = &Relation> + '_ {
        self.relations.of_kind(RelationKind::Recommends)
    }

    pub fn suggestions(&self) -> impl Iterator<Item = &Relation> + '_ {
        self.relations.of_kind(RelationKind::Suggests)
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &Relation> + '_ {
        self.relations.of_kind(RelationKind::Conflicts)
    }

    pub fn provides(&self) -> impl Iterator<Item = &VersionRef> + '_ {
        self.relations
            .of_kind(RelationKind::Provides)
            .map(|relation| &relation.target)
    }

    /// Does this version satisfy `wanted`, directly or through `provides`?
    pub fn satisfies(&self, wanted: &VersionRef) -> bool {
        if wanted.is_satisfied_by(&self.package, &self.version) {
            return true;
        }
        self.relations
            .get(RelationKind::Provides, &wanted.package)
            .is_some_and(|provided| match provided.target.req.exact() {
                Some(version) => wanted.req.matches(version),
                None => wanted.req == VersionReq::Any,
            })
    }

    // ── Artifact ──

    /// Pick the download to use, optionally preferring one kind.
    pub fn highest_priority_download(
        &self,
        preferred: Option<DownloadKind>,
    ) -> ModResult<&DownloadSource> {
        if !self.install_type.has_artifact() {
            return Err(ModError::NotFound(format!(
                "{} is a group and has no artifact",
                self.id()
            )));
        }
        select_best(&self.downloads, preferred)
    }

    /// Declared file extension: first source that declares or implies one,
    /// else the install type's default.
    pub fn extension(&self) -> String {
        self.downloads
            .iter()
            .find_map(DownloadSource::extension)
            .unwrap_or_else(|| self.install_type.default_extension().to_string())
    }

    /// File name of the artifact, the same for every parse of the same descriptor.
    pub fn file_name(&self) -> String {
        // The uid never holds a bare `-` and the extension never a bare
        // `.`, so the name splits back into its three parts.
        format!(
            "{}-{}.{}",
            sanitize(self.package.as_str(), &['-']),
            sanitize(self.descriptor(), &[]),
            sanitize(&self.extension(), &['.'])
        )
    }

    /// Cache slot path relative to the cache root: `<uid>/<version>/<file>`.
    pub fn storage_path(&self) -> PathBuf {
        PathBuf::from(sanitize(self.package.as_str(), &[]))
            .join(sanitize(self.descriptor(), &[]))
            .join(self.file_name())
    }

    /// Path of the deployed file relative to the instance root, for types
    /// that deploy a single file.
    pub fn instance_path(&self) -> Option<PathBuf> {
        self.install_type
            .mod_area()
            .map(|area| PathBuf::from(area.dir_name()).join(self.file_name()))
    }
}

impl ModArea {
    /// Directory under the instance root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            ModArea::Mods => "mods",
            ModArea::CoreMods => "coremods",
            ModArea::LoaderMods => "litemods",
        }
    }
}

/// Encode an identifier as a single path component.
///
/// Characters outside `[A-Za-z0-9._+-]`, plus any in `reserved`, become
/// `%XX` per UTF-8 byte (`%` included), so distinct inputs never share a
/// component. `.`, `..` and the empty string are encoded as well.
pub(crate) fn sanitize(raw: &str, reserved: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let safe = matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' | '+')
            && !reserved.contains(&c);
        if safe {
            out.push(c);
            continue;
        }
        let mut buf = [0u8; 4];
        for byte in c.encode_utf8(&mut buf).bytes() {
            let _ = write!(out, "%{:02X}", byte);
        }
    }
    match out.as_str() {
        "" => "%".to_string(),
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => out,
    }
}
