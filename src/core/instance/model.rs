use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::quickmod::{InstallType, ModArea, PackageVersion, RelationKind};
use crate::core::version::{PackageRef, Version, VersionRef, VersionReq};

/// What was deployed for one package, persisted per instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub package: PackageRef,
    pub version: Version,
    /// Hex digest of the deployed artifact; `None` for groups.
    pub checksum: Option<String>,
    pub install_type: InstallType,
    /// Files written, relative to the instance root.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// What this deployment stands in for (uid → version constraint).
    #[serde(default)]
    pub provides: BTreeMap<PackageRef, VersionReq>,
    pub deployed_at: DateTime<Utc>,
}

impl DeployRecord {
    pub fn new(version: &PackageVersion, files: Vec<PathBuf>) -> Self {
        Self {
            package: version.package.clone(),
            version: version.version.clone(),
            checksum: version.checksum.as_ref().map(|c| c.value.clone()),
            install_type: version.install_type,
            files,
            provides: version
                .relations_of(RelationKind::Provides)
                .map(|r| (r.target.package.clone(), r.target.req.clone()))
                .collect(),
            deployed_at: Utc::now(),
        }
    }

    /// Is this exactly `version` with the same artifact?
    pub fn is_same_deployment(&self, version: &PackageVersion) -> bool {
        self.package == version.package
            && self.version == version.version
            && self.checksum.as_deref() == version.checksum.as_ref().map(|c| c.value.as_str())
    }

    /// Does this deployment satisfy `wanted`, directly or via `provides`?
    pub fn satisfies(&self, wanted: &VersionRef) -> bool {
        if wanted.is_satisfied_by(&self.package, &self.version) {
            return true;
        }
        self.provides
            .get(&wanted.package)
            .is_some_and(|provided| match provided.exact() {
                Some(version) => wanted.req.matches(version),
                None => wanted.req == VersionReq::Any,
            })
    }
}

/// On-disk layout of an instance as far as mods are concerned.
///
/// - `minecraft/`  — game root, target of `Extract` installs
/// - `mods/`, `coremods/`, `litemods/` — one directory per mod area
/// - `config/`     — configuration overlays
/// - `libraries/`  — mod libraries, Maven layout
/// - `quickmods.json` — deploy records
#[derive(Debug, Clone)]
pub struct InstanceLayout {
    pub root: PathBuf,
}

impl InstanceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn game_dir(&self) -> PathBuf {
        self.root.join("minecraft")
    }

    pub fn mod_dir(&self, area: ModArea) -> PathBuf {
        self.root.join(area.dir_name())
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn libraries_dir(&self) -> PathBuf {
        self.root.join("libraries")
    }

    pub fn records_path(&self) -> PathBuf {
        self.root.join("quickmods.json")
    }

    /// Scratch space for archives, on the same filesystem as the targets so
    /// the final moves are renames.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(".staging")
    }

    /// Path relative to the root, for records.
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group_with_provides() -> PackageVersion {
        PackageVersion::from_json(
            PackageRef::new("fork"),
            &json!({
                "version": "2.0",
                "installType": "group",
                "provides": { "api": "1.4" }
            }),
        )
    }

    #[test]
    fn record_matches_only_same_version_and_checksum() {
        let v = group_with_provides();
        let record = DeployRecord::new(&v, vec![]);
        assert!(record.is_same_deployment(&v));

        let mut other = v.clone();
        other.version = Version::parse("2.1").unwrap();
        assert!(!record.is_same_deployment(&other));
    }

    #[test]
    fn record_satisfies_through_provides() {
        let record = DeployRecord::new(&group_with_provides(), vec![]);
        let api = |r: &str| VersionRef::new(PackageRef::new("api"), VersionReq::parse(r).unwrap());
        assert!(record.satisfies(&api("[1.0,2.0)")));
        assert!(!record.satisfies(&api("2.0")));
        assert!(record.satisfies(&VersionRef::exact(
            PackageRef::new("fork"),
            Version::parse("2.0").unwrap()
        )));
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = DeployRecord::new(&group_with_provides(), vec![PathBuf::from("mods/a.jar")]);
        let json = serde_json::to_string(&record).unwrap();
        let back: DeployRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn layout_keeps_areas_apart() {
        let layout = InstanceLayout::new("/inst");
        assert_eq!(layout.mod_dir(ModArea::Mods), PathBuf::from("/inst/mods"));
        assert_eq!(layout.mod_dir(ModArea::CoreMods), PathBuf::from("/inst/coremods"));
        assert_eq!(
            layout.relative(Path::new("/inst/config/a.cfg")),
            PathBuf::from("config/a.cfg")
        );
    }
}
