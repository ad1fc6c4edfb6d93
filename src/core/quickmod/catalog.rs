use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{debug, info};

use super::descriptor::parse_versions;
use super::model::PackageVersion;
use super::relations::RelationKind;
use crate::core::error::ModResult;
use crate::core::version::{PackageRef, VersionRef};

/// A QuickMod file: one package and all its published versions.
#[derive(Debug, Deserialize)]
pub struct QuickModFile {
    pub uid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub versions: serde_json::Value,
}

/// All loaded versions, owned per package and sorted newest first.
///
/// Versions refer back to their package by identifier only. Refreshing the
/// catalog means dropping it and loading a new one.
#[derive(Debug, Default)]
pub struct Catalog {
    packages: BTreeMap<PackageRef, Vec<PackageVersion>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a QuickMod file's versions. Invalid entries are kept (and
    /// reported by `is_valid`) so the rest of the file still loads.
    pub fn load_file(&mut self, file: &QuickModFile) -> ModResult<PackageRef> {
        let package = PackageRef::parse(&file.uid)?;
        let versions = parse_versions(&package, &file.versions)?;
        info!(
            "Loaded {} versions of {} ({} invalid)",
            versions.len(),
            package,
            versions.iter().filter(|v| !v.is_valid()).count()
        );
        for version in versions {
            self.insert(version);
        }
        Ok(package)
    }

    pub fn load_json(&mut self, json: &str) -> ModResult<PackageRef> {
        let file: QuickModFile = serde_json::from_str(json)?;
        self.load_file(&file)
    }

    /// Add a version; an existing entry with the same version is replaced so
    /// `(package, version)` stays unique.
    pub fn insert(&mut self, version: PackageVersion) {
        let list = self.packages.entry(version.package.clone()).or_default();
        if let Some(existing) = list.iter_mut().find(|v| v.version == version.version) {
            debug!("Replacing duplicate {}", version.id());
            *existing = version;
        } else {
            list.push(version);
        }
        list.sort_by(|a, b| b.version.cmp(&a.version));
    }

    pub fn packages(&self) -> impl Iterator<Item = &PackageRef> + '_ {
        self.packages.keys()
    }

    /// Every version of `package`, newest first, including invalid ones.
    pub fn versions_of(&self, package: &PackageRef) -> &[PackageVersion] {
        self.packages
            .get(package)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Newest valid version of `package`.
    pub fn latest(&self, package: &PackageRef) -> Option<&PackageVersion> {
        self.versions_of(package).iter().find(|v| v.is_valid())
    }

    /// Newest valid version of the package itself that satisfies `wanted`.
    pub fn find_direct(&self, wanted: &VersionRef) -> Option<&PackageVersion> {
        self.versions_of(&wanted.package)
            .iter()
            .find(|v| v.is_valid() && wanted.is_satisfied_by(&v.package, &v.version))
    }

    /// Valid versions of *other* packages whose `provides` table satisfies `wanted`.
    pub fn providers_of(&self, wanted: &VersionRef) -> Vec<&PackageVersion> {
        self.other_versions(&wanted.package)
            .filter(|v| v.is_valid() && v.satisfies(wanted))
            .collect()
    }

    /// Resolve a reference: the package's own versions first, then providers.
    pub fn find(&self, wanted: &VersionRef) -> Option<&PackageVersion> {
        self.find_direct(wanted).or_else(|| {
            self.other_versions(&wanted.package)
                .find(|v| v.is_valid() && v.satisfies(wanted))
        })
    }

    fn other_versions<'a, 'b>(
        &'a self,
        excluded: &'b PackageRef,
    ) -> impl Iterator<Item = &'a PackageVersion> + 'b
    where
        'a: 'b,
    {
        self.packages
            .iter()
            .filter(move |(package, _)| *package != excluded)
            .flat_map(|(_, versions)| versions.iter())
    }

    pub fn is_available(&self, wanted: &VersionRef) -> bool {
        self.find(wanted).is_some()
    }

    /// Do `a` and `b` conflict? Conflict edges are directed, so both
    /// versions' tables are consulted.
    pub fn conflicts_between(a: &PackageVersion, b: &PackageVersion) -> bool {
        let hits = |from: &PackageVersion, to: &PackageVersion| {
            from.relations_of(RelationKind::Conflicts)
                .any(|c| to.satisfies(&c.target))
        };
        hits(a, b) || hits(b, a)
    }

    /// Mandatory dependencies of `version` that nothing in the catalog satisfies.
    pub fn unsatisfied_dependencies<'a>(
        &'a self,
        version: &'a PackageVersion,
    ) -> impl Iterator<Item = &'a VersionRef> + 'a {
        version
            .dependencies()
            .filter(|d| d.mandatory)
            .map(|d| &d.target)
            .filter(move |target| !self.is_available(target))
    }
}
