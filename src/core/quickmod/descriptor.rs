// ─── Version Descriptor ───
// Raw JSON shape of one version entry and its conversion to/from `PackageVersion`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::model::{InstallType, Library, PackageVersion};
use super::relations::{RelationKind, RelationshipTable};
use crate::core::cache::{Checksum, ChecksumKind};
use crate::core::downloader::{DownloadKind, DownloadSource};
use crate::core::error::{ModError, ModResult};
use crate::core::version::{PackageRef, Version, VersionRef, VersionReq};

/// One entry of a package's `versions` array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDescriptor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version_string: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub release_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mc_compat: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub depends: BTreeMap<String, RelationDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub recommends: BTreeMap<String, RelationDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub suggests: BTreeMap<String, RelationDescriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conflicts: BTreeMap<String, RelationDescriptor>,
    /// uid → version this entry stands in for.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provides: BTreeMap<String, String>,

    #[serde(default, alias = "sha1", skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<LibraryDescriptor>,
    #[serde(default, alias = "downloads", skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<DownloadDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    #[serde(default = "any_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mandatory: Option<bool>,
}

fn any_version() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryDescriptor {
    pub name: String,
    #[serde(default)]
    pub repo: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadDescriptor {
    pub url: String,
    #[serde(default = "direct_kind")]
    pub download_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

fn direct_kind() -> String {
    "direct".to_string()
}

/// Collects problems instead of failing on the first one, so a broken entry
/// still yields a (invalid) `PackageVersion` that can be reported.
#[derive(Default)]
struct Problems(Vec<String>);

impl Problems {
    fn take<T>(&mut self, result: ModResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.0.push(e.to_string());
                None
            }
        }
    }

    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(ModError::parse(field, message).to_string());
    }
}

impl PackageVersion {
    /// Build a version from its descriptor. Never fails: structural problems
    /// mark the result invalid and are listed in `problems`.
    pub fn from_descriptor(package: PackageRef, raw: &VersionDescriptor) -> Self {
        let mut problems = Problems::default();

        let version = problems
            .take(Version::parse(&raw.version))
            .unwrap_or_else(|| Version::opaque(&raw.version));

        let install_type = match raw.install_type.as_deref() {
            None => InstallType::ForgeMod,
            Some(tag) => problems
                .take(tag.parse::<InstallType>())
                .unwrap_or(InstallType::ForgeMod),
        };

        // ── Relationships ──
        let mut relations = RelationshipTable::new();
        let tables = [
            (RelationKind::Depends, &raw.depends),
            (RelationKind::Recommends, &raw.recommends),
            (RelationKind::Suggests, &raw.suggests),
            (RelationKind::Conflicts, &raw.conflicts),
        ];
        for (kind, table) in tables {
            for (uid, rel) in table {
                let mandatory = rel.mandatory.unwrap_or(kind.mandatory_by_default());
                let target = parse_target(&package, kind, uid, &rel.version, &mut problems);
                if let Some(target) = target {
                    relations.insert(kind, target, mandatory);
                }
            }
        }
        for (uid, provided) in &raw.provides {
            if let Some(target) =
                parse_target(&package, RelationKind::Provides, uid, provided, &mut problems)
            {
                relations.insert(RelationKind::Provides, target, false);
            }
        }

        // ── Artifact ──
        let mut checksum = None;
        let mut downloads = Vec::new();

        if install_type.has_artifact() {
            let kind = match raw.checksum_type.as_deref() {
                None => Some(ChecksumKind::default()),
                Some(tag) => problems.take(tag.parse::<ChecksumKind>()),
            };
            match (&raw.checksum, kind) {
                (Some(value), Some(kind)) => checksum = problems.take(Checksum::parse(kind, value)),
                (None, _) => problems.push("checksum", "artifact has no checksum"),
                _ => {}
            }

            for url in &raw.urls {
                if url.url.trim().is_empty() {
                    problems.push("urls", "download with empty url");
                    continue;
                }
                if let Some(kind) = problems.take(url.download_type.parse::<DownloadKind>()) {
                    downloads.push(DownloadSource {
                        kind,
                        url: url.url.trim().to_string(),
                        hint: url.hint.clone(),
                    });
                }
            }
            if downloads.is_empty() {
                problems.push("urls", "artifact has no usable download source");
            }
        } else if raw.checksum.is_some() || !raw.urls.is_empty() {
            debug!(
                "Ignoring checksum/downloads on group {}@{}",
                package, raw.version
            );
        }

        let mut libraries = Vec::new();
        for lib in &raw.libraries {
            let library = Library::new(lib.name.trim(), lib.repo.trim());
            if problems.take(library.artifact()).is_some() {
                libraries.push(library);
            }
        }

        let problems = problems.0;
        let valid = problems.is_empty();
        if !valid {
            warn!(
                "Invalid version {}@{}: {}",
                package,
                raw.version,
                problems.join("; ")
            );
        }

        Self {
            package,
            version,
            name: raw.name.clone(),
            version_string: raw.version_string.clone(),
            release_type: raw.release_type.clone(),
            mc_versions: raw.mc_compat.clone(),
            relations,
            checksum,
            install_type,
            libraries,
            downloads,
            valid,
            problems,
        }
    }

    /// Parse one JSON version entry. Entries that are not even shaped like a
    /// descriptor still produce an invalid version rather than an error.
    pub fn from_json(package: PackageRef, value: &serde_json::Value) -> Self {
        match serde_json::from_value::<VersionDescriptor>(value.clone()) {
            Ok(raw) => Self::from_descriptor(package, &raw),
            Err(e) => {
                let raw_version = value
                    .get("version")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                warn!("Malformed version entry for {}: {}", package, e);
                let mut broken = Self::from_descriptor(
                    package,
                    &VersionDescriptor {
                        version: raw_version,
                        install_type: Some("group".into()),
                        ..Default::default()
                    },
                );
                broken.valid = false;
                let reason = ModError::parse("descriptor", e.to_string());
                broken.problems.insert(0, reason.to_string());
                broken
            }
        }
    }

    /// Serialize back to the descriptor shape. Parsing the result yields an
    /// equivalent version.
    pub fn to_descriptor(&self) -> VersionDescriptor {
        let table = |kind: RelationKind| -> BTreeMap<String, RelationDescriptor> {
            self.relations
                .of_kind(kind)
                .map(|rel| {
                    (
                        rel.target.package.to_string(),
                        RelationDescriptor {
                            version: rel.target.req.to_string(),
                            mandatory: Some(rel.mandatory),
                        },
                    )
                })
                .collect()
        };

        VersionDescriptor {
            name: self.name.clone(),
            version: self.version.to_string(),
            version_string: self.version_string.clone(),
            release_type: self.release_type.clone(),
            mc_compat: self.mc_versions.clone(),
            depends: table(RelationKind::Depends),
            recommends: table(RelationKind::Recommends),
            suggests: table(RelationKind::Suggests),
            conflicts: table(RelationKind::Conflicts),
            provides: self
                .provides()
                .map(|target| (target.package.to_string(), target.req.to_string()))
                .collect(),
            checksum: self.checksum.as_ref().map(|c| c.value.clone()),
            checksum_type: self
                .checksum
                .as_ref()
                .filter(|c| c.kind != ChecksumKind::default())
                .map(|c| c.kind.to_string()),
            install_type: Some(self.install_type.to_string()),
            libraries: self
                .libraries
                .iter()
                .map(|lib| LibraryDescriptor {
                    name: lib.name.clone(),
                    repo: lib.repo.clone(),
                })
                .collect(),
            urls: self
                .downloads
                .iter()
                .map(|d| DownloadDescriptor {
                    url: d.url.clone(),
                    download_type: d.kind.to_string(),
                    hint: d.hint.clone(),
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> ModResult<serde_json::Value> {
        Ok(serde_json::to_value(self.to_descriptor())?)
    }
}

fn parse_target(
    owner: &PackageRef,
    kind: RelationKind,
    uid: &str,
    req: &str,
    problems: &mut Problems,
) -> Option<VersionRef> {
    let package = problems.take(PackageRef::parse(uid))?;
    if &package == owner {
        problems.push(
            &kind.to_string(),
            format!("{} refers to its own package", kind),
        );
        return None;
    }
    let req = problems.take(VersionReq::parse(req))?;
    Some(VersionRef::new(package, req))
}

/// Parse a package's whole `versions` array. Broken entries stay in the list
/// marked invalid so one bad entry never sinks the rest.
pub fn parse_versions(
    package: &PackageRef,
    versions: &serde_json::Value,
) -> ModResult<Vec<PackageVersion>> {
    let entries = versions.as_array().ok_or_else(|| {
        ModError::parse("versions", format!("expected an array for {}", package))
    })?;

    Ok(entries
        .iter()
        .map(|entry| PackageVersion::from_json(package.clone(), entry))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SHA: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";

    fn pkg() -> PackageRef {
        PackageRef::new("com.example.mod")
    }

    fn full_entry() -> serde_json::Value {
        json!({
            "name": "Example 1.2",
            "version": "1.2.0",
            "versionString": "1.2.0-mc1.7.10",
            "type": "release",
            "mcCompat": ["1.7.10"],
            "depends": { "core.lib": { "version": "[2.0,)", "mandatory": true } },
            "recommends": { "nei": { "version": "*", "mandatory": false } },
            "suggests": { "waila": { "version": "1.5", "mandatory": false } },
            "conflicts": { "old.mod": { "version": "(,3.0)", "mandatory": false } },
            "provides": { "example.api": "1.0" },
            "checksum": SHA,
            "installType": "forgeMod",
            "libraries": [{ "name": "org.example:helper:1.0", "repo": "https://maven.example.com" }],
            "urls": [
                { "url": "https://example.com/page", "downloadType": "browser" },
                { "url": "https://example.com/mod.jar", "downloadType": "direct", "hint": "jar" }
            ]
        })
    }

    #[test]
    fn parses_every_field() {
        let v = PackageVersion::from_json(pkg(), &full_entry());
        assert!(v.is_valid(), "{:?}", v.problems);
        assert_eq!(v.name(), "Example 1.2");
        assert_eq!(v.descriptor(), "1.2.0");
        assert_eq!(v.type_string(), "release");
        assert_eq!(v.mc_versions, vec!["1.7.10"]);
        assert_eq!(v.dependencies().count(), 1);
        assert!(v.dependencies().all(|d| d.mandatory));
        assert_eq!(v.recommendations().count(), 1);
        assert_eq!(v.suggestions().count(), 1);
        assert_eq!(v.conflicts().count(), 1);
        assert_eq!(v.provides().next().unwrap().to_string(), "example.api@1.0");
        assert_eq!(v.checksum.as_ref().unwrap().value, SHA);
        assert_eq!(v.install_type, InstallType::ForgeMod);
        assert_eq!(v.libraries.len(), 1);
        assert_eq!(v.downloads.len(), 2);
    }

    #[test]
    fn serializer_reproduces_the_descriptor() {
        let entry = full_entry();
        let v = PackageVersion::from_json(pkg(), &entry);
        assert_eq!(v.to_json().unwrap(), entry);

        let again = PackageVersion::from_descriptor(pkg(), &v.to_descriptor());
        assert_eq!(again, v);
    }

    #[test]
    fn legacy_sha1_field_is_accepted() {
        let v = PackageVersion::from_json(
            pkg(),
            &json!({ "version": "1", "sha1": SHA, "urls": [{ "url": "https://e.com/a.jar" }] }),
        );
        assert!(v.is_valid(), "{:?}", v.problems);
        assert_eq!(v.downloads[0].kind, DownloadKind::Direct);
    }

    #[test]
    fn depends_default_to_mandatory_others_do_not() {
        let v = PackageVersion::from_json(
            pkg(),
            &json!({
                "version": "1",
                "installType": "group",
                "depends": { "x": { "version": "1.0" } },
                "suggests": { "y": {} }
            }),
        );
        assert!(v.is_valid(), "{:?}", v.problems);
        assert!(v.dependencies().next().unwrap().mandatory);
        let suggestion = v.suggestions().next().unwrap();
        assert!(!suggestion.mandatory);
        assert_eq!(suggestion.target.req, VersionReq::Any);
    }

    #[test]
    fn bad_version_marks_entity_invalid() {
        let mut entry = full_entry();
        entry["version"] = json!("1..0");
        let v = PackageVersion::from_json(pkg(), &entry);
        assert!(!v.is_valid());
        assert_eq!(v.descriptor(), "1..0");
    }

    #[test]
    fn self_reference_marks_entity_invalid() {
        let mut entry = full_entry();
        entry["conflicts"] = json!({ "com.example.mod": { "version": "*" } });
        let v = PackageVersion::from_json(pkg(), &entry);
        assert!(!v.is_valid());
        assert!(v.conflicts().next().is_none());
    }

    #[test]
    fn artifact_without_sources_is_invalid() {
        let mut entry = full_entry();
        entry["urls"] = json!([]);
        assert!(!PackageVersion::from_json(pkg(), &entry).is_valid());
    }

    #[test]
    fn unknown_install_type_is_invalid() {
        let mut entry = full_entry();
        entry["installType"] = json!("bukkitPlugin");
        assert!(!PackageVersion::from_json(pkg(), &entry).is_valid());
    }

    #[test]
    fn group_ignores_artifact_fields() {
        let v = PackageVersion::from_json(
            pkg(),
            &json!({
                "version": "1.0",
                "installType": "group",
                "checksum": SHA,
                "urls": [{ "url": "https://e.com/a.jar" }]
            }),
        );
        assert!(v.is_valid());
        assert!(v.checksum.is_none());
        assert!(v.downloads.is_empty());
    }

    #[test]
    fn wrongly_shaped_entry_is_kept_as_invalid() {
        let v = PackageVersion::from_json(pkg(), &json!({ "version": "2.0", "mcCompat": "1.7.10" }));
        assert!(!v.is_valid());
        assert_eq!(v.descriptor(), "2.0");
    }

    #[test]
    fn parse_versions_keeps_going_past_bad_entries() {
        let list = json!([
            full_entry(),
            { "version": "" },
            { "version": "0.9", "installType": "group" }
        ]);
        let versions = parse_versions(&pkg(), &list).unwrap();
        assert_eq!(versions.len(), 3);
        assert_eq!(versions.iter().filter(|v| v.is_valid()).count(), 2);
    }

    #[test]
    fn parse_versions_rejects_non_array() {
        assert!(parse_versions(&pkg(), &json!({ "version": "1" })).is_err());
    }
}
