use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::version::{PackageRef, VersionRef};

/// Kind of edge from a version to another package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Depends,
    Recommends,
    Suggests,
    Conflicts,
    Provides,
}

impl RelationKind {
    pub const ALL: [RelationKind; 5] = [
        RelationKind::Depends,
        RelationKind::Recommends,
        RelationKind::Suggests,
        RelationKind::Conflicts,
        RelationKind::Provides,
    ];

    /// Whether a descriptor entry of this kind is mandatory when it does not say.
    pub fn mandatory_by_default(&self) -> bool {
        matches!(self, RelationKind::Depends)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationKind::Depends => write!(f, "depends"),
            RelationKind::Recommends => write!(f, "recommends"),
            RelationKind::Suggests => write!(f, "suggests"),
            RelationKind::Conflicts => write!(f, "conflicts"),
            RelationKind::Provides => write!(f, "provides"),
        }
    }
}

/// One directed edge. `mandatory` is meaningless for `Provides`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub target: VersionRef,
    pub mandatory: bool,
}

/// All relationships of one version, keyed by `(kind, target package)`.
///
/// Inserting a second edge of the same kind to the same package replaces
/// the first. Different kinds to the same package coexist. Edges are
/// directed: a conflict declared here says nothing about the reverse
/// direction, so consumers must check both versions' tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipTable {
    entries: BTreeMap<(RelationKind, PackageRef), Relation>,
}

impl RelationshipTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the replaced edge.
    pub fn insert(
        &mut self,
        kind: RelationKind,
        target: VersionRef,
        mandatory: bool,
    ) -> Option<Relation> {
        let key = (kind, target.package.clone());
        self.entries.insert(key, Relation { target, mandatory })
    }

    pub fn get(&self, kind: RelationKind, package: &PackageRef) -> Option<&Relation> {
        self.entries.get(&(kind, package.clone()))
    }

    /// Edges of one kind, ordered by target package.
    pub fn of_kind(&self, kind: RelationKind) -> impl Iterator<Item = &Relation> + '_ {
        self.entries
            .iter()
            .filter(move |((k, _), _)| *k == kind)
            .map(|(_, relation)| relation)
    }

    /// Every edge pointing at `package`, whatever its kind.
    pub fn towards<'a>(
        &'a self,
        package: &'a PackageRef,
    ) -> impl Iterator<Item = (RelationKind, &'a Relation)> + 'a {
        self.entries
            .iter()
            .filter(move |((_, p), _)| p == package)
            .map(|((kind, _), relation)| (*kind, relation))
    }

    pub fn iter(&self) -> impl Iterator<Item = (RelationKind, &Relation)> + '_ {
        self.entries.iter().map(|((kind, _), relation)| (*kind, relation))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::version::{Version, VersionReq};

    fn exact(pkg: &str, v: &str) -> VersionRef {
        VersionRef::exact(PackageRef::new(pkg), Version::parse(v).unwrap())
    }

    #[test]
    fn same_kind_same_target_is_last_write_wins() {
        let mut table = RelationshipTable::new();
        assert!(table.insert(RelationKind::Depends, exact("x", "1.0"), true).is_none());
        let replaced = table.insert(RelationKind::Depends, exact("x", "2.0"), false);

        assert_eq!(replaced.unwrap().target, exact("x", "1.0"));
        assert_eq!(table.of_kind(RelationKind::Depends).count(), 1);
        let current = table.get(RelationKind::Depends, &PackageRef::new("x")).unwrap();
        assert_eq!(current.target, exact("x", "2.0"));
        assert!(!current.mandatory);
    }

    #[test]
    fn different_kinds_to_same_target_coexist() {
        let mut table = RelationshipTable::new();
        table.insert(RelationKind::Recommends, exact("x", "1.0"), false);
        table.insert(
            RelationKind::Conflicts,
            VersionRef::new(PackageRef::new("x"), VersionReq::parse("(,1.0)").unwrap()),
            false,
        );

        let x = PackageRef::new("x");
        let kinds: Vec<_> = table.towards(&x).map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![RelationKind::Recommends, RelationKind::Conflicts]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn of_kind_filters_and_orders_by_package() {
        let mut table = RelationshipTable::new();
        table.insert(RelationKind::Depends, exact("b", "1"), true);
        table.insert(RelationKind::Suggests, exact("c", "1"), false);
        table.insert(RelationKind::Depends, exact("a", "1"), true);

        let deps: Vec<_> = table
            .of_kind(RelationKind::Depends)
            .map(|r| r.target.package.as_str().to_string())
            .collect();
        assert_eq!(deps, vec!["a", "b"]);
    }
}
