mod catalog;
pub mod descriptor;
mod model;
mod relations;

pub use catalog::{Catalog, QuickModFile};
pub use descriptor::{parse_versions, VersionDescriptor};
pub use model::{InstallType, Library, ModArea, PackageVersion};
pub use relations::{Relation, RelationKind, RelationshipTable};
