mod refs;
mod value;

pub use refs::{Bound, PackageRef, VersionRef, VersionReq};
pub use value::Version;
