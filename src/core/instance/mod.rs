pub mod manager;
pub mod model;
pub mod target;

pub use manager::InstanceTarget;
pub use model::{DeployRecord, InstanceLayout};
pub use target::TargetEnvironment;
