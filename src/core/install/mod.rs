mod installer;
mod task;

pub use installer::{InstallState, QuickModInstaller};
pub use task::InstallTask;
