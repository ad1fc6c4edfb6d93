pub mod core;

use tracing_subscriber::EnvFilter;

pub use crate::core::error::{ModError, ModResult};
pub use crate::core::install::{InstallState, InstallTask, QuickModInstaller};
pub use crate::core::instance::{InstanceTarget, TargetEnvironment};
pub use crate::core::quickmod::{Catalog, PackageVersion};
pub use crate::core::settings::ResolverSettings;

/// Install structured logging. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,quickmod=debug")),
        )
        .try_init();
}
