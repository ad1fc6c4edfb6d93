use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::installer::{InstallState, QuickModInstaller};
use crate::core::error::{ModError, ModResult};
use crate::core::instance::TargetEnvironment;
use crate::core::quickmod::PackageVersion;

/// An install running in the background.
///
/// Cancelling only has an effect until the artifact is staged; once
/// placement starts the install runs to completion.
pub struct InstallTask {
    id: String,
    handle: JoinHandle<ModResult<InstallState>>,
    token: CancellationToken,
    state: watch::Receiver<InstallState>,
}

impl InstallTask {
    pub fn spawn(
        installer: Arc<QuickModInstaller>,
        version: PackageVersion,
        target: Arc<dyn TargetEnvironment>,
    ) -> Self {
        let id = version.id();
        let token = CancellationToken::new();
        let (tx, state) = watch::channel(InstallState::Pending);

        let handle = {
            let token = token.clone();
            tokio::spawn(async move {
                let result = installer
                    .install_with_token(&version, target.as_ref(), &token, Some(&tx))
                    .await;
                if let Err(e) = &result {
                    warn!("Install of {} failed: {}", version.id(), e);
                    tx.send_replace(InstallState::Failed(e.to_string()));
                }
                result
            })
        };

        Self {
            id,
            handle,
            token,
            state,
        }
    }

    /// `package@version` being installed.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn state(&self) -> InstallState {
        self.state.borrow().clone()
    }

    /// Receiver for state changes.
    pub fn subscribe(&self) -> watch::Receiver<InstallState> {
        self.state.clone()
    }

    pub async fn wait(self) -> ModResult<InstallState> {
        self.handle
            .await
            .map_err(|e| ModError::Other(format!("install task for {} panicked: {}", self.id, e)))?
    }
}

impl QuickModInstaller {
    /// Run an install on the tokio runtime.
    pub fn spawn(
        self: &Arc<Self>,
        version: PackageVersion,
        target: Arc<dyn TargetEnvironment>,
    ) -> InstallTask {
        InstallTask::spawn(self.clone(), version, target)
    }
}
