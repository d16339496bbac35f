use crate::error::PurchaseError;
use crate::helper::{AppLauncher, DisplayConnection, DisplaySession, DisplaySessionProvider, PidLookup};
use crate::model::{ApplicationIdentity, HelperInstance, CLICK_SCOPE};
use std::path::PathBuf;
use std::sync::Arc;

pub const TRUSTED_SOCKET_NAME: &str = "mir_socket_trusted";
pub const CLIENT_NAME: &str = "pay-service";

/// Process the click scope's helper is overlaid on.
pub const OVERLAY_PROCESS: &str = "unity8-dash";

/// A display session and the connection it was created on. Fields drop in
/// declaration order, so the session is released before its connection.
pub struct HandOff {
    session: Box<dyn DisplaySession>,
    _connection: Box<dyn DisplayConnection>,
}

impl HandOff {
    pub fn session(&self) -> &dyn DisplaySession {
        self.session.as_ref()
    }
}

/// Creates display hand-off sessions and starts helpers inside them.
#[derive(Clone)]
pub struct SessionLauncher {
    provider: Arc<dyn DisplaySessionProvider>,
    launcher: Arc<dyn AppLauncher>,
    pids: Arc<dyn PidLookup>,
    runtime_dir: Option<PathBuf>,
}

impl SessionLauncher {
    pub fn new(
        provider: Arc<dyn DisplaySessionProvider>,
        launcher: Arc<dyn AppLauncher>,
        pids: Arc<dyn PidLookup>,
        runtime_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            provider,
            launcher,
            pids,
            runtime_dir,
        }
    }

    /// PID the helper should be overlaid on for `requester`.
    pub fn resolve_pid(&self, requester: &ApplicationIdentity) -> Result<u32, PurchaseError> {
        let package_name = requester.app_id.as_str();
        if package_name == CLICK_SCOPE {
            let pids = self.pids.pids_of(OVERLAY_PROCESS).map_err(|e| {
                PurchaseError::ProcessResolution {
                    app_id: package_name.to_string(),
                    reason: format!("{e:#}"),
                }
            })?;
            return match pids.first() {
                Some(&pid) if pid != 0 => Ok(pid),
                _ => Err(PurchaseError::ProcessResolution {
                    app_id: package_name.to_string(),
                    reason: format!("{OVERLAY_PROCESS} is not running"),
                }),
            };
        }

        match self.launcher.primary_pid(requester) {
            0 => Err(PurchaseError::ProcessResolution {
                app_id: package_name.to_string(),
                reason: "No such application is running".into(),
            }),
            pid => Ok(pid),
        }
    }

    /// Open a session on the trusted socket scoped to `pid`.
    pub fn create_session(&self, pid: u32) -> Result<HandOff, PurchaseError> {
        let runtime_dir = self.runtime_dir.as_ref().ok_or_else(|| {
            PurchaseError::SessionCreation("no runtime directory to find the trusted socket in".into())
        })?;
        let socket_path = runtime_dir.join(TRUSTED_SOCKET_NAME);

        let connection = self
            .provider
            .connect(&socket_path, CLIENT_NAME)
            .map_err(|e| {
                PurchaseError::SessionCreation(format!(
                    "unable to connect to {}: {e:#}",
                    socket_path.display()
                ))
            })?;
        let session = self
            .provider
            .create_session(connection.as_ref(), pid)
            .map_err(|e| PurchaseError::SessionCreation(format!("{e:#}")))?;
        tracing::debug!(pid, socket = %socket_path.display(), "display session created");

        Ok(HandOff {
            session,
            _connection: connection,
        })
    }

    /// Start `app_id` as a `helper_kind` helper inside `hand_off`.
    pub fn launch(
        &self,
        hand_off: &HandOff,
        helper_kind: &str,
        app_id: &str,
        args: &[String],
    ) -> Result<HelperInstance, PurchaseError> {
        // Fail before starting anything if the session cannot be shared.
        hand_off
            .session()
            .socket_uri()
            .map_err(|e| PurchaseError::Launch(format!("unable to get session socket: {e:#}")))?;

        let instance_id = self
            .launcher
            .start_helper(helper_kind, hand_off.session(), app_id, args);
        if instance_id.is_empty() {
            return Err(PurchaseError::Launch(format!(
                "the launcher rejected helper \"{app_id}\""
            )));
        }
        let helper = HelperInstance {
            helper_kind: helper_kind.to_string(),
            app_id: app_id.to_string(),
            instance_id,
        };
        tracing::info!(kind = %helper.helper_kind, app_id, instance = %helper.instance_id, "helper started");
        Ok(helper)
    }
}
