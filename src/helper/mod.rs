//! The confined payment helper and the collaborators that start it.
//!
//! Display sessions and the application launcher sit behind traits so the
//! purchase flow does not care whether helpers are spawned directly or by a
//! platform launcher.

mod app_id;
mod pidof;
mod process;
mod session;
#[cfg(test)]
pub(crate) mod testing;

use crate::lifecycle::ObserverId;
use crate::model::{ApplicationIdentity, StopEvent};
use anyhow::Result;
use std::path::Path;
use tokio::sync::mpsc;

pub(crate) use app_id::HelperDirectory;
pub(crate) use pidof::Pidof;
pub(crate) use process::{PassthroughSessions, ProcessLauncher};
pub(crate) use session::{HandOff, SessionLauncher};

/// Stop events addressed to one observer handle.
pub type StopEvents = mpsc::UnboundedReceiver<StopEvent>;

/// Connection to the display server's trusted socket. Released on drop.
pub trait DisplayConnection: Send + Sync {
    fn socket_path(&self) -> &Path;
}

/// Session that lets a helper draw over a specific process. Released on drop.
pub trait DisplaySession: Send + Sync {
    fn socket_uri(&self) -> Result<String>;
}

pub trait DisplaySessionProvider: Send + Sync {
    fn connect(&self, socket_path: &Path, client_name: &str) -> Result<Box<dyn DisplayConnection>>;
    fn create_session(
        &self,
        connection: &dyn DisplayConnection,
        pid: u32,
    ) -> Result<Box<dyn DisplaySession>>;
}

/// Application launcher. Stop observers are known to it only by handle.
pub trait AppLauncher: Send + Sync {
    /// PID of the application's main process, 0 when it is not running.
    fn primary_pid(&self, app: &ApplicationIdentity) -> u32;
    /// Start a helper inside `session`. An empty instance id means the launch
    /// was rejected.
    fn start_helper(
        &self,
        helper_kind: &str,
        session: &dyn DisplaySession,
        app_id: &str,
        args: &[String],
    ) -> String;
    fn add_stop_observer(&self, helper_kind: &str, observer: ObserverId) -> Result<StopEvents>;
    fn remove_stop_observer(&self, observer: ObserverId) -> Result<()>;
}

/// Process-name lookup.
pub trait PidLookup: Send + Sync {
    fn pids_of(&self, process_name: &str) -> Result<Vec<u32>>;
}
