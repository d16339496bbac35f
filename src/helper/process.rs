use crate::helper::{AppLauncher, DisplayConnection, DisplaySession, DisplaySessionProvider, PidLookup, StopEvents};
use crate::lifecycle::ObserverId;
use crate::model::{ApplicationIdentity, StopEvent};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tokio::sync::mpsc;

type Observers = Arc<Mutex<HashMap<ObserverId, (String, mpsc::UnboundedSender<StopEvent>)>>>;

/// Starts helpers as child processes of the daemon. The child's PID is the
/// instance id and its exit is the stop event.
pub struct ProcessLauncher {
    helper_exec: PathBuf,
    pids: Arc<dyn PidLookup>,
    observers: Observers,
}

impl ProcessLauncher {
    pub fn new(helper_exec: impl Into<PathBuf>, pids: Arc<dyn PidLookup>) -> Self {
        Self {
            helper_exec: helper_exec.into(),
            pids,
            observers: Arc::default(),
        }
    }

    fn spawn(&self, helper_kind: &str, socket_uri: &str, app_id: &str, args: &[String]) -> Result<String> {
        let runtime = tokio::runtime::Handle::try_current().context("no async runtime to supervise the helper")?;
        let mut child = Command::new(&self.helper_exec)
            .args(args)
            .env("MIR_SOCKET", socket_uri)
            .spawn()
            .with_context(|| format!("failed to start {}", self.helper_exec.display()))?;
        let instance_id = child
            .id()
            .context("helper exited before its pid was known")?
            .to_string();

        let observers = Arc::clone(&self.observers);
        let helper_kind = helper_kind.to_string();
        let app_id = app_id.to_string();
        let instance = instance_id.clone();
        runtime.spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!(instance = %instance, %status, "helper exited"),
                Err(e) => tracing::warn!(instance = %instance, "failed to wait for helper: {e}"),
            }
            let observers = observers.lock().unwrap_or_else(|e| e.into_inner());
            for (id, (kind, tx)) in observers.iter() {
                if *kind != helper_kind {
                    continue;
                }
                let _ = tx.send(StopEvent {
                    observer: *id,
                    helper_kind: helper_kind.clone(),
                    app_id: app_id.clone(),
                    instance_id: instance.clone(),
                });
            }
        });
        Ok(instance_id)
    }
}

impl AppLauncher for ProcessLauncher {
    /// The requester's own process when it is still alive, else the first
    /// process named after the application.
    fn primary_pid(&self, app: &ApplicationIdentity) -> u32 {
        if is_running(app.pid) {
            return app.pid;
        }
        match self.pids.pids_of(&app.app_id) {
            Ok(pids) => pids.first().copied().unwrap_or(0),
            Err(e) => {
                tracing::debug!(app_id = %app.app_id, "no running process: {e:#}");
                0
            }
        }
    }

    fn start_helper(
        &self,
        helper_kind: &str,
        session: &dyn DisplaySession,
        app_id: &str,
        args: &[String],
    ) -> String {
        let uri = match session.socket_uri() {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(app_id, "session has no socket: {e:#}");
                return String::new();
            }
        };
        self.spawn(helper_kind, &uri, app_id, args).unwrap_or_else(|e| {
            tracing::warn!(app_id, "helper launch failed: {e:#}");
            String::new()
        })
    }

    fn add_stop_observer(&self, helper_kind: &str, observer: ObserverId) -> Result<StopEvents> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(observer, (helper_kind.to_string(), tx));
        Ok(rx)
    }

    fn remove_stop_observer(&self, observer: ObserverId) -> Result<()> {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&observer);
        Ok(())
    }
}

fn is_running(pid: u32) -> bool {
    pid != 0 && Path::new("/proc").join(pid.to_string()).exists()
}

/// Hands the trusted socket itself to the helper. The connection only proves
/// the display server is listening.
#[derive(Debug, Default)]
pub struct PassthroughSessions;

struct PassthroughConnection {
    path: PathBuf,
    _stream: UnixStream,
}

impl DisplayConnection for PassthroughConnection {
    fn socket_path(&self) -> &Path {
        &self.path
    }
}

struct PassthroughSession {
    uri: String,
}

impl DisplaySession for PassthroughSession {
    fn socket_uri(&self) -> Result<String> {
        Ok(self.uri.clone())
    }
}

impl DisplaySessionProvider for PassthroughSessions {
    fn connect(&self, socket_path: &Path, client_name: &str) -> Result<Box<dyn DisplayConnection>> {
        let stream = UnixStream::connect(socket_path)
            .with_context(|| format!("{client_name}: connect {}", socket_path.display()))?;
        Ok(Box::new(PassthroughConnection {
            path: socket_path.to_path_buf(),
            _stream: stream,
        }))
    }

    fn create_session(
        &self,
        connection: &dyn DisplayConnection,
        pid: u32,
    ) -> Result<Box<dyn DisplaySession>> {
        tracing::debug!(pid, "passthrough session");
        Ok(Box::new(PassthroughSession {
            uri: connection.socket_path().display().to_string(),
        }))
    }
}
