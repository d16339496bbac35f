//! In-memory launcher, display sessions and pid lookup for tests.

use super::{AppLauncher, DisplayConnection, DisplaySession, DisplaySessionProvider, PidLookup, StopEvents};
use crate::lifecycle::ObserverId;
use crate::model::{ApplicationIdentity, StopEvent};
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Launcher that records started helpers and lets tests emit stop events.
pub struct FakeLauncher {
    primary_pid: Mutex<u32>,
    instance_id: Mutex<String>,
    stop_on_start: Mutex<Option<String>>,
    refuse: AtomicBool,
    observers: Mutex<HashMap<ObserverId, (String, mpsc::UnboundedSender<StopEvent>)>>,
    started: Mutex<Vec<(String, Vec<String>)>>,
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self {
            primary_pid: Mutex::new(4321),
            instance_id: Mutex::new("12345".into()),
            stop_on_start: Mutex::new(None),
            refuse: AtomicBool::new(false),
            observers: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
        }
    }
}

impl FakeLauncher {
    pub fn set_primary_pid(&self, pid: u32) {
        *self.primary_pid.lock().unwrap() = pid;
    }

    pub fn set_instance_id(&self, id: &str) {
        *self.instance_id.lock().unwrap() = id.into();
    }

    /// Report the started helper as stopped as soon as it starts.
    pub fn stop_on_start(&self) {
        let id = self.instance_id.lock().unwrap().clone();
        *self.stop_on_start.lock().unwrap() = Some(id);
    }

    /// Report `instance_id` as stopped whenever a helper starts.
    pub fn stop_instance_on_start(&self, instance_id: &str) {
        *self.stop_on_start.lock().unwrap() = Some(instance_id.into());
    }

    pub fn refuse_observers(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// Deliver a stop event to every observer.
    pub fn stop(&self, app_id: &str, instance_id: &str) {
        for (id, (kind, tx)) in self.observers.lock().unwrap().iter() {
            let _ = tx.send(StopEvent {
                observer: *id,
                helper_kind: kind.clone(),
                app_id: app_id.into(),
                instance_id: instance_id.into(),
            });
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap().len()
    }

    /// `(app_id, args)` of every helper started.
    pub fn started(&self) -> Vec<(String, Vec<String>)> {
        self.started.lock().unwrap().clone()
    }
}

impl AppLauncher for FakeLauncher {
    fn primary_pid(&self, _app: &ApplicationIdentity) -> u32 {
        *self.primary_pid.lock().unwrap()
    }

    fn start_helper(
        &self,
        _helper_kind: &str,
        _session: &dyn DisplaySession,
        app_id: &str,
        args: &[String],
    ) -> String {
        self.started
            .lock()
            .unwrap()
            .push((app_id.to_string(), args.to_vec()));
        let instance_id = self.instance_id.lock().unwrap().clone();
        if instance_id.is_empty() {
            return instance_id;
        }
        let stop = self.stop_on_start.lock().unwrap().clone();
        if let Some(stopped) = stop {
            self.stop(app_id, &stopped);
        }
        instance_id
    }

    fn add_stop_observer(&self, helper_kind: &str, observer: ObserverId) -> Result<StopEvents> {
        if self.refuse.load(Ordering::SeqCst) {
            bail!("launcher refused observer");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers
            .lock()
            .unwrap()
            .insert(observer, (helper_kind.to_string(), tx));
        Ok(rx)
    }

    fn remove_stop_observer(&self, observer: ObserverId) -> Result<()> {
        self.observers.lock().unwrap().remove(&observer);
        Ok(())
    }
}

/// Display sessions that count how many are alive.
#[derive(Default)]
pub struct FakeSessions {
    created: AtomicUsize,
    open: Arc<AtomicUsize>,
    fail_connect: AtomicBool,
    fail_socket_uri: AtomicBool,
    last_socket: Mutex<Option<PathBuf>>,
}

impl FakeSessions {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn last_socket(&self) -> Option<PathBuf> {
        self.last_socket.lock().unwrap().clone()
    }

    pub fn fail_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn fail_socket_uri(&self) {
        self.fail_socket_uri.store(true, Ordering::SeqCst);
    }
}

struct FakeConnection {
    path: PathBuf,
}

impl DisplayConnection for FakeConnection {
    fn socket_path(&self) -> &Path {
        &self.path
    }
}

struct FakeSession {
    open: Arc<AtomicUsize>,
    fail_uri: bool,
}

impl DisplaySession for FakeSession {
    fn socket_uri(&self) -> Result<String> {
        if self.fail_uri {
            bail!("no socket for session");
        }
        Ok("fd://7".into())
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DisplaySessionProvider for FakeSessions {
    fn connect(&self, socket_path: &Path, _client_name: &str) -> Result<Box<dyn DisplayConnection>> {
        *self.last_socket.lock().unwrap() = Some(socket_path.to_path_buf());
        if self.fail_connect.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(Box::new(FakeConnection {
            path: socket_path.to_path_buf(),
        }))
    }

    fn create_session(
        &self,
        _connection: &dyn DisplayConnection,
        _pid: u32,
    ) -> Result<Box<dyn DisplaySession>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            open: Arc::clone(&self.open),
            fail_uri: self.fail_socket_uri.load(Ordering::SeqCst),
        }))
    }
}

/// Fixed pid lookup.
pub struct FakePids {
    pids: Vec<u32>,
    delay: Duration,
    queries: Mutex<Vec<String>>,
}

impl Default for FakePids {
    fn default() -> Self {
        Self::with(&[4321])
    }
}

impl FakePids {
    pub fn with(pids: &[u32]) -> Self {
        Self {
            pids: pids.to_vec(),
            delay: Duration::ZERO,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Block the calling thread for `delay` on every lookup.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl PidLookup for FakePids {
    fn pids_of(&self, process_name: &str) -> Result<Vec<u32>> {
        self.queries.lock().unwrap().push(process_name.to_string());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(self.pids.clone())
    }
}
