//! One-shot "helper instance stopped" matcher.
//!
//! The matcher is installed before the helper is launched. Stop events are
//! buffered in the launcher's channel and only pumped into the registry once
//! the instance id is known, so a helper that exits immediately is still seen.

use crate::error::PurchaseError;
use crate::helper::{AppLauncher, StopEvents};
use crate::lifecycle::observers::{Observer, ObserverId, ObserverRegistry};
use crate::model::HelperInstance;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct LifecycleWatcher {
    registry: Arc<ObserverRegistry>,
    launcher: Arc<dyn AppLauncher>,
}

impl LifecycleWatcher {
    pub fn new(registry: Arc<ObserverRegistry>, launcher: Arc<dyn AppLauncher>) -> Self {
        Self { registry, launcher }
    }

    /// Install a matcher for stop events of `app_id`'s helpers of
    /// `helper_kind`. Call [`PendingStop::arm`] once the instance id is known.
    pub fn watch(&self, helper_kind: &str, app_id: &str) -> Result<PendingStop, PurchaseError> {
        let expected = Arc::new(OnceLock::<HelperInstance>::new());
        let (done_tx, done_rx) = oneshot::channel();

        let observer: Observer = {
            let expected = Arc::clone(&expected);
            let done_tx = Mutex::new(Some(done_tx));
            Arc::new(move |stop_app: &str, stop_instance: &str, _kind: &str| {
                let Some(helper) = expected.get() else {
                    return;
                };
                if !helper.matches(stop_app, stop_instance) {
                    return;
                }
                let tx = done_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
                if let Some(tx) = tx {
                    let _ = tx.send(());
                }
            })
        };

        let mut guard = ObserverGuard {
            id: self.registry.add(helper_kind, observer),
            registry: Arc::clone(&self.registry),
            launcher: Arc::clone(&self.launcher),
            launcher_registered: false,
        };
        let events = self
            .launcher
            .add_stop_observer(helper_kind, guard.id)
            .map_err(|e| PurchaseError::HelperReported(format!("failed to add stop observer: {e:#}")))?;
        guard.launcher_registered = true;
        tracing::debug!(observer = guard.id, helper_kind, app_id, "stop observer installed");

        Ok(PendingStop {
            helper_kind: helper_kind.to_string(),
            app_id: app_id.to_string(),
            expected,
            done: done_rx,
            events,
            guard,
        })
    }

    /// Install and arm in one step, for an instance that is already known.
    /// Launches go through [`Self::watch`] instead so an early exit is kept.
    #[cfg(test)]
    pub fn wait_for_stop(
        &self,
        helper_kind: &str,
        app_id: &str,
        instance_id: &str,
    ) -> Result<StopWait, PurchaseError> {
        Ok(self.watch(helper_kind, app_id)?.arm(instance_id))
    }
}

/// Installed matcher whose instance id is not known yet. Dropping it removes
/// the registration.
pub struct PendingStop {
    helper_kind: String,
    app_id: String,
    expected: Arc<OnceLock<HelperInstance>>,
    done: oneshot::Receiver<()>,
    events: StopEvents,
    guard: ObserverGuard,
}

impl PendingStop {
    pub fn observer_id(&self) -> ObserverId {
        self.guard.id
    }

    /// Start matching against `instance_id` and pumping buffered events.
    pub fn arm(self, instance_id: &str) -> StopWait {
        let helper = HelperInstance {
            helper_kind: self.helper_kind,
            app_id: self.app_id,
            instance_id: instance_id.to_string(),
        };
        let _ = self.expected.set(helper.clone());
        let registry = Arc::clone(&self.guard.registry);
        let mut events = self.events;
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                // The registration may be gone by the time the event arrives.
                let Some((observer, kind)) = registry.lookup(event.observer) else {
                    continue;
                };
                if kind != event.helper_kind {
                    continue;
                }
                observer(&event.app_id, &event.instance_id, &event.helper_kind);
            }
        });
        StopWait {
            helper,
            done: self.done,
            pump,
            _guard: self.guard,
        }
    }
}

/// Armed matcher. Resolves once the matching instance stops.
pub struct StopWait {
    helper: HelperInstance,
    done: oneshot::Receiver<()>,
    pump: JoinHandle<()>,
    _guard: ObserverGuard,
}

impl StopWait {
    pub fn helper(&self) -> &HelperInstance {
        &self.helper
    }

    /// Wait for the stop event. There is no upper bound on the wait.
    pub async fn stopped(mut self) {
        let _ = (&mut self.done).await;
        tracing::debug!(instance = %self.helper.instance_id, "helper stopped");
    }
}

impl Drop for StopWait {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Removes the registration from both the registry and the launcher.
struct ObserverGuard {
    id: ObserverId,
    registry: Arc<ObserverRegistry>,
    launcher: Arc<dyn AppLauncher>,
    launcher_registered: bool,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        if self.launcher_registered {
            if let Err(e) = self.launcher.remove_stop_observer(self.id) {
                tracing::warn!(observer = self.id, "failed to remove stop observer: {e:#}");
            }
        }
        self.registry.remove(self.id);
        tracing::trace!(observer = self.id, remaining = self.registry.len(), "stop observer removed");
    }
}
