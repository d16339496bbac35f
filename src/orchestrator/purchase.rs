//! Purchase state machine.
//!
//! The calling task owns authorization and verification. A secondary task
//! drives the helper (session, launch, stop) and reports back only through
//! the completion channels.

use crate::error::PurchaseError;
use crate::helper::{HandOff, HelperDirectory, SessionLauncher};
use crate::idle::{ShutdownTimer, TimerHold};
use crate::lifecycle::LifecycleWatcher;
use crate::model::{ApplicationIdentity, PurchaseRequest, PurchaseState, TrustDecision, HELPER_KIND};
use crate::orchestrator::feedback::{completion, FeedbackSender};
use crate::store::{ItemDetails, ItemStore};
use crate::trust::{TrustGate, FEATURE_PURCHASE, PURCHASE_DESCRIPTION};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

fn transition(state: PurchaseState) {
    tracing::debug!(?state, terminal = state.is_terminal(), "purchase state");
}

/// Everything the helper task needs, cloned into it.
#[derive(Clone)]
pub struct HelperDriver {
    sessions: SessionLauncher,
    watcher: Arc<LifecycleWatcher>,
    helper_dir: HelperDirectory,
}

impl HelperDriver {
    pub fn new(sessions: SessionLauncher, watcher: Arc<LifecycleWatcher>, helper_dir: HelperDirectory) -> Self {
        Self {
            sessions,
            watcher,
            helper_dir,
        }
    }

    async fn drive(self, request: PurchaseRequest, feedback: FeedbackSender) {
        match self.run(&request).await {
            Ok(()) => feedback.finish(),
            Err(e) => feedback.fail(e),
        }
    }

    /// Directory scan, pid lookup and socket connect all block, so they run
    /// on the blocking pool.
    fn prepare(&self, requester: &ApplicationIdentity) -> Result<(String, HandOff), PurchaseError> {
        let app_id = self.helper_dir.app_id().ok_or_else(|| {
            let dir = self
                .helper_dir
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<no cache directory>".into());
            PurchaseError::IdentityResolution(format!("no helper installed in {dir}"))
        })?;
        let pid = self.sessions.resolve_pid(requester)?;
        let hand_off = self.sessions.create_session(pid)?;
        Ok((app_id, hand_off))
    }

    async fn run(&self, request: &PurchaseRequest) -> Result<(), PurchaseError> {
        transition(PurchaseState::SessionCreating);
        let (app_id, hand_off) = {
            let driver = self.clone();
            let requester = request.requester.clone();
            let span = tracing::Span::current();
            tokio::task::spawn_blocking(move || span.in_scope(|| driver.prepare(&requester)))
                .await
                .map_err(|e| PurchaseError::SessionCreation(format!("session setup task failed: {e}")))??
        };

        transition(PurchaseState::Launching);
        // Installed before launch so an immediate exit is not missed.
        let pending = self.watcher.watch(HELPER_KIND, &app_id)?;
        let observer = pending.observer_id();
        let helper = self
            .sessions
            .launch(&hand_off, HELPER_KIND, &app_id, &[request.purchase_url()])?;
        let wait = pending.arm(&helper.instance_id);

        transition(PurchaseState::AwaitingCompletion);
        tracing::debug!(observer, instance = %wait.helper().instance_id, "waiting for helper to stop");
        wait.stopped().await;
        drop(hand_off);
        Ok(())
    }
}

pub struct PurchaseOrchestrator {
    trust: TrustGate,
    helper: HelperDriver,
    store: Arc<ItemStore>,
    timer: Arc<dyn ShutdownTimer>,
    shutdown_timeout: Duration,
}

impl PurchaseOrchestrator {
    pub fn new(
        trust: TrustGate,
        helper: HelperDriver,
        store: Arc<ItemStore>,
        timer: Arc<dyn ShutdownTimer>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            trust,
            helper,
            store,
            timer,
            shutdown_timeout,
        }
    }

    /// Run one purchase to completion. The idle timer is held for the whole
    /// call, including every early return.
    pub async fn purchase(&self, request: PurchaseRequest) -> Result<ItemDetails, PurchaseError> {
        let span = tracing::info_span!(
            "purchase",
            package = %request.package_name,
            item = %request.item_name
        );
        async {
            let _hold = TimerHold::new(Arc::clone(&self.timer), self.shutdown_timeout);
            transition(PurchaseState::Idle);
            let result = self.run(request).await;
            match &result {
                Ok(_) => transition(PurchaseState::Done),
                Err(e) => {
                    transition(PurchaseState::Failed);
                    tracing::warn!(error = e.name(), "purchase failed: {e}");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, request: PurchaseRequest) -> Result<ItemDetails, PurchaseError> {
        if self.trust.requires_check(&request.package_name) {
            transition(PurchaseState::AuthChecking);
            self.authorize(&request).await?;
        }

        let (feedback, outcome) = completion();
        let package = request.package_name.clone();
        let item = request.item_name.clone();
        tokio::spawn(
            self.helper
                .clone()
                .drive(request, feedback)
                .instrument(tracing::Span::current()),
        );
        outcome.outcome().await?;

        transition(PurchaseState::Verifying);
        self.store
            .fetch_item(&package, &item)
            .await
            .map_err(|source| PurchaseError::Verification {
                item,
                source: Box::new(source),
            })
    }

    async fn authorize(&self, request: &PurchaseRequest) -> Result<(), PurchaseError> {
        let trust = self.trust.clone();
        let identity = request.requester.clone();
        let decision = tokio::task::spawn_blocking(move || {
            trust.authorize(&identity, FEATURE_PURCHASE, PURCHASE_DESCRIPTION)
        })
        .await
        .map_err(|e| PurchaseError::AuthorizationDenied(format!("trust query failed: {e}")))?;

        match decision {
            TrustDecision::Granted => Ok(()),
            TrustDecision::Denied => Err(PurchaseError::AuthorizationDenied(format!(
                "{} is not allowed to make purchases",
                request.requester.app_id
            ))),
        }
    }
}
