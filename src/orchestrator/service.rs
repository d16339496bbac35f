use crate::error::PurchaseError;
use crate::idle::{ShutdownTimer, TimerHold};
use crate::model::{ApplicationIdentity, PurchaseRequest};
use crate::orchestrator::PurchaseOrchestrator;
use crate::store::{ItemDetails, ItemStore};
use std::sync::Arc;
use std::time::Duration;

/// The inbound call surface. Every call holds the idle timer while it runs.
pub struct PayService {
    store: Arc<ItemStore>,
    orchestrator: PurchaseOrchestrator,
    timer: Arc<dyn ShutdownTimer>,
    shutdown_timeout: Duration,
}

impl PayService {
    pub fn new(
        store: Arc<ItemStore>,
        orchestrator: PurchaseOrchestrator,
        timer: Arc<dyn ShutdownTimer>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            store,
            orchestrator,
            timer,
            shutdown_timeout,
        }
    }

    fn hold(&self) -> TimerHold {
        TimerHold::new(Arc::clone(&self.timer), self.shutdown_timeout)
    }

    pub async fn get_item(&self, package: &str, item: &str) -> Result<ItemDetails, PurchaseError> {
        let _hold = self.hold();
        self.store.fetch_item(package, item).await
    }

    pub async fn get_purchased_items(&self, package: &str) -> Result<Vec<ItemDetails>, PurchaseError> {
        let _hold = self.hold();
        self.store.purchased_items(package).await
    }

    /// The orchestrator holds the timer itself.
    pub async fn purchase_item(
        &self,
        package: &str,
        item: &str,
        requester: ApplicationIdentity,
    ) -> Result<ItemDetails, PurchaseError> {
        self.orchestrator
            .purchase(PurchaseRequest {
                package_name: package.to_string(),
                item_name: item.to_string(),
                requester,
            })
            .await
    }

    pub async fn acknowledge_item(&self, package: &str, item: &str) -> Result<ItemDetails, PurchaseError> {
        let _hold = self.hold();
        self.store.acknowledge(package, item).await
    }

    pub async fn refund_item(&self, package: &str, item: &str) -> Result<ItemDetails, PurchaseError> {
        let _hold = self.hold();
        self.store.refund(package, item).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::helper::testing::{FakeLauncher, FakePids, FakeSessions};
    use crate::helper::{HelperDirectory, SessionLauncher};
    use crate::lifecycle::{LifecycleWatcher, ObserverRegistry};
    use crate::orchestrator::HelperDriver;
    use crate::store::testing::{store_with, MockClient};
    use crate::trust::TrustGate;
    use std::path::PathBuf;

    /// Service over fakes that stop every helper as soon as it starts.
    pub fn service_with(client: MockClient, timer: Arc<dyn ShutdownTimer>, helper_dir: PathBuf) -> PayService {
        let launcher = Arc::new(FakeLauncher::default());
        launcher.stop_on_start();
        let sessions = SessionLauncher::new(
            Arc::new(FakeSessions::default()),
            launcher.clone(),
            Arc::new(FakePids::default()),
            Some(PathBuf::from("/run/user/1000")),
        );
        let watcher = Arc::new(LifecycleWatcher::new(Arc::new(ObserverRegistry::new()), launcher));
        let helper = HelperDriver::new(sessions, watcher, HelperDirectory::new(Some(helper_dir)));
        let store = Arc::new(store_with(client));
        let timeout = Duration::from_secs(30);
        let orchestrator = PurchaseOrchestrator::new(
            TrustGate::disabled(),
            helper,
            Arc::clone(&store),
            Arc::clone(&timer),
            timeout,
        );
        PayService::new(store, orchestrator, timer, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::service_with;
    use super::*;
    use crate::idle::testing::CountingTimer;
    use crate::model::CLICK_SCOPE;
    use crate::store::testing::MockClient;
    use crate::store::{item_state, ItemValue};

    fn client_returning(body: &'static str) -> MockClient {
        let mut client = MockClient::new();
        client.expect_call().returning(move |_, _, _, _| Ok(body.to_string()));
        client
    }

    fn setup(client: MockClient) -> (PayService, Arc<CountingTimer>, tempfile::TempDir) {
        let timer = Arc::new(CountingTimer::default());
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("payui_app.desktop"), b"").unwrap();
        let service = service_with(client, timer.clone(), dir.path().to_path_buf());
        (service, timer, dir)
    }

    #[tokio::test]
    async fn get_item_holds_the_timer() {
        let (service, timer, _dir) = setup(client_returning(r#"{"id": 1, "sku": "consumable", "state": "available"}"#));
        let item = service.get_item("foo.example", "consumable").await.unwrap();
        assert_eq!(item_state(&item), Some("available"));
        assert_eq!((timer.pauses(), timer.resets()), (1, 1));
    }

    #[tokio::test]
    async fn click_scope_item_defaults_to_unrefundable() {
        let (service, timer, _dir) = setup(client_returning("{}"));
        let item = service.get_item(CLICK_SCOPE, "foo.example").await.unwrap();
        assert_eq!(item.get("sku").and_then(ItemValue::as_str), Some("foo.example"));
        assert_eq!(item.get("refundable_until"), Some(&ItemValue::Uint(0)));
        assert_eq!((timer.pauses(), timer.resets()), (1, 1));
    }

    #[tokio::test]
    async fn purchased_items_hold_the_timer() {
        let (service, timer, _dir) = setup(client_returning(
            r#"[{"package_name": "foobar.example", "refundable_until": null, "state": "Complete"}]"#,
        ));
        let items = service.get_purchased_items(CLICK_SCOPE).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!((timer.pauses(), timer.resets()), (1, 1));
    }

    #[tokio::test]
    async fn unsupported_calls_still_reset_the_timer() {
        let mut client = MockClient::new();
        client.expect_call().times(0);
        let (service, timer, _dir) = setup(client);

        assert!(matches!(
            service.acknowledge_item(CLICK_SCOPE, "foo.example").await,
            Err(PurchaseError::Unsupported(_))
        ));
        assert!(matches!(
            service.refund_item("foo.example", "sword").await,
            Err(PurchaseError::Unsupported(_))
        ));
        assert_eq!((timer.pauses(), timer.resets()), (2, 2));
    }

    #[tokio::test]
    async fn acknowledge_returns_updated_item() {
        let (service, timer, _dir) = setup(client_returning(r#"{"id": 5, "sku": "unlockable", "state": "purchased"}"#));
        let item = service.acknowledge_item("foo.example", "unlockable").await.unwrap();
        assert_eq!(item_state(&item), Some("purchased"));
        assert_eq!((timer.pauses(), timer.resets()), (1, 1));
    }

    #[tokio::test]
    async fn purchase_pauses_and_resets_once() {
        let (service, timer, _dir) = setup(client_returning(r#"{"id": 1, "sku": "sword", "state": "purchased"}"#));
        let requester = ApplicationIdentity::resolve("foo.example", 1000, 2468);
        let item = service.purchase_item("foo.example", "sword", requester).await.unwrap();
        assert_eq!(item_state(&item), Some("purchased"));
        assert_eq!((timer.pauses(), timer.resets()), (1, 1));
    }
}
