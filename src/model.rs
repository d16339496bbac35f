use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Reserved scope that is served by the dash rather than a standalone app.
pub const CLICK_SCOPE: &str = "click-scope";

/// Helper kind registered with the application launcher for the payment UI.
pub const HELPER_KIND: &str = "pay-ui";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    pub socket_path: PathBuf,
    pub runtime_dir: Option<PathBuf>,
    pub click_dir: Option<PathBuf>,
    pub helper_exec: PathBuf,
    pub trust_agent: Option<PathBuf>,
    pub trust_agent_args: Vec<String>,
    /// Scopes whose requests skip the trust store entirely.
    pub pre_trusted_scopes: Vec<String>,
    pub device_id: Option<String>,
    /// Preferred currency code for displayed prices.
    pub currency: Option<String>,
    pub user_agent: String,
}

/// The application on whose behalf a call is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationIdentity {
    pub uid: u32,
    pub pid: u32,
    pub app_id: String,
}

impl ApplicationIdentity {
    /// Build the identity of a caller from its resolved package name and the
    /// credentials of its connection.
    pub fn resolve(package_name: &str, uid: u32, pid: u32) -> Self {
        Self {
            uid,
            pid,
            app_id: package_name.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub package_name: String,
    pub item_name: String,
    pub requester: ApplicationIdentity,
}

impl PurchaseRequest {
    /// URL handed to the helper: `purchase://[package/]item`. The click scope
    /// buys packages, so its URL carries the item alone.
    pub fn purchase_url(&self) -> String {
        let mut url = String::from("purchase://");
        if self.package_name != CLICK_SCOPE {
            url.push_str(&self.package_name);
            url.push('/');
        }
        url.push_str(&self.item_name);
        url
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustDecision {
    Granted,
    Denied,
}

/// A running helper. `(app_id, instance_id)` identifies its stop event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperInstance {
    pub helper_kind: String,
    pub app_id: String,
    pub instance_id: String,
}

impl HelperInstance {
    pub fn matches(&self, app_id: &str, instance_id: &str) -> bool {
        self.app_id == app_id && self.instance_id == instance_id
    }
}

/// Purchase orchestration phases, mostly useful for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseState {
    Idle,
    AuthChecking,
    SessionCreating,
    Launching,
    AwaitingCompletion,
    Verifying,
    Done,
    Failed,
}

impl PurchaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PurchaseState::Done | PurchaseState::Failed)
    }
}

/// Notification that a helper stopped, tagged with the observer handle it is
/// addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopEvent {
    pub observer: u64,
    pub helper_kind: String,
    pub app_id: String,
    pub instance_id: String,
}
