use crate::helper::{
    AppLauncher, HelperDirectory, PassthroughSessions, PidLookup, Pidof, ProcessLauncher, SessionLauncher,
};
use crate::idle::{IdleTimer, ShutdownTimer};
use crate::lifecycle::{LifecycleWatcher, ObserverRegistry};
use crate::model::{ServiceConfig, CLICK_SCOPE};
use crate::orchestrator::{HelperDriver, PayService, PurchaseOrchestrator};
use crate::store::{ItemStore, PayUrls, WebClient, DEFAULT_BASE_URL};
use crate::trust::{CommandTrustAgent, TrustGate};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{UnixListener, UnixStream};

const SOCKET_NAME: &str = "pay-service.sock";

#[derive(Debug, Parser, Clone)]
#[command(
    name = "pay-service",
    version,
    about = "Session daemon that brokers in-app purchases through a confined payment helper"
)]
pub struct Cli {
    /// Base URL of the store REST API
    #[arg(long, env = "PAY_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Exit after this long with no call in flight
    #[arg(long, default_value = "30s")]
    pub shutdown_timeout: humantime::Duration,

    /// Socket to accept calls on (default: $XDG_RUNTIME_DIR/pay-service.sock)
    #[arg(long, env = "PAY_SERVICE_SOCKET")]
    pub listen: Option<PathBuf>,

    /// Payment helper executable
    #[arg(long, default_value = "/usr/lib/payui/pay-ui")]
    pub helper_exec: PathBuf,

    /// Directory holding the helper's .desktop entry
    #[arg(long, env = "PAY_SERVICE_CLICK_DIR")]
    pub click_dir: Option<PathBuf>,

    /// Program asked for trust decisions; trust checking is off without one
    #[arg(long)]
    pub trust_agent: Option<PathBuf>,

    /// Extra argument for the trust agent, passed before the request (repeatable)
    #[arg(long = "trust-agent-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub trust_agent_args: Vec<String>,

    /// Device identifier sent to the store
    #[arg(long, env = "PAY_DEVICE_ID")]
    pub device_id: Option<String>,

    /// Preferred currency code for displayed prices
    #[arg(long, env = "U1_SEARCH_CURRENCY")]
    pub currency: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short)]
    pub verbose: bool,

    /// Print the resolved configuration as JSON and exit
    #[arg(long)]
    pub print_config: bool,
}

/// Build a `ServiceConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<ServiceConfig> {
    build_config_in(args, dirs::runtime_dir())
}

fn build_config_in(args: &Cli, runtime_dir: Option<PathBuf>) -> Result<ServiceConfig> {
    let socket_path = match (&args.listen, &runtime_dir) {
        (Some(path), _) => path.clone(),
        (None, Some(dir)) => dir.join(SOCKET_NAME),
        (None, None) => anyhow::bail!("XDG_RUNTIME_DIR is not set; pass --listen"),
    };
    Ok(ServiceConfig {
        base_url: args.base_url.clone(),
        shutdown_timeout: Duration::from(args.shutdown_timeout),
        socket_path,
        runtime_dir,
        click_dir: args.click_dir.clone(),
        helper_exec: args.helper_exec.clone(),
        trust_agent: args.trust_agent.clone(),
        trust_agent_args: args.trust_agent_args.clone(),
        pre_trusted_scopes: vec![CLICK_SCOPE.to_string()],
        device_id: args.device_id.clone(),
        currency: args.currency.clone(),
        user_agent: format!("pay-service/{}", env!("CARGO_PKG_VERSION")),
    })
}

fn trust_gate(cfg: &ServiceConfig) -> TrustGate {
    match &cfg.trust_agent {
        Some(program) => TrustGate::new(
            Arc::new(CommandTrustAgent::new(program.clone()).with_args(cfg.trust_agent_args.clone())),
            cfg.pre_trusted_scopes.clone(),
        ),
        None => {
            tracing::warn!("no trust agent configured, purchases are not trust-checked");
            TrustGate::disabled()
        }
    }
}

/// Wire the service for `cfg`. `timer` is held by every call.
fn build_service(cfg: &ServiceConfig, trust: TrustGate, timer: Arc<dyn ShutdownTimer>) -> Result<PayService> {
    let pids: Arc<dyn PidLookup> = Arc::new(Pidof);
    let launcher: Arc<dyn AppLauncher> = Arc::new(ProcessLauncher::new(cfg.helper_exec.clone(), Arc::clone(&pids)));
    let sessions = SessionLauncher::new(
        Arc::new(PassthroughSessions),
        Arc::clone(&launcher),
        pids,
        cfg.runtime_dir.clone(),
    );
    let watcher = Arc::new(LifecycleWatcher::new(Arc::new(ObserverRegistry::new()), launcher));
    let helper = HelperDriver::new(sessions, watcher, HelperDirectory::new(cfg.click_dir.clone()));

    let client = WebClient::new(&cfg.user_agent, cfg.device_id.as_deref())?;
    let store = Arc::new(ItemStore::new(
        Arc::new(client),
        PayUrls::new(&cfg.base_url),
        cfg.currency.clone(),
    ));
    let orchestrator = PurchaseOrchestrator::new(
        trust,
        helper,
        Arc::clone(&store),
        Arc::clone(&timer),
        cfg.shutdown_timeout,
    );
    Ok(PayService::new(store, orchestrator, timer, cfg.shutdown_timeout))
}

/// Bind `path`, replacing a socket only when nothing answers on it.
async fn bind(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        match UnixStream::connect(path).await {
            Ok(_) => anyhow::bail!("another instance is already listening on {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                tracing::debug!(socket = %path.display(), "removing stale socket");
                std::fs::remove_file(path)
                    .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("unable to probe existing socket {}", path.display()));
            }
        }
    }
    UnixListener::bind(path).with_context(|| format!("failed to listen on {}", path.display()))
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }

    let idle = IdleTimer::new(cfg.shutdown_timeout);
    let trust = trust_gate(&cfg);
    let service = build_service(&cfg, trust.clone(), Arc::new(idle.clone()))?;

    let listener = bind(&cfg.socket_path).await?;
    tracing::info!(
        socket = %cfg.socket_path.display(),
        timeout = %humantime::format_duration(cfg.shutdown_timeout),
        "pay service listening"
    );

    let res = crate::server::serve(listener, Arc::new(service), idle).await;

    trust.destroy();
    if let Err(e) = std::fs::remove_file(&cfg.socket_path) {
        tracing::debug!("failed to remove socket: {e}");
    }
    res
}
