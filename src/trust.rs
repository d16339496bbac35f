//! Trust-store authorization.
//!
//! Purchases are gated on the user's recorded consent. The agent replies with
//! a raw answer code; only [`ANSWER_GRANTED`] lets a purchase through.

use crate::model::{ApplicationIdentity, TrustDecision};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const ANSWER_DENIED: i32 = 0;
pub const ANSWER_GRANTED: i32 = 1;

/// Feature identifier for in-app purchases.
pub const FEATURE_PURCHASE: u64 = 0;

/// Prompt template; `%1%` is replaced by the agent with the app's name.
pub const PURCHASE_DESCRIPTION: &str = "%1% wants to make a purchase.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestParameters {
    pub application: ApplicationIdentity,
    pub feature: u64,
    pub description: String,
}

/// Remote authority that records and replays consent decisions.
pub trait TrustAgent: Send + Sync {
    fn authenticate(&self, params: &RequestParameters) -> i32;
    /// Release the agent. Safe to call any number of times.
    fn destroy(&self);
}

impl TrustDecision {
    /// Unknown codes never grant.
    pub fn from_answer_code(code: i32) -> Self {
        match code {
            ANSWER_GRANTED => TrustDecision::Granted,
            ANSWER_DENIED => TrustDecision::Denied,
            other => {
                tracing::warn!(code = other, "unrecognized trust answer, denying");
                TrustDecision::Denied
            }
        }
    }
}

/// Decides whether a request needs the trust store and asks it.
#[derive(Clone)]
pub struct TrustGate {
    agent: Option<Arc<dyn TrustAgent>>,
    pre_trusted: Vec<String>,
}

impl TrustGate {
    pub fn new(agent: Arc<dyn TrustAgent>, pre_trusted: Vec<String>) -> Self {
        Self {
            agent: Some(agent),
            pre_trusted,
        }
    }

    /// A gate that never consults an agent.
    pub fn disabled() -> Self {
        Self {
            agent: None,
            pre_trusted: Vec::new(),
        }
    }

    pub fn requires_check(&self, package_name: &str) -> bool {
        self.agent.is_some() && !self.pre_trusted.iter().any(|s| s == package_name)
    }

    pub fn authorize(
        &self,
        identity: &ApplicationIdentity,
        feature: u64,
        description: &str,
    ) -> TrustDecision {
        let Some(agent) = self.agent.as_ref() else {
            return TrustDecision::Denied;
        };
        let params = RequestParameters {
            application: identity.clone(),
            feature,
            description: description.to_string(),
        };
        let code = agent.authenticate(&params);
        let decision = TrustDecision::from_answer_code(code);
        tracing::debug!(app_id = %identity.app_id, code, ?decision, "trust store answered");
        decision
    }

    pub fn destroy(&self) {
        if let Some(agent) = self.agent.as_ref() {
            agent.destroy();
        }
    }
}

/// Agent backed by an external program. The program receives uid, pid, app
/// id, feature and description as arguments and prints the answer code.
pub struct CommandTrustAgent {
    program: PathBuf,
    leading_args: Vec<String>,
    destroyed: AtomicBool,
}

impl CommandTrustAgent {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Arguments passed before the request parameters.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn run(&self, params: &RequestParameters) -> Result<i32> {
        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .arg(params.application.uid.to_string())
            .arg(params.application.pid.to_string())
            .arg(&params.application.app_id)
            .arg(params.feature.to_string())
            .arg(&params.description)
            .output()
            .with_context(|| format!("failed to run {}", self.program.display()))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<i32>()
            .with_context(|| format!("invalid answer {:?}", stdout.trim()))
    }
}

impl TrustAgent for CommandTrustAgent {
    fn authenticate(&self, params: &RequestParameters) -> i32 {
        if self.destroyed.load(Ordering::Acquire) {
            return -1;
        }
        match self.run(params) {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!("trust agent failed: {e:#}");
                -1
            }
        }
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}
