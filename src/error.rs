//! Errors surfaced to callers of the purchase surface.

use thiserror::Error;

/// Every failure a bus caller can observe. Each variant renders to the single
/// descriptive message that is sent back over the wire.
#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("access denied: {0}")]
    AuthorizationDenied(String),

    #[error("unable to determine the helper application id: {0}")]
    IdentityResolution(String),

    #[error("unable to get PID for \"{app_id}\": {reason}")]
    ProcessResolution { app_id: String, reason: String },

    #[error("unable to create display session: {0}")]
    SessionCreation(String),

    #[error("unable to launch helper: {0}")]
    Launch(String),

    #[error("{0}")]
    HelperReported(String),

    #[error("unable to verify purchase of \"{item}\": {source}")]
    Verification {
        item: String,
        #[source]
        source: Box<PurchaseError>,
    },

    #[error("Unable to find item '{item}' for package '{package}': {source}")]
    ItemNotFound {
        item: String,
        package: String,
        #[source]
        source: Box<PurchaseError>,
    },

    #[error("InvalidArgs: {0}")]
    InvalidRequest(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("RequestError: {0}")]
    Request(String),

    #[error("ParseError: {0}")]
    Parse(String),
}

impl PurchaseError {
    /// Stable error name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            PurchaseError::AuthorizationDenied(_) => "AuthorizationDenied",
            PurchaseError::IdentityResolution(_) => "IdentityResolution",
            PurchaseError::ProcessResolution { .. } => "ProcessResolution",
            PurchaseError::SessionCreation(_) => "SessionCreation",
            PurchaseError::Launch(_) => "Launch",
            PurchaseError::HelperReported(_) => "Failed",
            PurchaseError::Verification { .. } => "Verification",
            PurchaseError::ItemNotFound { .. } => "ItemNotFound",
            PurchaseError::InvalidRequest(_) => "InvalidArgs",
            PurchaseError::Unsupported(_) => "Unsupported",
            PurchaseError::Request(_) => "RequestError",
            PurchaseError::Parse(_) => "ParseError",
        }
    }
}
