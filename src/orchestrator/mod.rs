//! Purchase orchestration and the call surface built on it.
//!
//! [`PayService`] is what the transport calls into. Purchases are handed to
//! [`PurchaseOrchestrator`]; the other calls go straight to the item store.

mod feedback;
mod purchase;
mod service;

pub(crate) use purchase::{HelperDriver, PurchaseOrchestrator};
pub(crate) use service::PayService;

#[cfg(test)]
pub(crate) use service::testing;
