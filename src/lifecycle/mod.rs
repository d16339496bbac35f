//! Helper lifecycle tracking.
//!
//! Stop callbacks live in an [`ObserverRegistry`] owned by the service; the
//! [`LifecycleWatcher`] builds one-shot matchers on top of it.

mod observers;
mod watcher;

pub(crate) use observers::{ObserverId, ObserverRegistry};
pub(crate) use watcher::LifecycleWatcher;
