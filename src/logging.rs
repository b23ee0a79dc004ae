//! Logging initialization and runtime level updates
//!
//! `tracing` with an `EnvFilter` behind a reload layer, so the boundary API
//! can change the level while connections are live.

use parking_lot::Mutex;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::reload;

static RELOAD_HANDLE: Mutex<Option<reload::Handle<EnvFilter, tracing_subscriber::Registry>>> =
    Mutex::new(None);

/// Install the global subscriber with the given filter
///
/// Safe to call more than once; only the first call installs anything.
pub fn init(filter: &str) {
    let env_filter = EnvFilter::new(filter);
    let (reload_layer, handle) = reload::Layer::new(env_filter);
    let subscriber = tracing_subscriber::registry()
        .with(reload_layer)
        .with(tracing_subscriber::fmt::layer());
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        *RELOAD_HANDLE.lock() = Some(handle);
    }
}

/// Swap the active filter at runtime
///
/// Returns `false` when logging was never initialized or the filter fails
/// to apply.
pub fn set_level(filter: &str) -> bool {
    RELOAD_HANDLE
        .lock()
        .as_ref()
        .is_some_and(|handle| handle.reload(EnvFilter::new(filter)).is_ok())
}
