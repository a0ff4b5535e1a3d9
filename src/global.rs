//! pag-profile global module.

use lazy_static::lazy_static;
use std::sync::atomic::{AtomicBool, Ordering};

lazy_static! {
    static ref VERBOSE: AtomicBool = AtomicBool::default();
}

/// Enable or disable stage progress logging.
pub fn set_verbose(v: bool) {
    VERBOSE.store(v, Ordering::Relaxed);
}

/// Get stage progress logging status.
pub fn verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Logs a pipeline stage when verbose logging is enabled.
pub fn stage(name: &str) {
    if verbose() {
        tracing::info!("Stage: {}...", name);
    }
}
