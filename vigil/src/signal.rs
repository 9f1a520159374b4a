//! Shutdown signalling for the periodic driver.
//!
//! Both SIGTERM and Ctrl-C set the same flag; the driver checks it between cycles
//! and on a short heartbeat, never in the middle of one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::SIGTERM;
use signal_hook::flag::register;
use tracing::{info, warn};

/// Register a SIGTERM handler that sets an `AtomicBool` flag.
///
/// # Errors
///
/// Returns `Err` if the OS refuses to register the handler.
pub fn register_sigterm() -> std::io::Result<Arc<AtomicBool>> {
    let term = Arc::new(AtomicBool::new(false));
    // signal_hook::flag::register only performs an atomic store in the handler.
    register(SIGTERM, Arc::clone(&term))?;
    Ok(term)
}

/// Spawns a task that sets `flag` when Ctrl-C is received.
pub fn forward_ctrl_c(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received; stopping after the current cycle");
                flag.store(true, Ordering::Relaxed);
            }
            Err(e) => warn!(error = %e, "cannot listen for Ctrl-C"),
        }
    });
}
