//! Signal-driven shutdown for the telemetry loop.
//!
//! The event loop owns every session, so the process cannot simply exit on
//! SIGINT: queued responses and dataframes would be abandoned mid-write and
//! stream sockets left unclosed. The first signal only raises a flag that
//! the tick loop checks between polls; the loop then runs its normal
//! shutdown path (stop every session, close the acceptor and the datagram
//! socket). A second signal skips the drain and kills the process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Arm SIGINT/SIGTERM to request a graceful stop of the telemetry loop.
///
/// Returns the flag the tick loop polls between iterations:
///
/// ```ignore
/// let stop = signal::install_signal_handler();
///
/// while !stop.load(Ordering::Relaxed) {
///     core.poll();
/// }
/// core.shutdown();
/// ```
///
/// The repeated-signal escape hatch exists for the case where a stalled
/// peer keeps the drain from finishing.
pub fn install_signal_handler() -> Arc<AtomicBool> {
    let stop_requested = Arc::new(AtomicBool::new(false));
    let flag = stop_requested.clone();

    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            tracing::warn!("shutdown already in progress, aborting without draining sessions");
            std::process::exit(1);
        }
        tracing::info!("shutdown requested, stopping sessions after the current tick");
    })
    .expect("failed to set signal handler");

    stop_requested
}
