//! Operator interrupt handling
//!
//! SIGINT is turned into a sticky [`CancellationToken`] instead of killing
//! the driver. The terminal delivers the same signal to the foreground
//! child, so the child decides for itself whether to exit; the driver only
//! records that the operator asked to stop.

use std::io;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exit code reported when the operator interrupts before any child ran
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Install a SIGINT listener that cancels `token` on every interrupt.
///
/// The handler is registered before this function returns, so an interrupt
/// that arrives before the listener task is first polled is still caught.
pub fn listen_for_interrupts(token: CancellationToken) -> io::Result<JoinHandle<()>> {
    let mut interrupts = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        while interrupts.recv().await.is_some() {
            warn!("Ctrl+C");
            token.cancel();
        }
    }))
}
