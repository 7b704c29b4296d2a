//! Session cancellation state.
//!
//! One cancellation source per session: every suspension point in the
//! watcher, the process supervisor, and the refresh broker observes the
//! same token. Ctrl+C cancels it; a second Ctrl+C forces exit.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

/// Shutdown has been requested (Ctrl+C received)
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Session-wide cancellation token, cancelled by the Ctrl+C handler
static CANCEL: OnceLock<CancellationToken> = OnceLock::new();

/// Setup the global Ctrl+C handler. Call once at program start.
///
/// - First press: cancels the session token; the loop unwinds gracefully
///   (child stopped, broker torn down) and exits zero.
/// - Second press: forces immediate exit.
pub fn setup_shutdown_handler() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    CANCEL
        .set(token.clone())
        .map_err(|_| anyhow::anyhow!("shutdown handler installed twice"))?;

    ctrlc::set_handler(|| {
        if SHUTDOWN.swap(true, Ordering::SeqCst) {
            // Second press: give up on graceful teardown
            std::process::exit(130);
        }

        crate::log!("watch"; "shutdown requested, press Ctrl+C again to force exit");
        if let Some(token) = CANCEL.get() {
            token.cancel();
        }
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {}", e))?;

    Ok(token)
}

/// Check if shutdown has been requested
pub fn is_shutdown() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_propagates() {
        let token = CancellationToken::new();
        let child = token.child_token();
        assert!(!child.is_cancelled());

        token.cancel();
        assert!(child.is_cancelled());
    }
}
