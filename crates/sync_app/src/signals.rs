//! Termination signals drive the shared [`ShutdownState`].

use std::io;
use sync_core::ShutdownState;
use tokio::signal;
use tracing::{error, info, warn};

/// Resolves on the next SIGINT or SIGTERM (Ctrl+C on Windows).
pub async fn termination() -> io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    Ok(())
}

/// Waits for the first signal and starts draining `state`.
///
/// A second signal exits at once without waiting for the final flush.
pub async fn drain_on_signal(state: &ShutdownState) -> io::Result<()> {
    termination().await?;
    info!("📡 Received shutdown signal - draining");
    state.initiate_shutdown();

    tokio::spawn(async {
        match termination().await {
            Ok(()) => {
                warn!("Second shutdown signal, exiting without the final flush");
                std::process::exit(1);
            }
            Err(e) => error!("Failed to watch for a second shutdown signal: {e}"),
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn draining_waits_for_a_signal() {
        let state = ShutdownState::new();
        let waited = tokio::time::timeout(Duration::from_millis(50), drain_on_signal(&state)).await;
        assert!(waited.is_err());
        assert!(!state.is_shutdown_initiated());
    }
}
