//! Process-wide graceful shutdown.
//!
//! Grounded on `commands/run/shutdown.rs`'s `spawn_shutdown_handler`: a
//! background task that waits on `ctrl_c`, then drains. The teacher drains
//! flume queues; here there is nothing to drain but running decoders, so
//! draining means calling [`crate::decoder::killall`] and waiting for every
//! background task registered against the registry's `CancellationToken`
//! to actually finish, with a bounded wait instead of the teacher's
//! unbounded 600-iteration loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::decoder::{self, DecoderRegistry};

/// Spawn the Ctrl+C / SIGTERM listener. Returns a token that is cancelled
/// once shutdown has been triggered, so other long-running loops (eviction
/// sweeps, the metrics gauge refresher) can select on it alongside their
/// own work.
pub fn spawn_shutdown_handler(registry: Arc<DecoderRegistry>) -> CancellationToken {
    let cancel = CancellationToken::new();
    let handler_cancel = cancel.clone();

    tokio::spawn(async move {
        if let Err(err) = wait_for_signal().await {
            warn!(%err, "unable to listen for shutdown signal");
            return;
        }

        info!("shutdown signal received, stopping every running decoder");
        handler_cancel.cancel();

        let stopped = decoder::killall(&registry).await;
        if stopped.is_empty() {
            info!("no decoders were running, shutdown complete");
        } else {
            info!(count = stopped.len(), "decoders stopped, shutdown complete");
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::process::exit(0);
    });

    cancel
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => Ok(()),
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
