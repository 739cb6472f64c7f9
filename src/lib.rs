//! valentine-rf: an RF decoder orchestration service.
//!
//! One [`DecoderRegistry`] owns every mode's arbiter claim, supervised
//! process, parser task, data store, and pub/sub bus. [`run`] wires the
//! registry to the HTTP control plane, the metrics server, the per-store
//! eviction sweeps, and graceful shutdown, the same top-level shape
//! `hut8-soar` wires its socket server, web server, and background
//! consumers from `main.rs`.

pub mod bus;
pub mod config;
pub mod decoder;
pub mod device;
pub mod error;
pub mod http;
pub mod log_format;
pub mod metrics;
pub mod process;
pub mod shutdown;
pub mod store;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use config::ServerConfig;
use decoder::DecoderRegistry;

/// Start every background task and the HTTP control plane, then block until
/// a shutdown signal is received.
pub async fn run(config: ServerConfig) -> Result<()> {
    let eviction_interval = config.eviction_interval_seconds;
    let metrics_bind = config.metrics_bind.clone();

    let registry = Arc::new(DecoderRegistry::new(config));

    let shutdown_cancel = shutdown::spawn_shutdown_handler(registry.clone());

    for (name, store) in registry.all_stores() {
        let cancel = shutdown_cancel.clone();
        let store = store.clone();
        info!(store = name, "spawning eviction sweep");
        store::spawn_eviction_task(store, eviction_interval, cancel);
    }

    tokio::spawn(async move {
        if let Err(err) = metrics::start_metrics_server(&metrics_bind).await {
            tracing::error!(%err, "metrics server exited");
        }
    });

    http::serve(registry).await
}
