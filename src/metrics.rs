//! Prometheus metrics, served on a dedicated bind address separate from the
//! control plane, matching the teacher's standalone metrics server.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics exporter.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("http_request_duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        )
        .expect("failed to set buckets for http_request_duration_seconds")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Zero-initialize every counter/gauge this crate emits so they appear in
/// Prometheus queries even before the first event.
pub fn initialize_core_metrics() {
    metrics::gauge!("process.uptime.seconds").set(0.0);
    metrics::gauge!("process.is_up").set(1.0);
    metrics::gauge!("process.memory.bytes").set(0.0);

    metrics::counter!("arbiter.claim.ok").absolute(0);
    metrics::counter!("arbiter.claim.busy").absolute(0);

    metrics::counter!("supervisor.spawn.ok").absolute(0);
    metrics::counter!("supervisor.spawn.fast_fail").absolute(0);
    metrics::counter!("supervisor.terminate").absolute(0);

    metrics::counter!("decoder.started").absolute(0);
    metrics::counter!("decoder.stopped").absolute(0);
    metrics::counter!("decoder.crashed").absolute(0);
    metrics::counter!("decoder.malformed_record").absolute(0);
}

/// Background task updating process uptime/memory gauges every 5 seconds.
pub async fn process_metrics_task() {
    let start_time = Instant::now();

    loop {
        let uptime_seconds = start_time.elapsed().as_secs() as f64;
        metrics::gauge!("process.uptime.seconds").set(uptime_seconds);
        metrics::gauge!("process.is_up").set(1.0);

        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
                for line in status.lines() {
                    if line.starts_with("VmRSS:")
                        && let Some(kb_str) = line.split_whitespace().nth(1)
                        && let Ok(kb) = kb_str.parse::<f64>()
                    {
                        metrics::gauge!("process.memory.bytes").set(kb * 1024.0);
                        break;
                    }
                }
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Start a standalone metrics server bound independently from the HTTP
/// control plane.
pub async fn start_metrics_server(bind: &str) -> anyhow::Result<()> {
    let handle = init_metrics();
    METRICS_HANDLE
        .set(handle)
        .expect("metrics handle already initialized");
    initialize_core_metrics();

    tokio::spawn(process_metrics_task());

    let app = Router::new().route(
        "/metrics",
        get(|| async {
            let handle = METRICS_HANDLE.get().expect("metrics handle not initialized");
            handle.render()
        }),
    );

    let addr: SocketAddr = bind.parse()?;
    info!("starting metrics server on http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
