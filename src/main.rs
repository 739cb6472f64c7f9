//! Thin CLI wrapper: resolve flags and the config file, then hand a single
//! [`valentine_rf::config::ServerConfig`] to the library. No argv or env var
//! is read below `main()` — every downstream function takes the config
//! value directly, the same split `hut8-soar` keeps between its binary and
//! `soar::run`-shaped library entry points.

use clap::Parser;
use tracing_subscriber::fmt::format::FmtSpan;

use valentine_rf::config::{self, ServerConfig};
use valentine_rf::log_format::TargetFirstFormat;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(
    name = "valentine-rf",
    about = "RF decoder orchestration service",
    version = env!("VERGEN_GIT_DESCRIBE")
)]
struct Cli {
    /// Path to the TOML config file. Falls back to VALENTINE_CONFIG, then ./valentine.toml.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Override the HTTP control-plane bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Override the Prometheus metrics bind address.
    #[arg(long)]
    metrics_bind: Option<String>,

    /// Emit plain single-line logs instead of the target-first color format.
    #[arg(long)]
    plain_log: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.plain_log);
    tracing::info!(version = env!("VERGEN_GIT_DESCRIBE"), "starting valentine-rf");

    let config_path = cli.config.unwrap_or_else(config::config_path);
    let mut server_config = ServerConfig::load(&config_path).unwrap_or_else(|err| {
        tracing::warn!(path = ?config_path, %err, "could not load config file, using defaults");
        ServerConfig::default()
    });

    if let Some(bind) = cli.bind {
        server_config.http_bind = bind;
    }
    if let Some(metrics_bind) = cli.metrics_bind {
        server_config.metrics_bind = metrics_bind;
    }

    valentine_rf::run(server_config).await
}

fn init_tracing(plain: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if plain {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_span_events(FmtSpan::NONE)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .event_format(TargetFirstFormat)
            .init();
    }
}
