use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use floodgate::config::FloodgateConfig;
use floodgate::gate::{router, AdmissionGate, AdmissionLayer, HttpServer, ScopeMode};
use floodgate::ratelimit::SlidingWindowLimiter;
use floodgate::store::{CounterStore, MemoryStore, RedisStore, TimeoutStore};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Sliding-window admission control for multi-tenant HTTP services.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init(),
    }

    info!("Starting Floodgate admission service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = FloodgateConfig::load(args.config.as_deref())?;
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let store = build_store(&config).await?;

    let tenant_policy = config.rate_limiting.tenant_policy();
    let ip_policy = config.rate_limiting.ip_policy();
    info!(
        tenant_limit = tenant_policy.limit(),
        ip_limit = ip_policy.limit(),
        "Rate limit policies loaded"
    );

    let tenant_gate = AdmissionGate::new(
        "tenant",
        ScopeMode::Tenant,
        SlidingWindowLimiter::new(store.clone(), tenant_policy),
    );
    let ip_gate = AdmissionGate::new(
        "ip",
        ScopeMode::Ip,
        SlidingWindowLimiter::new(store, ip_policy),
    );

    let app = router(AdmissionLayer::new(tenant_gate), AdmissionLayer::new(ip_gate));
    let server = HttpServer::new(config.server.http_addr, app);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Floodgate admission service stopped");
    Ok(())
}

/// Connect the configured counter store, bounded by the store timeout.
async fn build_store(config: &FloodgateConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    let timeout = config.store.timeout();

    let store: Arc<dyn CounterStore> = match config.store.redis_url.as_deref() {
        Some(url) => {
            let redis = RedisStore::connect(url, config.store.connection_count).await?;
            Arc::new(TimeoutStore::new(redis, timeout))
        }
        None => {
            warn!("No redis_url configured, counters are local to this instance");
            Arc::new(TimeoutStore::new(MemoryStore::new(), timeout))
        }
    };

    info!(timeout_ms = timeout.as_millis() as u64, "Counter store ready");
    Ok(store)
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
