use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber;

use turnstile::config::{ThrottleConfig, TurnstileConfig};
use turnstile::http::{create_router, HttpServer, RouteGates};
use turnstile::ratelimit::{
    presets, skip_for_role, Limiter, MemoryStore, Policy, Sweeper, SystemClock, TieredLimiter,
};

/// Scoped request throttling server.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address, overriding the configuration file
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    info!("Starting Turnstile Throttling Server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = match &args.config {
        Some(path) => TurnstileConfig::from_file(path)?,
        None => TurnstileConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    info!(bind_addr = %config.server.bind_addr, "Configuration loaded");

    // One store and one clock, shared by every limiter
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(SystemClock);

    let gates = build_gates(&config.throttle, &store, &clock)?;
    let trust = Arc::new(config.throttle.trust_rules()?);
    info!(trust_rules = trust.len(), "Throttling engine initialized");

    // Periodic eviction of expired counters
    let sweeper = Sweeper::new(store.clone(), clock.clone())
        .with_interval(config.throttle.sweep_interval())
        .spawn();

    let router = create_router(gates, trust, &config.throttle.credential_header);
    let server = HttpServer::new(config.server.bind_addr, router);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    sweeper.shutdown().await;
    info!("Turnstile Throttling Server stopped");
    Ok(())
}

/// Build every route's gate from the presets plus configured overrides.
fn build_gates(
    throttle: &ThrottleConfig,
    store: &Arc<MemoryStore>,
    clock: &Arc<SystemClock>,
) -> anyhow::Result<RouteGates> {
    let limiter = |policy: Policy| Limiter::new(policy, store.clone(), clock.clone());

    // Administrators are exempt from the blanket ceiling, not from the
    // scoped ones.
    let general = throttle
        .apply_override(presets::general()?)?
        .with_skip(skip_for_role("admin"));

    let (sustained, burst) = presets::api_tier()?;
    let api = TieredLimiter::new(
        limiter(throttle.apply_override(sustained)?),
        limiter(throttle.apply_override(burst)?),
    );

    Ok(RouteGates {
        general: Arc::new(limiter(general)),
        login: Arc::new(limiter(throttle.apply_override(presets::login()?)?)),
        registration: Arc::new(limiter(throttle.apply_override(presets::registration()?)?)),
        submissions: Arc::new(limiter(throttle.apply_override(presets::submissions()?)?)),
        search: Arc::new(limiter(throttle.apply_override(presets::search()?)?)),
        messages: Arc::new(limiter(throttle.apply_override(presets::messages()?)?)),
        api: Arc::new(api),
    })
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
