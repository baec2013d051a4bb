//! ckd-daemon entry point.
//!
//! Loads config, opens the store and kitchen, spawns the background loops,
//! wires middleware and starts the HTTP server. Route handlers live in
//! `routes.rs`; shared state and loops live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use ckd_config::{load_kitchen_config, report_unused_keys, ConfigMode, UnusedKeyPolicy};
use ckd_daemon::{routes, state};
use ckd_db::{MemoryStore, SqliteStore, Store, ENV_DB_PATH};
use ckd_runtime::Kitchen;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

/// Comma-separated YAML overlay paths, applied on top of the defaults.
const ENV_CONFIG_PATHS: &str = "CKD_CONFIG_PATHS";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = config_paths_from_env();
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = load_kitchen_config(&path_refs).context("load config")?;
    let unused = report_unused_keys(
        ConfigMode::Daemon,
        &loaded.config_json,
        UnusedKeyPolicy::Warn,
    )?;
    for ptr in &unused.unused_leaf_pointers {
        warn!(pointer = %ptr, "config key is not read by the daemon");
    }
    let settings = loaded.settings()?;
    info!(config_hash = %loaded.config_hash, "config loaded");

    let store: Arc<dyn Store> = if std::env::var(ENV_DB_PATH).is_ok() {
        let db = SqliteStore::connect_from_env().await?;
        db.migrate().await?;
        Arc::new(db)
    } else {
        warn!("{ENV_DB_PATH} not set; kitchen state is in-memory only");
        Arc::new(MemoryStore::new())
    };

    let kitchen = Arc::new(Kitchen::open(store, settings.clone()).await?);
    let shared =
        Arc::new(state::AppState::new(kitchen).with_config_hash(loaded.config_hash.clone()));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_deadlock_monitor(
        Arc::clone(&shared),
        Duration::from_millis(settings.monitor.interval_ms),
    );
    state::spawn_simulation_ticker(
        Arc::clone(&shared),
        Duration::from_millis(settings.simulation.tick_ms),
    );

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("ckd-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("CKD_DAEMON_ADDR").ok()?.parse().ok()
}

fn config_paths_from_env() -> Vec<String> {
    std::env::var(ENV_CONFIG_PATHS)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("ctrl-c received; shutting down");
    }
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
