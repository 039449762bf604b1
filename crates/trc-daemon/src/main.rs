//! trc-daemon entry point.
//!
//! Thin on purpose: tracing, config, store selection, middleware, serve.
//! Route handlers live in `routes.rs`; shared state in `state.rs`.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use trc_config::{
    config_paths_from_env, load_layered_yaml, report_unused_keys, EngineConfig, UnusedKeyPolicy,
};
use trc_daemon::{routes, state};
use trc_db::{MemoryStore, PgStore, TransactionStore};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cfg = load_config()?;

    let pg = match std::env::var(trc_db::ENV_DB_URL) {
        Ok(url) if !url.trim().is_empty() => {
            let pool = trc_db::connect(&url).await?;
            trc_db::migrate(&pool).await?;
            info!("store: postgres");
            Some(PgStore::new(pool))
        }
        _ => {
            warn!(
                "{} not set; using in-memory store (records are lost on restart)",
                trc_db::ENV_DB_URL
            );
            None
        }
    };
    let store: Arc<dyn TransactionStore> = match &pg {
        Some(p) => Arc::new(p.clone()),
        None => Arc::new(MemoryStore::new()),
    };

    let shared = Arc::new(state::AppState::new(&cfg, store));
    let tasks = state::spawn_background(&shared, &cfg);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_from_config(&cfg.server.allowed_origins));

    let addr = cfg.server.bind_addr()?;
    info!(
        policy = ?cfg.finalize.policy,
        ttl_secs = cfg.buffer.ttl_secs,
        "trc-daemon listening on http://{}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    for t in tasks {
        t.abort();
    }
    if let Some(p) = pg {
        p.close().await;
        info!("postgres pool closed");
    }
    info!("trc-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// YAML layers from `TRC_CONFIG` (none = built-in defaults), then env
/// overrides.
fn load_config() -> anyhow::Result<EngineConfig> {
    let paths = config_paths_from_env();
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = load_layered_yaml(&refs)?;

    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !report.is_clean() {
        warn!(keys = ?report.unused_leaf_pointers, "config contains keys nothing reads");
    }

    let mut cfg = loaded.engine()?;
    cfg.apply_env_overrides();
    info!(layers = paths.len(), config_hash = %loaded.config_hash, "config loaded");
    Ok(cfg)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// CORS: only the configured origins, GET and POST.
fn cors_from_config(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}
