//! # thinky-server
//!
//! The server-side surface of the Thinky community core:
//! - **Quiz grading**, the one computation clients must not run themselves,
//!   since it needs the stored correct answers
//! - **Sanitized question listings** for quiz takers
//! - **Runtime config** the client shim reads at startup
//! - **Admin endpoints** (status, presence-targeted broadcast) behind a
//!   bearer token
//! - **Per-IP rate limiting** to protect against abuse
//! - **Janitor tasks** that keep the shared store tidy (stale presence rows,
//!   idle rate-limit buckets)

mod api;
mod config;
mod error;
mod grading;
mod rate_limit;

use std::sync::Arc;
use std::time::Instant;

use tracing::info;
use tracing_subscriber::EnvFilter;

use thinky_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,thinky_server=debug")),
        )
        .init();

    info!("Starting Thinky API server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        admin_enabled = config.admin_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Open the store
    // -----------------------------------------------------------------------
    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let db = Arc::new(db);

    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    let app_state = AppState {
        db: db.clone(),
        config: Arc::new(config),
        rate_limiter: rate_limiter.clone(),
        started_at: Instant::now(),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn janitor tasks
    // -----------------------------------------------------------------------

    // Rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_idle(600.0).await;
        }
    });

    // Stale presence purge (every 10 minutes, rows older than an hour).
    // Liveness never depends on row absence, so this is purely hygiene.
    let janitor_db = db.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;
            if let Err(e) = janitor_db.purge_stale_presence(3600) {
                tracing::warn!(error = %e, "presence purge failed");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let http_addr = app_state.config.http_addr;
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
