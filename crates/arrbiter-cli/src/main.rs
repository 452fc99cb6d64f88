// SPDX-License-Identifier: GPL-3.0-or-later
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arrbiter_api::{router, ApiState};
use arrbiter_application::AppState;
use arrbiter_config::{load as load_config, HttpConfig, TelemetryConfig};
use arrbiter_infrastructure::{
    http_client, init_database, SqliteSearchHistoryRepository, SqliteStrikeRepository,
};
use arrbiter_realtime::BroadcastHub;
use arrbiter_scheduler::Scheduler;
use axum::serve;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_FILE: &str = "arrbiter.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path(std::env::args().nth(1), std::env::var("ARRBITER_CONFIG").ok());
    let config = load_config(config_path.as_deref())?;
    init_tracing(&config.telemetry);
    if let Some(path) = &config_path {
        info!(target: "cli", path = %path.display(), "using config file");
    }

    let http = http_client(Duration::from_secs(config.http.request_timeout_secs))?;
    let state = AppState::new(config.clone(), http);
    state.on_start();

    let pool = init_database(&config).await?;
    let hub = BroadcastHub::default();

    let scheduler = Scheduler::new(
        state,
        Arc::new(SqliteSearchHistoryRepository::new(pool.clone())),
        Arc::new(SqliteStrikeRepository::new(pool.clone())),
    )
    .with_progress(Arc::new(hub.clone()));
    scheduler.register_jobs().await;

    let listener = TcpListener::bind(bind_addr(&config.http)?).await?;
    let addr = listener.local_addr()?;
    info!(target: "cli", "listening on {}", addr);

    serve(listener, router(ApiState::new(scheduler.registry(), hub)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    pool.close().await;
    info!(target: "cli", "shutdown complete");
    Ok(())
}

/// First argument, then `ARRBITER_CONFIG`, then `arrbiter.toml` if present.
fn config_path(arg: Option<String>, env: Option<String>) -> Option<PathBuf> {
    arg.or(env)
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        })
}

fn env_filter(telemetry: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&telemetry.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_tracing(telemetry: &TelemetryConfig) {
    let registry = tracing_subscriber::registry().with(env_filter(telemetry));

    if telemetry.json {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_names(true).with_level(true))
            .init();
    }
}

fn bind_addr(http: &HttpConfig) -> Result<SocketAddr> {
    let addr = format!("{}:{}", http.host, http.port);
    addr.parse::<SocketAddr>()
        .with_context(|| format!("invalid listen address {addr}"))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut interrupt), Ok(mut terminate)) => {
                tokio::select! {
                    _ = interrupt.recv() => {},
                    _ = terminate.recv() => {},
                }
            }
            (Err(err), _) | (_, Err(err)) => {
                warn!(target: "cli", error = %err, "signal handlers unavailable, falling back to ctrl-c");
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(target: "cli", error = %err, "ctrl-c handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target: "cli", error = %err, "ctrl-c handler failed");
        }
    }

    info!(target: "cli", "shutdown signal received");
}
