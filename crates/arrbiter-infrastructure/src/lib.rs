// SPDX-License-Identifier: GPL-3.0-or-later
pub mod memory_adapters;
pub mod repositories;
pub mod sqlite_adapters;

pub use memory_adapters::{InMemorySearchHistoryRepository, InMemoryStrikeRepository};
pub use repositories::{SearchHistoryRepository, StrikeRepository};
pub use sqlite_adapters::{SqliteSearchHistoryRepository, SqliteStrikeRepository};

use anyhow::Result;
use arrbiter_config::AppConfig;
use reqwest::Client;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Shared HTTP client for *arr services.
pub fn http_client(request_timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .pool_max_idle_per_host(8)
        .timeout(request_timeout)
        .build()?)
}

/// Turn a relative `sqlite://` URL into an absolute one with create mode,
/// creating the parent directory on the way.
pub fn normalize_sqlite_url(url: &str) -> Result<String> {
    if !url.starts_with("sqlite://") || url.starts_with("sqlite://:memory:") {
        return Ok(url.to_string());
    }

    let db_path = url.trim_start_matches("sqlite://");
    let path = Path::new(db_path);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
            info!(target: "infrastructure", path = %parent.display(), "created database directory");
        }
    }

    let absolute_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    // SQLite accepts forward slashes on every platform
    let path_str = absolute_path.to_string_lossy().replace('\\', "/");
    Ok(format!("sqlite://{}?mode=rwc", path_str))
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

pub async fn init_database(config: &AppConfig) -> Result<SqlitePool> {
    info!(target: "infrastructure", "initializing database");

    let db_url = normalize_sqlite_url(&config.database.url)?;
    info!(target: "infrastructure", db_url = %db_url, "connecting to database");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.pool_max_size)
        .connect(&db_url)
        .await?;

    info!(target: "infrastructure", db_url = %config.database.url, "running migrations");
    run_migrations(&pool).await?;

    info!(target: "infrastructure", "database initialized successfully");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_urls_pass_through() {
        assert_eq!(normalize_sqlite_url("sqlite::memory:").unwrap(), "sqlite::memory:");
        assert_eq!(
            normalize_sqlite_url("sqlite://:memory:").unwrap(),
            "sqlite://:memory:"
        );
    }

    #[test]
    fn relative_path_becomes_absolute_with_create_mode() {
        let url = normalize_sqlite_url("sqlite://arrbiter-test.db").unwrap();
        assert!(url.starts_with("sqlite://"));
        assert!(url.ends_with("arrbiter-test.db?mode=rwc"));
        let path = url
            .trim_start_matches("sqlite://")
            .trim_end_matches("?mode=rwc");
        assert!(Path::new(path).is_absolute());
    }

    #[test]
    fn windows_separators_are_normalized() {
        let path = Path::new("data\\arrbiter.db");
        let normalized = path.to_string_lossy().replace('\\', "/");
        assert_eq!(normalized, "data/arrbiter.db");
    }

    #[test]
    fn http_client_builds_with_timeout() {
        assert!(http_client(Duration::from_secs(5)).is_ok());
    }
}
