//! Storage layer: SQLite pool setup, migrations and probe cache rows.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

pub mod cache;
pub mod models;

/// Opens a pool on `database`: `:memory:`, a `sqlite:` URL, or a plain file
/// path whose parent directories are created first.
pub async fn connect(database: &str) -> anyhow::Result<SqlitePool> {
    let in_memory = matches!(database, ":memory:" | "sqlite::memory:" | "sqlite://:memory:");
    let opts = if in_memory {
        SqliteConnectOptions::from_str("sqlite::memory:")?
    } else if database.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(database)?.create_if_missing(true)
    } else {
        let path = Path::new(database);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
    };
    // Every connection to :memory: would get its own empty database.
    let max_connections = if in_memory { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Embedded from crates/storage/migrations; idempotent.
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
