use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use conductor_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Opens the pool described by `database`. Every connection gets the
/// pragmas the repositories rely on: enforced foreign keys, WAL
/// journaling, and a busy timeout so writers queue instead of erroring.
pub async fn connect(database: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(database.max_connections.max(1))
        .acquire_timeout(Duration::from_secs(database.timeout_secs.max(1)))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(&database.url)
        .await
}

/// Single-connection pool against an in-memory SQLite URL, used by
/// tests that need a real database without a file on disk.
pub async fn connect_memory(url: &str) -> Result<DbPool, sqlx::Error> {
    connect(&DatabaseConfig { url: url.to_string(), max_connections: 1, timeout_secs: 5 }).await
}
