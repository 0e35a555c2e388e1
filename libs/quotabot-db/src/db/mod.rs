use anyhow::{Context, Result};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

mod schema;

pub async fn build_pool(database_url: &str) -> Result<SqlitePool> {
    if !database_url.starts_with("sqlite:") {
        return Err(anyhow::anyhow!("DATABASE_URL must start with sqlite:"));
    }

    use sqlx::sqlite::SqliteConnectOptions;
    use std::str::FromStr;

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .connect_with(options)
        .await
        .context("Failed to connect to SQLite")?;

    Ok(pool)
}

/// Idempotent manual migration: every statement is CREATE TABLE IF NOT
/// EXISTS or INSERT OR IGNORE, so re-running on an existing database is
/// safe.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for stmt in schema::TABLES {
        sqlx::query(stmt)
            .execute(pool)
            .await
            .with_context(|| format!("Schema statement failed: {}", &stmt[..60.min(stmt.len())]))?;
    }

    schema::seed(pool).await?;

    Ok(())
}
