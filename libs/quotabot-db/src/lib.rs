pub mod db;
pub mod models;
pub mod repositories;

pub use sqlx;

use anyhow::{Context, Result};

/// Connect to the SQLite database and bring the schema up to date.
pub async fn connect(url: &str) -> Result<sqlx::SqlitePool> {
    let pool = db::build_pool(url).await?;

    db::init_schema(&pool)
        .await
        .context("Failed to initialize database schema")?;

    Ok(pool)
}
