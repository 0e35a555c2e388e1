use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::models::User;

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert on first contact: creates the row with FREE defaults, or
    /// refreshes the profile fields of an existing one.
    pub async fn ensure_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<User> {
        sqlx::query(
            "INSERT INTO users (telegram_id, username, first_name, last_name)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(telegram_id) DO UPDATE SET
                username = excluded.username,
                first_name = excluded.first_name,
                last_name = excluded.last_name",
        )
        .bind(telegram_id)
        .bind(username)
        .bind(first_name)
        .bind(last_name)
        .execute(&self.pool)
        .await
        .context("Failed to upsert user")?;

        self.get_by_telegram_id(telegram_id)
            .await?
            .context("User vanished right after upsert")
    }

    pub async fn get_by_telegram_id(&self, telegram_id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE telegram_id = ?")
            .bind(telegram_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load user")?;

        Ok(user)
    }

    pub async fn exists(&self, telegram_id: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE telegram_id = ?)")
                .bind(telegram_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to check user existence")?;

        Ok(exists)
    }
}
