use quotabot_db::models::{AiModel, User};
use sqlx::SqlitePool;
use tracing::info;

use super::error::{ServiceError, ServiceResult};
use super::fetch_user;

/// Direct user-account mutations: ceiling adjustments, chat-token
/// consumption and model selection.
#[derive(Debug, Clone)]
pub struct UserService {
    pool: SqlitePool,
}

impl UserService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, telegram_id: i64) -> ServiceResult<User> {
        fetch_user(&self.pool, telegram_id).await
    }

    /// Admin ceiling raise. Affects the limits, not the used counters.
    pub async fn add_tokens(&self, telegram_id: i64, daily: i64, total: i64) -> ServiceResult<User> {
        if daily < 0 || total < 0 {
            return Err(ServiceError::InvalidInput(
                "Token amounts must not be negative".into(),
            ));
        }

        let res = sqlx::query(
            "UPDATE users SET daily_tokens = daily_tokens + ?, total_tokens = total_tokens + ?
             WHERE telegram_id = ?",
        )
        .bind(daily)
        .bind(total)
        .bind(telegram_id)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(ServiceError::NotFound("user"));
        }

        info!(user = telegram_id, daily, total, "Ceilings raised");
        fetch_user(&self.pool, telegram_id).await
    }

    /// Admin ceiling cut. Refuses to drive either ceiling negative.
    pub async fn remove_tokens(
        &self,
        telegram_id: i64,
        daily: i64,
        total: i64,
    ) -> ServiceResult<User> {
        if daily < 0 || total < 0 {
            return Err(ServiceError::InvalidInput(
                "Token amounts must not be negative".into(),
            ));
        }

        let user = fetch_user(&self.pool, telegram_id).await?;
        if user.daily_tokens < daily || user.total_tokens < total {
            return Err(ServiceError::InvalidInput(format!(
                "Cannot remove more than the user has (daily {}, total {})",
                user.daily_tokens, user.total_tokens
            )));
        }

        sqlx::query(
            "UPDATE users SET daily_tokens = daily_tokens - ?, total_tokens = total_tokens - ?
             WHERE telegram_id = ?",
        )
        .bind(daily)
        .bind(total)
        .bind(telegram_id)
        .execute(&self.pool)
        .await?;

        info!(user = telegram_id, daily, total, "Ceilings lowered");
        fetch_user(&self.pool, telegram_id).await
    }

    /// Chat-token commit: one add against both running counters, sized by
    /// the provider-reported cost. Runs only after a successful call.
    pub async fn record_token_usage(&self, telegram_id: i64, tokens: i64) -> ServiceResult<()> {
        sqlx::query(
            "UPDATE users SET daily_used = daily_used + ?, total_used = total_used + ?
             WHERE telegram_id = ?",
        )
        .bind(tokens)
        .bind(tokens)
        .bind(telegram_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_selected_model(
        &self,
        telegram_id: i64,
        model_id: &str,
    ) -> ServiceResult<AiModel> {
        let model =
            sqlx::query_as::<_, AiModel>("SELECT * FROM models WHERE id = ? AND is_active = 1")
                .bind(model_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(ServiceError::NotFound("model"))?;

        let res = sqlx::query("UPDATE users SET selected_model = ? WHERE telegram_id = ?")
            .bind(&model.id)
            .bind(telegram_id)
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            return Err(ServiceError::NotFound("user"));
        }

        Ok(model)
    }

    /// The external daily reset entry point. The engine tolerates this
    /// running at any time.
    pub async fn reset_daily_usage_all(&self) -> ServiceResult<u64> {
        let res = sqlx::query("UPDATE users SET daily_used = 0 WHERE daily_used > 0")
            .execute(&self.pool)
            .await?;

        info!(users = res.rows_affected(), "Daily token usage reset");
        Ok(res.rows_affected())
    }
}
