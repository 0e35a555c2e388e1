use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::warn;

use super::error::ServiceResult;

pub const MAX_REQUESTS: i64 = 10;
pub const WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: i64,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Fixed-window burst limiter, 10 requests per 60 seconds per user,
/// independent of the daily/monthly quota windows.
#[derive(Debug, Clone)]
pub struct RateLimitService {
    pool: SqlitePool,
}

impl RateLimitService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fail-open: a storage failure allows the request and only logs.
    /// Availability wins over strict enforcement for this limiter.
    pub async fn check(&self, user_id: i64) -> RateDecision {
        match self.check_inner(user_id).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(user = user_id, error = %e, "Rate limit check failed, allowing request");
                RateDecision {
                    allowed: true,
                    remaining: MAX_REQUESTS,
                    reset_at: None,
                }
            }
        }
    }

    async fn check_inner(&self, user_id: i64) -> ServiceResult<RateDecision> {
        let now = Utc::now();

        let row: Option<(i64, DateTime<Utc>)> =
            sqlx::query_as("SELECT request_count, window_start FROM rate_limits WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((count, window_start)) = row else {
            sqlx::query(
                "INSERT INTO rate_limits (user_id, request_count, window_start) VALUES (?, 1, ?)
                 ON CONFLICT(user_id) DO UPDATE SET request_count = 1, window_start = excluded.window_start",
            )
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .await?;

            return Ok(RateDecision {
                allowed: true,
                remaining: MAX_REQUESTS - 1,
                reset_at: Some(now + Duration::seconds(WINDOW_SECS)),
            });
        };

        if now - window_start >= Duration::seconds(WINDOW_SECS) {
            sqlx::query("UPDATE rate_limits SET request_count = 1, window_start = ? WHERE user_id = ?")
                .bind(now)
                .bind(user_id)
                .execute(&self.pool)
                .await?;

            return Ok(RateDecision {
                allowed: true,
                remaining: MAX_REQUESTS - 1,
                reset_at: Some(now + Duration::seconds(WINDOW_SECS)),
            });
        }

        let reset_at = window_start + Duration::seconds(WINDOW_SECS);

        if count >= MAX_REQUESTS {
            return Ok(RateDecision {
                allowed: false,
                remaining: 0,
                reset_at: Some(reset_at),
            });
        }

        sqlx::query("UPDATE rate_limits SET request_count = request_count + 1 WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(RateDecision {
            allowed: true,
            remaining: MAX_REQUESTS - (count + 1),
            reset_at: Some(reset_at),
        })
    }

    /// Read-only view of the current window, without consuming a slot.
    pub async fn status(&self, user_id: i64) -> ServiceResult<RateDecision> {
        let now = Utc::now();

        let row: Option<(i64, DateTime<Utc>)> =
            sqlx::query_as("SELECT request_count, window_start FROM rate_limits WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let decision = match row {
            Some((count, window_start))
                if now - window_start < Duration::seconds(WINDOW_SECS) =>
            {
                RateDecision {
                    allowed: count < MAX_REQUESTS,
                    remaining: (MAX_REQUESTS - count).max(0),
                    reset_at: Some(window_start + Duration::seconds(WINDOW_SECS)),
                }
            }
            _ => RateDecision {
                allowed: true,
                remaining: MAX_REQUESTS,
                reset_at: None,
            },
        };

        Ok(decision)
    }

    /// Admin reset: drops the user's window entirely.
    pub async fn reset(&self, user_id: i64) -> ServiceResult<bool> {
        let res = sqlx::query("DELETE FROM rate_limits WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected() > 0)
    }
}
