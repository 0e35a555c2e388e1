pub mod catalog_service;
pub mod chat_service;
pub mod error;
pub mod image_service;
pub mod plan_service;
pub mod promo_service;
pub mod quota_service;
pub mod rate_limit_service;
pub mod referral_service;
pub mod stats_service;
pub mod user_locks;
pub mod user_service;
pub mod voice_service;

#[cfg(test)]
mod tests;

use chrono::Utc;
use quotabot_db::models::{Plan, User};
use sqlx::SqlitePool;

use catalog_service::CatalogService;
use error::{ServiceError, ServiceResult};
use plan_service::PlanService;
use rate_limit_service::RateLimitService;

pub(crate) async fn fetch_user(pool: &SqlitePool, telegram_id: i64) -> ServiceResult<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE telegram_id = ?")
        .bind(telegram_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ServiceError::NotFound("user"))
}

/// Shared admission preamble for the guarded resource flows: lazy PRO
/// refresh, plan resolution, then the per-minute rate limit. Plans with
/// `priority_processing` ride through a rate-limit deny.
pub(crate) async fn admit(
    pool: &SqlitePool,
    plans: &PlanService,
    catalog: &CatalogService,
    rate_limits: &RateLimitService,
    telegram_id: i64,
) -> ServiceResult<(User, Plan)> {
    let user = fetch_user(pool, telegram_id).await?;
    let (user, _) = plans.refresh_pro_status(user).await?;
    let plan = catalog.plan_for(&user).await?;

    let decision = rate_limits.check(telegram_id).await;
    if !decision.allowed && !plan.priority_processing {
        let reset_at = decision.reset_at.unwrap_or_else(Utc::now);
        return Err(ServiceError::RateLimited { reset_at });
    }

    Ok((user, plan))
}

/// Maps an exhausted provider chain to the error handed back to the user:
/// the last provider's failure, or a static note when no provider was
/// configured at all.
pub(crate) fn chain_exhausted(last_err: Option<anyhow::Error>, none_configured: &str) -> ServiceError {
    ServiceError::Provider(
        last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| none_configured.to_string()),
    )
}
