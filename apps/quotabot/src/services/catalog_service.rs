use quotabot_db::models::{AiModel, Plan, User};
use sqlx::SqlitePool;

use super::error::{ServiceError, ServiceResult};

/// Read side of the plan and model catalogs. Both are seeded at startup
/// and edited only through admin commands, so plain reads are enough.
#[derive(Debug, Clone)]
pub struct CatalogService {
    pool: SqlitePool,
}

impl CatalogService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_plans(&self) -> ServiceResult<Vec<Plan>> {
        let plans = sqlx::query_as::<_, Plan>(
            "SELECT * FROM plans WHERE is_active = 1 ORDER BY price_monthly ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }

    pub async fn get_plan(&self, name: &str) -> ServiceResult<Plan> {
        let name = name.trim().to_uppercase();

        sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE name = ? AND is_active = 1")
            .bind(&name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ServiceError::NotFound("plan"))
    }

    /// Resolves the user's active plan, falling back to FREE when the
    /// user carries a plan name the catalog no longer knows.
    pub async fn plan_for(&self, user: &User) -> ServiceResult<Plan> {
        match self.get_plan(&user.plan_type).await {
            Ok(plan) => Ok(plan),
            Err(ServiceError::NotFound(_)) => self.get_plan("FREE").await,
            Err(e) => Err(e),
        }
    }

    pub async fn list_models(&self) -> ServiceResult<Vec<AiModel>> {
        let models = sqlx::query_as::<_, AiModel>(
            "SELECT * FROM models WHERE is_active = 1 ORDER BY model_type ASC, name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(models)
    }

    pub async fn get_model(&self, id: &str) -> ServiceResult<AiModel> {
        sqlx::query_as::<_, AiModel>("SELECT * FROM models WHERE id = ? AND is_active = 1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ServiceError::NotFound("model"))
    }
}
