use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::providers::ImageProvider;

use super::catalog_service::CatalogService;
use super::error::{ServiceError, ServiceResult};
use super::plan_service::PlanService;
use super::quota_service::{MeteredResource, QuotaService};
use super::rate_limit_service::RateLimitService;
use super::user_locks::UserLocks;
use super::{admit, chain_exhausted};

/// Guarded image generation: monthly quota check, provider chain, commit
/// only after a provider returned actual image bytes.
#[derive(Clone)]
pub struct ImageService {
    pool: SqlitePool,
    locks: UserLocks,
    catalog: Arc<CatalogService>,
    plans: Arc<PlanService>,
    quota: Arc<QuotaService>,
    rate_limits: Arc<RateLimitService>,
    providers: Vec<Arc<dyn ImageProvider>>,
}

impl ImageService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        locks: UserLocks,
        catalog: Arc<CatalogService>,
        plans: Arc<PlanService>,
        quota: Arc<QuotaService>,
        rate_limits: Arc<RateLimitService>,
        providers: Vec<Arc<dyn ImageProvider>>,
    ) -> Self {
        Self {
            pool,
            locks,
            catalog,
            plans,
            quota,
            rate_limits,
            providers,
        }
    }

    pub async fn generate(&self, telegram_id: i64, prompt: &str) -> ServiceResult<Vec<u8>> {
        let _guard = self.locks.acquire(telegram_id).await;

        let (_user, plan) = admit(
            &self.pool,
            &self.plans,
            &self.catalog,
            &self.rate_limits,
            telegram_id,
        )
        .await?;

        let check = self
            .quota
            .check_monthly(telegram_id, MeteredResource::Image, &plan)
            .await?;
        if !check.allowed {
            return Err(ServiceError::Exhausted {
                resource: MeteredResource::Image.label(),
                limit: check.limit,
                remaining: check.remaining,
                resets: "monthly",
            });
        }

        let mut last_err: Option<anyhow::Error> = None;
        for provider in &self.providers {
            match provider.generate(prompt).await {
                Ok(bytes) => {
                    self.quota
                        .commit_monthly(telegram_id, MeteredResource::Image)
                        .await?;
                    info!(
                        user = telegram_id,
                        provider = provider.name(),
                        size = bytes.len(),
                        "Image generated"
                    );
                    return Ok(bytes);
                }
                Err(err) => {
                    warn!(provider = provider.name(), error = %err, "Image provider failed");
                    last_err = Some(err);
                }
            }
        }

        Err(chain_exhausted(last_err, "no image providers configured"))
    }
}
