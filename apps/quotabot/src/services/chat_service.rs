use std::sync::Arc;

use quotabot_db::models::AiModel;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::providers::{TextOutput, TextProvider};

use super::catalog_service::CatalogService;
use super::error::{ServiceError, ServiceResult};
use super::plan_service::PlanService;
use super::quota_service::QuotaService;
use super::rate_limit_service::RateLimitService;
use super::stats_service::StatsService;
use super::user_locks::UserLocks;
use super::user_service::UserService;
use super::{admit, chain_exhausted};

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub model_name: String,
    pub tokens_used: i64,
}

/// The guarded chat flow: rate limit, token balances, model resolution,
/// premium-model gate, provider chain, then the commits. The user's lock
/// is held from the first check to the last commit.
#[derive(Clone)]
pub struct ChatService {
    pool: SqlitePool,
    locks: UserLocks,
    catalog: Arc<CatalogService>,
    plans: Arc<PlanService>,
    quota: Arc<QuotaService>,
    users: Arc<UserService>,
    stats: Arc<StatsService>,
    rate_limits: Arc<RateLimitService>,
    providers: Vec<Arc<dyn TextProvider>>,
    default_model: String,
}

impl ChatService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        locks: UserLocks,
        catalog: Arc<CatalogService>,
        plans: Arc<PlanService>,
        quota: Arc<QuotaService>,
        users: Arc<UserService>,
        stats: Arc<StatsService>,
        rate_limits: Arc<RateLimitService>,
        providers: Vec<Arc<dyn TextProvider>>,
        default_model: String,
    ) -> Self {
        Self {
            pool,
            locks,
            catalog,
            plans,
            quota,
            users,
            stats,
            rate_limits,
            providers,
            default_model,
        }
    }

    pub async fn generate(&self, telegram_id: i64, prompt: &str) -> ServiceResult<ChatReply> {
        let _guard = self.locks.acquire(telegram_id).await;

        let (user, plan) = admit(
            &self.pool,
            &self.plans,
            &self.catalog,
            &self.rate_limits,
            telegram_id,
        )
        .await?;

        if user.daily_used >= user.daily_tokens {
            return Err(ServiceError::Exhausted {
                resource: "chat tokens",
                limit: user.daily_tokens,
                remaining: user.daily_remaining(),
                resets: "daily",
            });
        }
        if user.total_used >= user.total_tokens {
            return Err(ServiceError::Exhausted {
                resource: "chat tokens",
                limit: user.total_tokens,
                remaining: user.total_remaining(),
                resets: "total",
            });
        }

        let model = match user.selected_model.as_deref() {
            Some(id) => match self.catalog.get_model(id).await {
                Ok(model) => model,
                // A model can be deactivated while still selected.
                Err(ServiceError::NotFound(_)) => {
                    self.catalog.get_model(&self.default_model).await?
                }
                Err(e) => return Err(e),
            },
            None => self.catalog.get_model(&self.default_model).await?,
        };

        if let Some(check) = self.quota.check_premium(telegram_id, &model, &plan).await? {
            if !check.allowed {
                return Err(ServiceError::Exhausted {
                    resource: "premium model calls",
                    limit: check.limit,
                    remaining: check.remaining,
                    resets: if plan.is_free() { "daily" } else { "monthly" },
                });
            }
        }

        let output = self.run_chain(prompt, &model).await?;
        let tokens_used = output
            .tokens_used
            .unwrap_or_else(|| estimate_tokens(prompt, &output.text));

        self.users
            .record_token_usage(telegram_id, tokens_used)
            .await?;
        self.stats.record(telegram_id, tokens_used).await?;
        if model.is_premium() {
            self.quota
                .commit_premium(telegram_id, &model.id, &plan)
                .await?;
        }

        info!(
            user = telegram_id,
            model = %model.id,
            tokens = tokens_used,
            "Chat request served"
        );

        Ok(ChatReply {
            text: output.text,
            model_name: model.name,
            tokens_used,
        })
    }

    async fn run_chain(&self, prompt: &str, model: &AiModel) -> ServiceResult<TextOutput> {
        let mut last_err: Option<anyhow::Error> = None;

        for provider in &self.providers {
            match provider.generate(prompt, model).await {
                Ok(output) => return Ok(output),
                Err(err) => {
                    warn!(provider = provider.name(), error = %err, "Text provider failed");
                    last_err = Some(err);
                }
            }
        }

        Err(chain_exhausted(last_err, "no text providers configured"))
    }
}

/// Rough fallback when the provider reports no usage data: four characters
/// per token over prompt plus reply, never below one.
fn estimate_tokens(prompt: &str, reply: &str) -> i64 {
    (((prompt.len() + reply.len()) / 4) as i64).max(1)
}
