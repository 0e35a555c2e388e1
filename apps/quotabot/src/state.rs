use std::sync::Arc;

use quotabot_db::repositories::UserRepository;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::services::catalog_service::CatalogService;
use crate::services::chat_service::ChatService;
use crate::services::image_service::ImageService;
use crate::services::plan_service::PlanService;
use crate::services::promo_service::PromoService;
use crate::services::quota_service::QuotaService;
use crate::services::rate_limit_service::RateLimitService;
use crate::services::referral_service::ReferralService;
use crate::services::stats_service::StatsService;
use crate::services::user_service::UserService;
use crate::services::voice_service::VoiceService;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub user_repo: UserRepository,
    pub users: Arc<UserService>,
    pub catalog: Arc<CatalogService>,
    pub plans: Arc<PlanService>,
    pub quota: Arc<QuotaService>,
    pub promos: Arc<PromoService>,
    pub referrals: Arc<ReferralService>,
    pub rate_limits: Arc<RateLimitService>,
    pub stats: Arc<StatsService>,
    pub chat: Arc<ChatService>,
    pub images: Arc<ImageService>,
    pub voice: Arc<VoiceService>,
}
