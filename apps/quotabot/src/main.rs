use std::io;
use std::sync::Arc;

use anyhow::Result;
use dotenvy::dotenv;
use quotabot_db::repositories::UserRepository;
use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bot;
mod config;
mod providers;
mod services;
mod state;

use crate::config::Config;
use crate::providers::groq::GroqProvider;
use crate::providers::gtts::GttsProvider;
use crate::providers::huggingface::{HfImageProvider, HfWhisperProvider};
use crate::providers::openrouter::OpenRouterProvider;
use crate::providers::pollinations::PollinationsProvider;
use crate::providers::{ImageProvider, SttProvider, TextProvider, TtsProvider};
use crate::services::catalog_service::CatalogService;
use crate::services::chat_service::ChatService;
use crate::services::image_service::ImageService;
use crate::services::plan_service::PlanService;
use crate::services::promo_service::PromoService;
use crate::services::quota_service::QuotaService;
use crate::services::rate_limit_service::RateLimitService;
use crate::services::referral_service::ReferralService;
use crate::services::stats_service::StatsService;
use crate::services::user_locks::UserLocks;
use crate::services::user_service::UserService;
use crate::services::voice_service::VoiceService;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let file_appender = tracing_appender::rolling::never(".", "quotabot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quotabot=debug,sqlx=warn,teloxide=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    let config = Config::from_env()?;
    info!("Starting quotabot...");

    let pool = quotabot_db::connect(&config.database_url).await?;

    let locks = UserLocks::new();
    let catalog = Arc::new(CatalogService::new(pool.clone()));
    let plans = Arc::new(PlanService::new(pool.clone()));
    let quota = Arc::new(QuotaService::new(pool.clone()));
    let users = Arc::new(UserService::new(pool.clone()));
    let promos = Arc::new(PromoService::new(pool.clone()));
    let referrals = Arc::new(ReferralService::new(pool.clone()));
    let rate_limits = Arc::new(RateLimitService::new(pool.clone()));
    let stats = Arc::new(StatsService::new(
        pool.clone(),
        catalog.clone(),
        quota.clone(),
    ));

    // Providers without a configured key are left out of their chain.
    let mut text_providers: Vec<Arc<dyn TextProvider>> = Vec::new();
    if let Some(key) = &config.groq_api_key {
        text_providers.push(Arc::new(GroqProvider::new(key.clone())));
    }
    if let Some(key) = &config.openrouter_api_key {
        text_providers.push(Arc::new(OpenRouterProvider::new(
            key.clone(),
            config.default_model.clone(),
        )));
    }
    if text_providers.is_empty() {
        warn!("No text provider API key configured, chat requests will fail");
    }

    let mut image_providers: Vec<Arc<dyn ImageProvider>> =
        vec![Arc::new(PollinationsProvider::new())];
    let mut stt_providers: Vec<Arc<dyn SttProvider>> = Vec::new();
    if let Some(key) = &config.hf_api_key {
        image_providers.push(Arc::new(HfImageProvider::new(key.clone())));
        stt_providers.push(Arc::new(HfWhisperProvider::new(key.clone())));
    }
    let tts_providers: Vec<Arc<dyn TtsProvider>> = vec![Arc::new(GttsProvider::new())];

    let chat = Arc::new(ChatService::new(
        pool.clone(),
        locks.clone(),
        catalog.clone(),
        plans.clone(),
        quota.clone(),
        users.clone(),
        stats.clone(),
        rate_limits.clone(),
        text_providers,
        config.default_model.clone(),
    ));
    let images = Arc::new(ImageService::new(
        pool.clone(),
        locks.clone(),
        catalog.clone(),
        plans.clone(),
        quota.clone(),
        rate_limits.clone(),
        image_providers,
    ));
    let voice = Arc::new(VoiceService::new(
        pool.clone(),
        locks.clone(),
        catalog.clone(),
        plans.clone(),
        quota.clone(),
        rate_limits.clone(),
        tts_providers,
        stt_providers,
        config.tts_lang.clone(),
    ));

    let bot = Bot::new(&config.bot_token);

    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config),
        user_repo: UserRepository::new(pool),
        users,
        catalog,
        plans,
        quota,
        promos,
        referrals,
        rate_limits,
        stats,
        chat,
        images,
        voice,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    bot::run_bot(bot, shutdown_rx, state).await;

    Ok(())
}
