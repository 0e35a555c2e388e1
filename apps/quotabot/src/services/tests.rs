use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use quotabot_db::models::{AiModel, Plan, User};
use quotabot_db::repositories::UserRepository;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::providers::{ImageProvider, SttProvider, TextOutput, TextProvider, TtsProvider};

use super::catalog_service::CatalogService;
use super::chat_service::ChatService;
use super::error::ServiceError;
use super::image_service::ImageService;
use super::plan_service::{DEFAULT_PRO_DAYS, PlanService};
use super::promo_service::{Benefit, NewPromocode, PromoService};
use super::quota_service::{
    MeteredResource, QuotaService, day_key, month_key, premium_limit, previous_month_key,
};
use super::rate_limit_service::{MAX_REQUESTS, RateLimitService, WINDOW_SECS};
use super::referral_service::ReferralService;
use super::stats_service::StatsService;
use super::user_locks::UserLocks;
use super::user_service::UserService;
use super::voice_service::VoiceService;
use super::{admit, fetch_user};

// A single connection is required for :memory: databases; a second pooled
// connection would see an empty schema.
async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    quotabot_db::db::init_schema(&pool).await.expect("schema init");
    pool
}

async fn seed_user(pool: &SqlitePool, telegram_id: i64) -> User {
    UserRepository::new(pool.clone())
        .ensure_user(telegram_id, Some("tester"), Some("Tess"), None)
        .await
        .expect("seed user")
}

async fn plan(pool: &SqlitePool, name: &str) -> Plan {
    CatalogService::new(pool.clone())
        .get_plan(name)
        .await
        .expect("seeded plan")
}

struct ScriptedText {
    reply: &'static str,
    tokens: Option<i64>,
    fail: bool,
}

impl ScriptedText {
    fn ok(reply: &'static str, tokens: Option<i64>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            tokens,
            fail: false,
        })
    }

    fn down() -> Arc<Self> {
        Arc::new(Self {
            reply: "",
            tokens: None,
            fail: true,
        })
    }
}

#[async_trait]
impl TextProvider for ScriptedText {
    fn name(&self) -> &'static str {
        "scripted-text"
    }

    async fn generate(&self, _prompt: &str, _model: &AiModel) -> anyhow::Result<TextOutput> {
        if self.fail {
            anyhow::bail!("scripted outage");
        }
        Ok(TextOutput {
            text: self.reply.to_string(),
            tokens_used: self.tokens,
        })
    }
}

struct ScriptedImage {
    fail: bool,
}

#[async_trait]
impl ImageProvider for ScriptedImage {
    fn name(&self) -> &'static str {
        "scripted-image"
    }

    async fn generate(&self, _prompt: &str) -> anyhow::Result<Vec<u8>> {
        if self.fail {
            anyhow::bail!("scripted outage");
        }
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}

struct ScriptedTts;

#[async_trait]
impl TtsProvider for ScriptedTts {
    fn name(&self) -> &'static str {
        "scripted-tts"
    }

    async fn synthesize(&self, _text: &str, _lang: &str) -> anyhow::Result<Vec<u8>> {
        Ok(vec![1, 2, 3])
    }
}

struct ScriptedStt;

#[async_trait]
impl SttProvider for ScriptedStt {
    fn name(&self) -> &'static str {
        "scripted-stt"
    }

    async fn transcribe(&self, audio: Vec<u8>) -> anyhow::Result<String> {
        Ok(format!("{} bytes", audio.len()))
    }
}

fn chat(pool: &SqlitePool, providers: Vec<Arc<dyn TextProvider>>) -> ChatService {
    let catalog = Arc::new(CatalogService::new(pool.clone()));
    let quota = Arc::new(QuotaService::new(pool.clone()));
    ChatService::new(
        pool.clone(),
        UserLocks::new(),
        catalog.clone(),
        Arc::new(PlanService::new(pool.clone())),
        quota.clone(),
        Arc::new(UserService::new(pool.clone())),
        Arc::new(StatsService::new(pool.clone(), catalog, quota)),
        Arc::new(RateLimitService::new(pool.clone())),
        providers,
        "meta-llama/llama-3.1-8b-instruct".to_string(),
    )
}

fn images(pool: &SqlitePool, providers: Vec<Arc<dyn ImageProvider>>) -> ImageService {
    ImageService::new(
        pool.clone(),
        UserLocks::new(),
        Arc::new(CatalogService::new(pool.clone())),
        Arc::new(PlanService::new(pool.clone())),
        Arc::new(QuotaService::new(pool.clone())),
        Arc::new(RateLimitService::new(pool.clone())),
        providers,
    )
}

fn voice(
    pool: &SqlitePool,
    tts: Vec<Arc<dyn TtsProvider>>,
    stt: Vec<Arc<dyn SttProvider>>,
) -> VoiceService {
    VoiceService::new(
        pool.clone(),
        UserLocks::new(),
        Arc::new(CatalogService::new(pool.clone())),
        Arc::new(PlanService::new(pool.clone())),
        Arc::new(QuotaService::new(pool.clone())),
        Arc::new(RateLimitService::new(pool.clone())),
        tts,
        stt,
        "en".to_string(),
    )
}

#[test]
fn bucket_keys_follow_the_calendar() {
    let jan = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
    assert_eq!(month_key(jan), "2025-01");
    assert_eq!(day_key(jan), "2025-01-15");
    assert_eq!(previous_month_key(jan), "2024-12");

    let mar = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    assert_eq!(previous_month_key(mar), "2025-02");
}

#[tokio::test]
async fn premium_budget_scales_with_the_plan() {
    let pool = memory_pool().await;

    assert_eq!(premium_limit(&plan(&pool, "FREE").await), 1);
    assert_eq!(premium_limit(&plan(&pool, "PRO").await), 150);
    assert_eq!(premium_limit(&plan(&pool, "PREMIUM").await), 999_999);
}

#[tokio::test]
async fn monthly_usage_counts_down_to_denial() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 100).await;
    let quota = QuotaService::new(pool.clone());
    let free = plan(&pool, "FREE").await;

    let first = quota
        .check_monthly(user.telegram_id, MeteredResource::Image, &free)
        .await
        .unwrap();
    assert!(first.allowed);
    assert_eq!(first.remaining, 3);
    assert_eq!(first.limit, 3);

    for _ in 0..3 {
        quota
            .commit_monthly(user.telegram_id, MeteredResource::Image)
            .await
            .unwrap();
    }

    let spent = quota
        .check_monthly(user.telegram_id, MeteredResource::Image, &free)
        .await
        .unwrap();
    assert!(!spent.allowed);
    assert_eq!(spent.remaining, 0);
}

#[tokio::test]
async fn counters_from_an_old_month_do_not_count() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 101).await;
    let quota = QuotaService::new(pool.clone());
    let free = plan(&pool, "FREE").await;

    sqlx::query("INSERT INTO image_usage (user_id, month_year, usage_count) VALUES (?, '2020-01', 3)")
        .bind(user.telegram_id)
        .execute(&pool)
        .await
        .unwrap();

    let check = quota
        .check_monthly(user.telegram_id, MeteredResource::Image, &free)
        .await
        .unwrap();
    assert!(check.allowed);
    assert_eq!(check.remaining, free.image_limit);
}

#[tokio::test]
async fn free_models_skip_the_premium_gate() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 102).await;
    let quota = QuotaService::new(pool.clone());
    let catalog = CatalogService::new(pool.clone());
    let free = plan(&pool, "FREE").await;

    let model = catalog
        .get_model("meta-llama/llama-3.1-8b-instruct")
        .await
        .unwrap();
    let gate = quota
        .check_premium(user.telegram_id, &model, &free)
        .await
        .unwrap();
    assert!(gate.is_none());
}

#[tokio::test]
async fn premium_bucket_is_daily_on_free_and_monthly_on_paid() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 103).await;
    let quota = QuotaService::new(pool.clone());
    let free = plan(&pool, "FREE").await;
    let pro = plan(&pool, "PRO").await;

    quota
        .commit_premium(user.telegram_id, "openai/gpt-4o", &free)
        .await
        .unwrap();
    quota
        .commit_premium(user.telegram_id, "openai/gpt-4o", &pro)
        .await
        .unwrap();

    let buckets: Vec<String> = sqlx::query_scalar(
        "SELECT month_year FROM pro_model_usage WHERE user_id = ? ORDER BY month_year",
    )
    .bind(user.telegram_id)
    .fetch_all(&pool)
    .await
    .unwrap();

    let now = Utc::now();
    assert_eq!(buckets, vec![month_key(now), day_key(now)]);
}

#[tokio::test]
async fn free_premium_trickle_is_one_per_day() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 104).await;
    let quota = QuotaService::new(pool.clone());
    let catalog = CatalogService::new(pool.clone());
    let free = plan(&pool, "FREE").await;
    let model = catalog.get_model("openai/gpt-4o").await.unwrap();

    let gate = quota
        .check_premium(user.telegram_id, &model, &free)
        .await
        .unwrap()
        .unwrap();
    assert!(gate.allowed);
    assert_eq!(gate.limit, 1);

    quota
        .commit_premium(user.telegram_id, &model.id, &free)
        .await
        .unwrap();

    let gate = quota
        .check_premium(user.telegram_id, &model, &free)
        .await
        .unwrap()
        .unwrap();
    assert!(!gate.allowed);
    assert_eq!(gate.remaining, 0);
}

#[tokio::test]
async fn sweep_drops_only_stale_buckets() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 105).await;
    let quota = QuotaService::new(pool.clone());

    quota
        .commit_monthly(user.telegram_id, MeteredResource::Tts)
        .await
        .unwrap();
    sqlx::query("INSERT INTO tts_usage (user_id, month_year, usage_count) VALUES (?, '2020-01', 5)")
        .bind(user.telegram_id)
        .execute(&pool)
        .await
        .unwrap();

    let removed = quota.sweep_stale_buckets().await.unwrap();
    assert_eq!(removed, 1);

    let buckets: Vec<String> = sqlx::query_scalar("SELECT month_year FROM tts_usage WHERE user_id = ?")
        .bind(user.telegram_id)
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(buckets, vec![month_key(Utc::now())]);
}

#[tokio::test]
async fn tokens_code_raises_ceilings_once() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 200).await;
    let promos = PromoService::new(pool.clone());

    // Lowercase on purpose, codes are case-insensitive.
    let redeemed = promos.redeem("welcome2025", user.telegram_id).await.unwrap();
    assert_eq!(redeemed.code, "WELCOME2025");
    assert!(matches!(
        redeemed.benefit,
        Benefit::Tokens {
            daily: 1000,
            total: 5000
        }
    ));

    let after = fetch_user(&pool, user.telegram_id).await.unwrap();
    assert_eq!(after.daily_tokens, user.daily_tokens + 1000);
    assert_eq!(after.total_tokens, user.total_tokens + 5000);

    let again = promos.redeem("WELCOME2025", user.telegram_id).await;
    assert!(matches!(again, Err(ServiceError::AlreadyUsed)));

    let unchanged = fetch_user(&pool, user.telegram_id).await.unwrap();
    assert_eq!(unchanged.daily_tokens, after.daily_tokens);
    assert_eq!(unchanged.total_tokens, after.total_tokens);

    let usage: i64 =
        sqlx::query_scalar("SELECT current_usage FROM promocodes WHERE code = 'WELCOME2025'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(usage, 1);
}

#[tokio::test]
async fn exhausted_code_rejects_the_next_user() {
    let pool = memory_pool().await;
    let first = seed_user(&pool, 201).await;
    let second = seed_user(&pool, 202).await;
    let promos = PromoService::new(pool.clone());

    promos
        .create(NewPromocode {
            code: Some("ONCE".into()),
            promo_type: "TOKENS".into(),
            daily_tokens: 500,
            total_tokens: 500,
            max_usage: 1,
            ..Default::default()
        })
        .await
        .unwrap();

    promos.redeem("ONCE", first.telegram_id).await.unwrap();

    let err = promos.redeem("ONCE", second.telegram_id).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Exhausted {
            resource: "promocode",
            ..
        }
    ));
}

#[tokio::test]
async fn unknown_or_disabled_codes_are_not_found() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 203).await;
    let promos = PromoService::new(pool.clone());

    let err = promos.redeem("NOPE", user.telegram_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound("promocode")));

    promos
        .create(NewPromocode {
            code: Some("PAUSED".into()),
            promo_type: "TOKENS".into(),
            daily_tokens: 100,
            total_tokens: 100,
            max_usage: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    sqlx::query("UPDATE promocodes SET is_active = 0 WHERE code = 'PAUSED'")
        .execute(&pool)
        .await
        .unwrap();

    let err = promos.redeem("PAUSED", user.telegram_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound("promocode")));
}

#[tokio::test]
async fn tts_credit_can_exceed_the_plan_limit() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 204).await;
    let quota = QuotaService::new(pool.clone());
    let promos = PromoService::new(pool.clone());
    let free = plan(&pool, "FREE").await;

    quota
        .commit_monthly(user.telegram_id, MeteredResource::Tts)
        .await
        .unwrap();
    let spent = quota
        .check_monthly(user.telegram_id, MeteredResource::Tts, &free)
        .await
        .unwrap();
    assert!(!spent.allowed);

    promos
        .create(NewPromocode {
            code: Some("VOICE2".into()),
            promo_type: "TTS".into(),
            tts_limit: 2,
            max_usage: 5,
            ..Default::default()
        })
        .await
        .unwrap();
    promos.redeem("VOICE2", user.telegram_id).await.unwrap();

    // The credit is not floored at the plan limit: remaining exceeds it.
    let credited = quota
        .check_monthly(user.telegram_id, MeteredResource::Tts, &free)
        .await
        .unwrap();
    assert!(credited.allowed);
    assert_eq!(credited.remaining, 2);
    assert_eq!(credited.limit, 1);

    let stored: i64 =
        sqlx::query_scalar("SELECT usage_count FROM tts_usage WHERE user_id = ? AND month_year = ?")
            .bind(user.telegram_id)
            .bind(month_key(Utc::now()))
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(stored, -1);
}

#[tokio::test]
async fn stt_credit_lands_as_negative_usage() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 205).await;
    let quota = QuotaService::new(pool.clone());
    let promos = PromoService::new(pool.clone());
    let free = plan(&pool, "FREE").await;

    promos
        .create(NewPromocode {
            code: Some("EARS3".into()),
            promo_type: "STT".into(),
            stt_limit: 3,
            max_usage: 5,
            ..Default::default()
        })
        .await
        .unwrap();
    let redeemed = promos.redeem("EARS3", user.telegram_id).await.unwrap();
    assert!(matches!(redeemed.benefit, Benefit::SttCredit { amount: 3 }));

    let check = quota
        .check_monthly(user.telegram_id, MeteredResource::Stt, &free)
        .await
        .unwrap();
    assert_eq!(check.remaining, free.stt_limit + 3);

    let stored: i64 =
        sqlx::query_scalar("SELECT usage_count FROM stt_usage WHERE user_id = ?")
            .bind(user.telegram_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(stored, -3);
}

#[tokio::test]
async fn pro_code_grants_the_pro_plan() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 206).await;
    let promos = PromoService::new(pool.clone());

    let redeemed = promos.redeem("PROWEEK", user.telegram_id).await.unwrap();
    assert!(matches!(redeemed.benefit, Benefit::Pro { days: 7, .. }));

    let after = fetch_user(&pool, user.telegram_id).await.unwrap();
    assert!(after.is_pro);
    assert_eq!(after.plan_type, "PRO");
    assert_eq!(after.daily_tokens, 8000);
    assert_eq!(after.total_tokens, 80000);
    assert_eq!(after.daily_used, 0);

    let expected = Utc::now() + Duration::days(7);
    let drift = (after.pro_expires_at.unwrap() - expected).num_seconds().abs();
    assert!(drift < 5, "expiry drifted by {}s", drift);
}

#[tokio::test]
async fn premium_code_switches_the_plan() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 207).await;
    let promos = PromoService::new(pool.clone());

    promos
        .create(NewPromocode {
            code: Some("UPGRADE".into()),
            promo_type: "PREMIUM".into(),
            plan_name: Some("premium".into()),
            max_usage: 3,
            ..Default::default()
        })
        .await
        .unwrap();

    let redeemed = promos.redeem("UPGRADE", user.telegram_id).await.unwrap();
    assert!(matches!(redeemed.benefit, Benefit::PlanChange { .. }));

    let after = fetch_user(&pool, user.telegram_id).await.unwrap();
    assert_eq!(after.plan_type, "PREMIUM");
    assert!(after.is_pro);
    assert_eq!(after.daily_tokens, 12000);
    assert_eq!(after.total_tokens, 150000);
}

#[tokio::test]
async fn promocode_creation_validates_its_input() {
    let pool = memory_pool().await;
    let promos = PromoService::new(pool.clone());

    let err = promos
        .create(NewPromocode {
            promo_type: "TOKENS".into(),
            max_usage: 1,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let err = promos
        .create(NewPromocode {
            promo_type: "PRO".into(),
            max_usage: 1,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let err = promos
        .create(NewPromocode {
            promo_type: "PREMIUM".into(),
            plan_name: Some("GOLD".into()),
            max_usage: 1,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound("plan")));

    let err = promos
        .create(NewPromocode {
            promo_type: "VIP".into(),
            max_usage: 1,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    // max_usage comes from Default here, which is zero.
    let err = promos
        .create(NewPromocode {
            promo_type: "TOKENS".into(),
            daily_tokens: 100,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));
}

#[tokio::test]
async fn codes_are_generated_normalized_and_unique() {
    let pool = memory_pool().await;
    let promos = PromoService::new(pool.clone());

    let generated = promos
        .create(NewPromocode {
            promo_type: "TOKENS".into(),
            daily_tokens: 100,
            total_tokens: 100,
            max_usage: 1,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(generated.code.len(), 8);

    let named = promos
        .create(NewPromocode {
            code: Some("again".into()),
            promo_type: "TOKENS".into(),
            daily_tokens: 100,
            total_tokens: 100,
            max_usage: 1,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(named.code, "AGAIN");

    let err = promos
        .create(NewPromocode {
            code: Some("AGAIN".into()),
            promo_type: "TOKENS".into(),
            daily_tokens: 100,
            total_tokens: 100,
            max_usage: 1,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    promos.delete("again").await.unwrap();
    let err = promos.delete("AGAIN").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound("promocode")));
}

#[tokio::test]
async fn referral_credits_both_sides_once() {
    let pool = memory_pool().await;
    let referrer = seed_user(&pool, 300).await;
    let referred = seed_user(&pool, 301).await;
    let referrals = ReferralService::new(pool.clone());

    let link = referrals.create_link(referrer.telegram_id).await.unwrap();
    assert!(link.referral_code.starts_with("ref_"));

    let owner = referrals.resolve(&link.referral_code).await.unwrap();
    assert_eq!(owner, Some(referrer.telegram_id));

    referrals
        .process_referral(referrer.telegram_id, referred.telegram_id)
        .await
        .unwrap();

    let ref_after = fetch_user(&pool, referrer.telegram_id).await.unwrap();
    assert_eq!(ref_after.daily_tokens, referrer.daily_tokens + 5000);
    assert_eq!(ref_after.total_tokens, referrer.total_tokens + 15000);
    assert_eq!(ref_after.referral_count, 1);
    assert_eq!(ref_after.referral_earnings, 15000);

    let red_after = fetch_user(&pool, referred.telegram_id).await.unwrap();
    assert_eq!(red_after.daily_tokens, referred.daily_tokens + 3000);
    assert_eq!(red_after.total_tokens, referred.total_tokens + 10000);
    assert_eq!(red_after.referred_by, Some(referrer.telegram_id));

    let rewards: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM referral_rewards")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rewards, 2);

    let same_link = referrals.create_link(referrer.telegram_id).await.unwrap();
    assert_eq!(same_link.referral_code, link.referral_code);
    assert_eq!(same_link.clicks, 1);
    assert_eq!(same_link.conversions, 1);
}

#[tokio::test]
async fn a_user_is_referred_at_most_once() {
    let pool = memory_pool().await;
    let referrer = seed_user(&pool, 302).await;
    let other = seed_user(&pool, 303).await;
    let referred = seed_user(&pool, 304).await;
    let referrals = ReferralService::new(pool.clone());

    referrals
        .process_referral(referrer.telegram_id, referred.telegram_id)
        .await
        .unwrap();

    let err = referrals
        .process_referral(referrer.telegram_id, referred.telegram_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyUsed));

    // A different referrer does not get around it either.
    let err = referrals
        .process_referral(other.telegram_id, referred.telegram_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyUsed));

    let red_after = fetch_user(&pool, referred.telegram_id).await.unwrap();
    assert_eq!(red_after.referred_by, Some(referrer.telegram_id));
}

#[tokio::test]
async fn self_referral_changes_nothing() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 305).await;
    let referrals = ReferralService::new(pool.clone());

    let err = referrals
        .process_referral(user.telegram_id, user.telegram_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::SelfReferral));

    let after = fetch_user(&pool, user.telegram_id).await.unwrap();
    assert_eq!(after.daily_tokens, user.daily_tokens);
    assert_eq!(after.referral_count, 0);
}

#[tokio::test]
async fn referral_stats_and_leaderboard() {
    let pool = memory_pool().await;
    let referrer = seed_user(&pool, 306).await;
    let first = seed_user(&pool, 307).await;
    let second = seed_user(&pool, 308).await;
    let referrals = ReferralService::new(pool.clone());

    assert_eq!(referrals.resolve("ref_unknown").await.unwrap(), None);

    referrals
        .process_referral(referrer.telegram_id, first.telegram_id)
        .await
        .unwrap();
    referrals
        .process_referral(referrer.telegram_id, second.telegram_id)
        .await
        .unwrap();

    let stats = referrals.stats(referrer.telegram_id).await.unwrap();
    assert_eq!(stats.referral_count, 2);
    assert_eq!(stats.earnings, 30000);

    let top = referrals.leaderboard(5).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].telegram_id, referrer.telegram_id);
}

#[tokio::test]
async fn downgrade_keeps_consumption_and_clamps_remaining() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 400).await;
    let plans = PlanService::new(pool.clone());
    let users = UserService::new(pool.clone());

    plans.change_plan(user.telegram_id, "PREMIUM").await.unwrap();
    users.record_token_usage(user.telegram_id, 5000).await.unwrap();

    plans.change_plan(user.telegram_id, "free").await.unwrap();

    let after = fetch_user(&pool, user.telegram_id).await.unwrap();
    assert_eq!(after.plan_type, "FREE");
    assert!(!after.is_pro);
    assert!(after.pro_expires_at.is_none());
    assert_eq!(after.daily_tokens, 2000);
    assert_eq!(after.total_tokens, 15000);
    // Over-ceiling consumption survives the downgrade and clamps to zero.
    assert_eq!(after.daily_used, 5000);
    assert_eq!(after.daily_remaining(), 0);
}

#[tokio::test]
async fn upgrades_carry_a_thirty_day_term() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 401).await;
    let plans = PlanService::new(pool.clone());

    let err = plans.change_plan(user.telegram_id, "GOLD").await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound("plan")));

    let pro = plans.change_plan(user.telegram_id, "PRO").await.unwrap();
    assert_eq!(pro.name, "PRO");

    let after = fetch_user(&pool, user.telegram_id).await.unwrap();
    assert!(after.is_pro);

    let expected = Utc::now() + Duration::days(DEFAULT_PRO_DAYS);
    let drift = (after.pro_expires_at.unwrap() - expected).num_seconds().abs();
    assert!(drift < 5, "expiry drifted by {}s", drift);
}

#[tokio::test]
async fn granting_pro_resets_the_daily_counter() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 402).await;
    let plans = PlanService::new(pool.clone());
    let users = UserService::new(pool.clone());

    users.record_token_usage(user.telegram_id, 1500).await.unwrap();

    let expires = plans.grant_pro(user.telegram_id, 14).await.unwrap();
    let drift = (expires - (Utc::now() + Duration::days(14))).num_seconds().abs();
    assert!(drift < 5);

    let after = fetch_user(&pool, user.telegram_id).await.unwrap();
    assert!(after.is_pro);
    assert_eq!(after.daily_tokens, 8000);
    assert_eq!(after.daily_used, 0);
    // The lifetime counter is not forgiven.
    assert_eq!(after.total_used, 1500);

    let err = plans.grant_pro(999_999, 7).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound("user")));
}

#[tokio::test]
async fn expired_pro_downgrades_lazily() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 403).await;
    let plans = PlanService::new(pool.clone());

    plans.grant_pro(user.telegram_id, 14).await.unwrap();

    let active = fetch_user(&pool, user.telegram_id).await.unwrap();
    let (active, downgraded) = plans.refresh_pro_status(active).await.unwrap();
    assert!(!downgraded);
    assert!(active.is_pro);

    sqlx::query("UPDATE users SET pro_expires_at = ? WHERE telegram_id = ?")
        .bind(Utc::now() - Duration::hours(1))
        .bind(user.telegram_id)
        .execute(&pool)
        .await
        .unwrap();

    assert!(!plans.is_user_pro(user.telegram_id).await.unwrap());

    let after = fetch_user(&pool, user.telegram_id).await.unwrap();
    assert!(!after.is_pro);
    assert_eq!(after.plan_type, "FREE");
    assert_eq!(after.daily_tokens, 2000);
    assert!(after.pro_expires_at.is_none());
}

#[tokio::test]
async fn ceiling_adjustments_guard_against_negatives() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 404).await;
    let users = UserService::new(pool.clone());

    let up = users.add_tokens(user.telegram_id, 1000, 2000).await.unwrap();
    assert_eq!(up.daily_tokens, 3000);
    assert_eq!(up.total_tokens, 17000);

    let err = users.add_tokens(user.telegram_id, -5, 0).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let err = users
        .remove_tokens(user.telegram_id, 10_000, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let down = users.remove_tokens(user.telegram_id, 3000, 0).await.unwrap();
    assert_eq!(down.daily_tokens, 0);
    assert_eq!(down.total_tokens, 17000);

    let err = users.add_tokens(999_999, 1, 1).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound("user")));
}

#[tokio::test]
async fn model_selection_rejects_unknown_ids() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 405).await;
    let users = UserService::new(pool.clone());

    let model = users
        .set_selected_model(user.telegram_id, "openai/gpt-4o")
        .await
        .unwrap();
    assert!(model.is_premium());

    let after = fetch_user(&pool, user.telegram_id).await.unwrap();
    assert_eq!(after.selected_model.as_deref(), Some("openai/gpt-4o"));

    let err = users
        .set_selected_model(user.telegram_id, "nope/nope")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound("model")));
}

#[tokio::test]
async fn daily_reset_touches_only_spent_users() {
    let pool = memory_pool().await;
    let spender = seed_user(&pool, 406).await;
    let _idle = seed_user(&pool, 407).await;
    let users = UserService::new(pool.clone());

    users.record_token_usage(spender.telegram_id, 800).await.unwrap();

    let reset = users.reset_daily_usage_all().await.unwrap();
    assert_eq!(reset, 1);

    let after = fetch_user(&pool, spender.telegram_id).await.unwrap();
    assert_eq!(after.daily_used, 0);
    assert_eq!(after.total_used, 800);
}

#[tokio::test]
async fn burst_window_allows_ten_then_denies() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 500).await;
    let limiter = RateLimitService::new(pool.clone());

    for expected in (0..MAX_REQUESTS).rev() {
        let decision = limiter.check(user.telegram_id).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, expected);
    }

    let denied = limiter.check(user.telegram_id).await;
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);

    let reset_at = denied.reset_at.unwrap();
    assert!(reset_at > Utc::now());
    assert!(reset_at <= Utc::now() + Duration::seconds(WINDOW_SECS + 1));
}

#[tokio::test]
async fn a_stale_window_restarts_cleanly() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 501).await;
    let limiter = RateLimitService::new(pool.clone());

    for _ in 0..MAX_REQUESTS {
        limiter.check(user.telegram_id).await;
    }
    assert!(!limiter.check(user.telegram_id).await.allowed);

    sqlx::query("UPDATE rate_limits SET window_start = ? WHERE user_id = ?")
        .bind(Utc::now() - Duration::seconds(WINDOW_SECS + 1))
        .bind(user.telegram_id)
        .execute(&pool)
        .await
        .unwrap();

    let fresh = limiter.check(user.telegram_id).await;
    assert!(fresh.allowed);
    assert_eq!(fresh.remaining, MAX_REQUESTS - 1);
}

#[tokio::test]
async fn status_reads_without_spending_and_reset_clears() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 502).await;
    let limiter = RateLimitService::new(pool.clone());

    let fresh = limiter.status(user.telegram_id).await.unwrap();
    assert!(fresh.allowed);
    assert_eq!(fresh.remaining, MAX_REQUESTS);

    limiter.check(user.telegram_id).await;
    limiter.check(user.telegram_id).await;

    let after = limiter.status(user.telegram_id).await.unwrap();
    assert_eq!(after.remaining, MAX_REQUESTS - 2);
    let again = limiter.status(user.telegram_id).await.unwrap();
    assert_eq!(again.remaining, MAX_REQUESTS - 2);

    assert!(limiter.reset(user.telegram_id).await.unwrap());
    assert!(!limiter.reset(user.telegram_id).await.unwrap());

    let cleared = limiter.status(user.telegram_id).await.unwrap();
    assert_eq!(cleared.remaining, MAX_REQUESTS);
}

#[tokio::test]
async fn limiter_fails_open_on_storage_errors() {
    let pool = memory_pool().await;
    let limiter = RateLimitService::new(pool.clone());

    sqlx::query("DROP TABLE rate_limits")
        .execute(&pool)
        .await
        .unwrap();

    let decision = limiter.check(42).await;
    assert!(decision.allowed);
    assert_eq!(decision.remaining, MAX_REQUESTS);
}

#[tokio::test]
async fn priority_plans_ride_through_the_limiter() {
    let pool = memory_pool().await;
    let vip = seed_user(&pool, 503).await;
    let regular = seed_user(&pool, 504).await;
    let plans = PlanService::new(pool.clone());
    let catalog = CatalogService::new(pool.clone());
    let limiter = RateLimitService::new(pool.clone());

    plans.change_plan(vip.telegram_id, "PREMIUM").await.unwrap();

    for _ in 0..=MAX_REQUESTS {
        limiter.check(vip.telegram_id).await;
        limiter.check(regular.telegram_id).await;
    }

    admit(&pool, &plans, &catalog, &limiter, vip.telegram_id)
        .await
        .expect("priority plan must pass a saturated window");

    let err = admit(&pool, &plans, &catalog, &limiter, regular.telegram_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::RateLimited { .. }));
}

#[tokio::test]
async fn unknown_users_are_turned_away() {
    let pool = memory_pool().await;
    let plans = PlanService::new(pool.clone());
    let catalog = CatalogService::new(pool.clone());
    let limiter = RateLimitService::new(pool.clone());

    let err = admit(&pool, &plans, &catalog, &limiter, 31337)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound("user")));
}

#[tokio::test]
async fn chat_commits_the_reported_token_cost() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 600).await;
    let service = chat(&pool, vec![ScriptedText::ok("hello", Some(42))]);

    let reply = service.generate(user.telegram_id, "hi").await.unwrap();
    assert_eq!(reply.text, "hello");
    assert_eq!(reply.tokens_used, 42);
    assert_eq!(reply.model_name, "Llama 3.1 8B");

    let after = fetch_user(&pool, user.telegram_id).await.unwrap();
    assert_eq!(after.daily_used, 42);
    assert_eq!(after.total_used, 42);

    let (requests, tokens): (i64, i64) =
        sqlx::query_as("SELECT requests, tokens FROM user_stats WHERE user_id = ?")
            .bind(user.telegram_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(requests, 1);
    assert_eq!(tokens, 42);
}

#[tokio::test]
async fn chat_estimates_tokens_when_usage_is_missing() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 601).await;
    let service = chat(&pool, vec![ScriptedText::ok("12345678", None)]);

    let reply = service.generate(user.telegram_id, "1234").await.unwrap();
    // (4 + 8) / 4 characters.
    assert_eq!(reply.tokens_used, 3);
}

#[tokio::test]
async fn failed_chain_spends_nothing() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 602).await;
    let service = chat(&pool, vec![ScriptedText::down(), ScriptedText::down()]);

    let err = service.generate(user.telegram_id, "hi").await.unwrap_err();
    assert!(matches!(err, ServiceError::Provider(_)));

    let after = fetch_user(&pool, user.telegram_id).await.unwrap();
    assert_eq!(after.daily_used, 0);
    assert_eq!(after.total_used, 0);

    let stats: Option<i64> = sqlx::query_scalar("SELECT id FROM user_stats WHERE user_id = ?")
        .bind(user.telegram_id)
        .fetch_optional(&pool)
        .await
        .unwrap();
    assert!(stats.is_none());
}

#[tokio::test]
async fn fallback_provider_picks_up_after_a_failure() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 603).await;
    let service = chat(
        &pool,
        vec![ScriptedText::down(), ScriptedText::ok("backup", Some(5))],
    );

    let reply = service.generate(user.telegram_id, "hi").await.unwrap();
    assert_eq!(reply.text, "backup");
}

#[tokio::test]
async fn chat_denies_once_token_budgets_are_gone() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 604).await;
    let users = UserService::new(pool.clone());
    let service = chat(&pool, vec![ScriptedText::ok("hello", Some(1))]);

    users.record_token_usage(user.telegram_id, 2000).await.unwrap();
    let err = service.generate(user.telegram_id, "hi").await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Exhausted {
            resource: "chat tokens",
            resets: "daily",
            ..
        }
    ));

    // Daily headroom but a spent lifetime budget also denies.
    sqlx::query("UPDATE users SET daily_used = 0, total_used = total_tokens WHERE telegram_id = ?")
        .bind(user.telegram_id)
        .execute(&pool)
        .await
        .unwrap();
    let err = service.generate(user.telegram_id, "hi").await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Exhausted {
            resource: "chat tokens",
            resets: "total",
            ..
        }
    ));
}

#[tokio::test]
async fn premium_models_spend_the_trickle() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 605).await;
    let users = UserService::new(pool.clone());
    let service = chat(&pool, vec![ScriptedText::ok("hello", Some(10))]);

    users
        .set_selected_model(user.telegram_id, "openai/gpt-4o")
        .await
        .unwrap();

    service.generate(user.telegram_id, "hi").await.unwrap();

    let count: i64 = sqlx::query_scalar(
        "SELECT usage_count FROM pro_model_usage WHERE user_id = ? AND model_id = 'openai/gpt-4o'",
    )
    .bind(user.telegram_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 1);

    let err = service.generate(user.telegram_id, "hi").await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Exhausted {
            resource: "premium model calls",
            limit: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn a_vanished_selected_model_falls_back_to_default() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 606).await;
    let users = UserService::new(pool.clone());
    let service = chat(&pool, vec![ScriptedText::ok("hello", Some(1))]);

    users
        .set_selected_model(user.telegram_id, "openai/gpt-4o-mini")
        .await
        .unwrap();
    sqlx::query("UPDATE models SET is_active = 0 WHERE id = 'openai/gpt-4o-mini'")
        .execute(&pool)
        .await
        .unwrap();

    let reply = service.generate(user.telegram_id, "hi").await.unwrap();
    assert_eq!(reply.model_name, "Llama 3.1 8B");
}

#[tokio::test]
async fn image_flow_spends_the_monthly_counter() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 700).await;
    let service = images(&pool, vec![Arc::new(ScriptedImage { fail: false })]);

    for _ in 0..3 {
        let bytes = service.generate(user.telegram_id, "a cat").await.unwrap();
        assert!(!bytes.is_empty());
    }

    let err = service
        .generate(user.telegram_id, "one more")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Exhausted {
            resource: "image generation",
            limit: 3,
            ..
        }
    ));
}

#[tokio::test]
async fn image_failure_spends_nothing() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 701).await;
    let service = images(&pool, vec![Arc::new(ScriptedImage { fail: true })]);

    let err = service.generate(user.telegram_id, "a cat").await.unwrap_err();
    assert!(matches!(err, ServiceError::Provider(_)));

    let row: Option<i64> = sqlx::query_scalar("SELECT usage_count FROM image_usage WHERE user_id = ?")
        .bind(user.telegram_id)
        .fetch_optional(&pool)
        .await
        .unwrap();
    assert!(row.is_none());
}

#[tokio::test]
async fn voice_synthesis_respects_the_monthly_credit() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 702).await;
    let service = voice(&pool, vec![Arc::new(ScriptedTts)], vec![]);

    let audio = service.synthesize(user.telegram_id, "hello").await.unwrap();
    assert_eq!(audio, vec![1, 2, 3]);

    let err = service.synthesize(user.telegram_id, "again").await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Exhausted {
            resource: "voice synthesis",
            ..
        }
    ));
}

#[tokio::test]
async fn overlong_tts_input_is_rejected_up_front() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 703).await;
    let service = voice(&pool, vec![Arc::new(ScriptedTts)], vec![]);

    let long = "x".repeat(501);
    let err = service.synthesize(user.telegram_id, &long).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let row: Option<i64> = sqlx::query_scalar("SELECT usage_count FROM tts_usage WHERE user_id = ?")
        .bind(user.telegram_id)
        .fetch_optional(&pool)
        .await
        .unwrap();
    assert!(row.is_none());
}

#[tokio::test]
async fn an_empty_chain_leaves_the_credit_unspent() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 704).await;
    let quota = QuotaService::new(pool.clone());
    let free = plan(&pool, "FREE").await;
    let service = voice(&pool, vec![], vec![]);

    let err = service.synthesize(user.telegram_id, "hello").await.unwrap_err();
    assert!(matches!(err, ServiceError::Provider(_)));

    let check = quota
        .check_monthly(user.telegram_id, MeteredResource::Tts, &free)
        .await
        .unwrap();
    assert_eq!(check.remaining, free.tts_limit);
}

#[tokio::test]
async fn transcription_spends_its_own_counter() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 705).await;
    let service = voice(&pool, vec![], vec![Arc::new(ScriptedStt)]);

    let text = service
        .transcribe(user.telegram_id, vec![0u8; 4])
        .await
        .unwrap();
    assert_eq!(text, "4 bytes");

    let stt_count: i64 = sqlx::query_scalar("SELECT usage_count FROM stt_usage WHERE user_id = ?")
        .bind(user.telegram_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(stt_count, 1);

    // TTS and STT counters are independent.
    let tts_row: Option<i64> = sqlx::query_scalar("SELECT usage_count FROM tts_usage WHERE user_id = ?")
        .bind(user.telegram_id)
        .fetch_optional(&pool)
        .await
        .unwrap();
    assert!(tts_row.is_none());

    let err = service
        .transcribe(user.telegram_id, vec![0u8; 4])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Exhausted {
            resource: "voice transcription",
            ..
        }
    ));
}

#[tokio::test]
async fn stats_accumulate_on_one_daily_row() {
    let pool = memory_pool().await;
    let user = seed_user(&pool, 800).await;
    let stats = StatsService::new(
        pool.clone(),
        Arc::new(CatalogService::new(pool.clone())),
        Arc::new(QuotaService::new(pool.clone())),
    );

    let empty = stats.overview(user.telegram_id).await.unwrap();
    assert_eq!(empty.today.requests, 0);
    assert_eq!(empty.today.tokens, 0);

    stats.record(user.telegram_id, 40).await.unwrap();
    stats.record(user.telegram_id, 60).await.unwrap();

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_stats WHERE user_id = ?")
        .bind(user.telegram_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let overview = stats.overview(user.telegram_id).await.unwrap();
    assert_eq!(overview.today.requests, 2);
    assert_eq!(overview.today.tokens, 100);
    assert_eq!(overview.plan.name, "FREE");
    assert_eq!(overview.tts.limit, 1);
    assert!(overview.image.allowed);
}
