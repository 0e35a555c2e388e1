use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::providers::{SttProvider, TtsProvider};

use super::catalog_service::CatalogService;
use super::error::{ServiceError, ServiceResult};
use super::plan_service::PlanService;
use super::quota_service::{MeteredResource, QuotaService};
use super::rate_limit_service::RateLimitService;
use super::user_locks::UserLocks;
use super::{admit, chain_exhausted};

/// The TTS endpoint rejects long inputs, and a monthly credit should not
/// be burnable on a novel-length paste anyway.
const MAX_TTS_CHARS: usize = 500;

/// Guarded voice flows, synthesis and transcription, each spending its own
/// monthly counter.
#[derive(Clone)]
pub struct VoiceService {
    pool: SqlitePool,
    locks: UserLocks,
    catalog: Arc<CatalogService>,
    plans: Arc<PlanService>,
    quota: Arc<QuotaService>,
    rate_limits: Arc<RateLimitService>,
    tts: Vec<Arc<dyn TtsProvider>>,
    stt: Vec<Arc<dyn SttProvider>>,
    tts_lang: String,
}

impl VoiceService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        locks: UserLocks,
        catalog: Arc<CatalogService>,
        plans: Arc<PlanService>,
        quota: Arc<QuotaService>,
        rate_limits: Arc<RateLimitService>,
        tts: Vec<Arc<dyn TtsProvider>>,
        stt: Vec<Arc<dyn SttProvider>>,
        tts_lang: String,
    ) -> Self {
        Self {
            pool,
            locks,
            catalog,
            plans,
            quota,
            rate_limits,
            tts,
            stt,
            tts_lang,
        }
    }

    pub async fn synthesize(&self, telegram_id: i64, text: &str) -> ServiceResult<Vec<u8>> {
        let chars = text.chars().count();
        if chars > MAX_TTS_CHARS {
            return Err(ServiceError::InvalidInput(format!(
                "text is {} characters, voice synthesis takes at most {}",
                chars, MAX_TTS_CHARS
            )));
        }

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
            .check_monthly(telegram_id, MeteredResource::Tts, &plan)
            .await?;
        if !check.allowed {
            return Err(ServiceError::Exhausted {
                resource: MeteredResource::Tts.label(),
                limit: check.limit,
                remaining: check.remaining,
                resets: "monthly",
            });
        }

        let mut last_err: Option<anyhow::Error> = None;
        for provider in &self.tts {
            match provider.synthesize(text, &self.tts_lang).await {
                Ok(audio) => {
                    self.quota
                        .commit_monthly(telegram_id, MeteredResource::Tts)
                        .await?;
                    info!(user = telegram_id, provider = provider.name(), "Speech synthesized");
                    return Ok(audio);
                }
                Err(err) => {
                    warn!(provider = provider.name(), error = %err, "TTS provider failed");
                    last_err = Some(err);
                }
            }
        }

        Err(chain_exhausted(last_err, "no TTS providers configured"))
    }

    pub async fn transcribe(&self, telegram_id: i64, audio: Vec<u8>) -> ServiceResult<String> {
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
            .check_monthly(telegram_id, MeteredResource::Stt, &plan)
            .await?;
        if !check.allowed {
            return Err(ServiceError::Exhausted {
                resource: MeteredResource::Stt.label(),
                limit: check.limit,
                remaining: check.remaining,
                resets: "monthly",
            });
        }

        let mut last_err: Option<anyhow::Error> = None;
        for provider in &self.stt {
            match provider.transcribe(audio.clone()).await {
                Ok(text) => {
                    self.quota
                        .commit_monthly(telegram_id, MeteredResource::Stt)
                        .await?;
                    info!(user = telegram_id, provider = provider.name(), "Voice transcribed");
                    return Ok(text);
                }
                Err(err) => {
                    warn!(provider = provider.name(), error = %err, "STT provider failed");
                    last_err = Some(err);
                }
            }
        }

        Err(chain_exhausted(last_err, "no STT providers configured"))
    }
}
