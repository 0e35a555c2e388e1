use chrono::{DateTime, Duration, Utc};
use quotabot_db::models::{Plan, Promocode};
use rand::Rng;
use sqlx::SqlitePool;
use tracing::info;

use super::error::{ServiceError, ServiceResult};
use super::fetch_user;
use super::plan_service::DEFAULT_PRO_DAYS;
use super::quota_service::month_key;

#[derive(Debug, Clone)]
pub enum Benefit {
    Tokens { daily: i64, total: i64 },
    TtsCredit { amount: i64 },
    SttCredit { amount: i64 },
    Pro { days: i64, expires_at: DateTime<Utc> },
    PlanChange { plan: Plan, expires_at: Option<DateTime<Utc>> },
}

#[derive(Debug, Clone)]
pub struct Redeemed {
    pub code: String,
    pub description: Option<String>,
    pub benefit: Benefit,
}

#[derive(Debug, Clone, Default)]
pub struct NewPromocode {
    /// None generates a random 8-character code.
    pub code: Option<String>,
    pub promo_type: String,
    pub description: Option<String>,
    pub daily_tokens: i64,
    pub total_tokens: i64,
    pub tts_limit: i64,
    pub stt_limit: i64,
    pub pro_days: i64,
    pub plan_name: Option<String>,
    pub max_usage: i64,
    pub created_by: Option<i64>,
}

/// Promocode issue and redemption. Redemption applies the benefit, writes
/// the per-user usage row and bumps the global counter inside one
/// transaction, so a crash can neither allow re-redemption nor lose the
/// benefit.
#[derive(Debug, Clone)]
pub struct PromoService {
    pool: SqlitePool,
}

impl PromoService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn redeem(&self, code: &str, telegram_id: i64) -> ServiceResult<Redeemed> {
        let code = code.trim().to_uppercase();

        let promo = sqlx::query_as::<_, Promocode>(
            "SELECT * FROM promocodes WHERE code = ? AND is_active = 1",
        )
        .bind(&code)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServiceError::NotFound("promocode"))?;

        if promo.is_exhausted() {
            return Err(ServiceError::Exhausted {
                resource: "promocode",
                limit: promo.max_usage,
                remaining: 0,
                resets: "never",
            });
        }

        let used: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM promocode_usage WHERE promocode_id = ? AND user_id = ?)",
        )
        .bind(promo.id)
        .bind(telegram_id)
        .fetch_one(&self.pool)
        .await?;

        if used {
            return Err(ServiceError::AlreadyUsed);
        }

        let user = fetch_user(&self.pool, telegram_id).await?;

        // Resolve everything fallible before opening the transaction.
        let benefit = self.resolve_benefit(&promo).await?;
        let pro_plan = match &benefit {
            Benefit::Pro { .. } => Some(self.plan_row("PRO").await?),
            _ => None,
        };

        let mut tx = self.pool.begin().await?;

        match &benefit {
            Benefit::Tokens { daily, total } => {
                sqlx::query(
                    "UPDATE users SET daily_tokens = daily_tokens + ?, total_tokens = total_tokens + ?
                     WHERE telegram_id = ?",
                )
                .bind(daily)
                .bind(total)
                .bind(user.telegram_id)
                .execute(&mut *tx)
                .await?;
            }
            Benefit::TtsCredit { amount } => {
                Self::apply_usage_credit(&mut tx, "tts_usage", user.telegram_id, *amount).await?;
            }
            Benefit::SttCredit { amount } => {
                Self::apply_usage_credit(&mut tx, "stt_usage", user.telegram_id, *amount).await?;
            }
            Benefit::Pro { expires_at, .. } => {
                let plan = pro_plan
                    .as_ref()
                    .ok_or(ServiceError::NotFound("plan"))?;
                sqlx::query(
                    "UPDATE users SET is_pro = 1, pro_expires_at = ?, plan_type = 'PRO',
                        daily_tokens = ?, total_tokens = ?, daily_used = 0
                     WHERE telegram_id = ?",
                )
                .bind(expires_at)
                .bind(plan.daily_tokens)
                .bind(plan.total_tokens)
                .bind(user.telegram_id)
                .execute(&mut *tx)
                .await?;
            }
            Benefit::PlanChange { plan, expires_at } => {
                sqlx::query(
                    "UPDATE users SET plan_type = ?, is_pro = ?, pro_expires_at = ?,
                        daily_tokens = ?, total_tokens = ?
                     WHERE telegram_id = ?",
                )
                .bind(&plan.name)
                .bind(!plan.is_free())
                .bind(expires_at)
                .bind(plan.daily_tokens)
                .bind(plan.total_tokens)
                .bind(user.telegram_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query("INSERT INTO promocode_usage (promocode_id, user_id) VALUES (?, ?)")
            .bind(promo.id)
            .bind(user.telegram_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE promocodes SET current_usage = current_usage + 1 WHERE id = ?")
            .bind(promo.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(user = telegram_id, code = %code, kind = %promo.promo_type, "Promocode redeemed");

        Ok(Redeemed {
            code,
            description: promo.description.clone(),
            benefit,
        })
    }

    /// Negative consumption: the stored count may go below zero, which
    /// the read side surfaces as extra remaining uses.
    async fn apply_usage_credit(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        table: &str,
        user_id: i64,
        amount: i64,
    ) -> ServiceResult<()> {
        let bucket = month_key(Utc::now());

        sqlx::query(&format!(
            "INSERT INTO {} (user_id, month_year, usage_count) VALUES (?, ?, ?)
             ON CONFLICT(user_id, month_year) DO UPDATE SET usage_count = usage_count - ?",
            table
        ))
        .bind(user_id)
        .bind(&bucket)
        .bind(-amount)
        .bind(amount)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn resolve_benefit(&self, promo: &Promocode) -> ServiceResult<Benefit> {
        match promo.promo_type.as_str() {
            "TOKENS" => Ok(Benefit::Tokens {
                daily: promo.daily_tokens,
                total: promo.total_tokens,
            }),
            "TTS" => Ok(Benefit::TtsCredit {
                amount: promo.tts_limit,
            }),
            "STT" => Ok(Benefit::SttCredit {
                amount: promo.stt_limit,
            }),
            "PRO" => {
                let days = if promo.pro_days > 0 {
                    promo.pro_days
                } else {
                    DEFAULT_PRO_DAYS
                };
                Ok(Benefit::Pro {
                    days,
                    expires_at: Utc::now() + Duration::days(days),
                })
            }
            "PREMIUM" => {
                let name = promo.plan_name.as_deref().ok_or_else(|| {
                    ServiceError::InvalidInput("Promocode has no target plan".into())
                })?;
                let plan = self.plan_row(name).await?;
                let expires_at = if plan.is_free() {
                    None
                } else {
                    Some(Utc::now() + Duration::days(DEFAULT_PRO_DAYS))
                };
                Ok(Benefit::PlanChange { plan, expires_at })
            }
            other => Err(ServiceError::InvalidInput(format!(
                "Unknown promocode type: {}",
                other
            ))),
        }
    }

    pub async fn create(&self, req: NewPromocode) -> ServiceResult<Promocode> {
        let promo_type = req.promo_type.trim().to_uppercase();

        match promo_type.as_str() {
            "TOKENS" if req.daily_tokens <= 0 && req.total_tokens <= 0 => {
                return Err(ServiceError::InvalidInput(
                    "A TOKENS code needs a daily or total amount".into(),
                ));
            }
            "TTS" if req.tts_limit <= 0 => {
                return Err(ServiceError::InvalidInput(
                    "A TTS code needs a positive credit amount".into(),
                ));
            }
            "STT" if req.stt_limit <= 0 => {
                return Err(ServiceError::InvalidInput(
                    "An STT code needs a positive credit amount".into(),
                ));
            }
            "PRO" if req.pro_days <= 0 => {
                return Err(ServiceError::InvalidInput(
                    "A PRO code needs a positive day count".into(),
                ));
            }
            "PREMIUM" => {
                let name = req.plan_name.as_deref().unwrap_or("");
                if name.is_empty() {
                    return Err(ServiceError::InvalidInput(
                        "A PREMIUM code needs a target plan".into(),
                    ));
                }
                self.plan_row(name).await?;
            }
            "TOKENS" | "TTS" | "STT" | "PRO" => {}
            other => {
                return Err(ServiceError::InvalidInput(format!(
                    "Unknown promocode type: {}",
                    other
                )));
            }
        }

        if req.max_usage < 1 {
            return Err(ServiceError::InvalidInput(
                "max_usage must be at least 1".into(),
            ));
        }

        let code = match req.code {
            Some(code) => {
                let code = code.trim().to_uppercase();
                if code.is_empty() {
                    return Err(ServiceError::InvalidInput("Empty promocode".into()));
                }
                code
            }
            None => generate_code(),
        };

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM promocodes WHERE code = ?)")
                .bind(&code)
                .fetch_one(&self.pool)
                .await?;

        if exists {
            return Err(ServiceError::InvalidInput(format!(
                "Code {} already exists",
                code
            )));
        }

        sqlx::query(
            "INSERT INTO promocodes
                (code, type, description, daily_tokens, total_tokens, tts_limit, stt_limit, pro_days, plan_name, max_usage, created_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&code)
        .bind(&promo_type)
        .bind(&req.description)
        .bind(req.daily_tokens)
        .bind(req.total_tokens)
        .bind(req.tts_limit)
        .bind(req.stt_limit)
        .bind(req.pro_days)
        .bind(req.plan_name.as_deref().map(str::to_uppercase))
        .bind(req.max_usage)
        .bind(req.created_by)
        .execute(&self.pool)
        .await?;

        info!(code = %code, kind = %promo_type, "Promocode created");

        sqlx::query_as::<_, Promocode>("SELECT * FROM promocodes WHERE code = ?")
            .bind(&code)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ServiceError::NotFound("promocode"))
    }

    pub async fn delete(&self, code: &str) -> ServiceResult<()> {
        let code = code.trim().to_uppercase();

        let res = sqlx::query("DELETE FROM promocodes WHERE code = ?")
            .bind(&code)
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            return Err(ServiceError::NotFound("promocode"));
        }

        info!(code = %code, "Promocode deleted");
        Ok(())
    }

    pub async fn list(&self) -> ServiceResult<Vec<Promocode>> {
        let codes = sqlx::query_as::<_, Promocode>(
            "SELECT * FROM promocodes ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(codes)
    }

    async fn plan_row(&self, name: &str) -> ServiceResult<Plan> {
        let name = name.trim().to_uppercase();

        sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE name = ? AND is_active = 1")
            .bind(&name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ServiceError::NotFound("plan"))
    }
}

fn generate_code() -> String {
    // No easily confused characters (0/O, 1/I).
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::rng();
    (0..8)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}
