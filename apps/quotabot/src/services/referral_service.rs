use chrono::Utc;
use quotabot_db::models::{ReferralLink, User};
use sqlx::SqlitePool;
use tracing::info;

use super::error::{ServiceError, ServiceResult};
use super::fetch_user;

const REFERRER_DAILY: i64 = 5000;
const REFERRER_TOTAL: i64 = 15000;
const REFERRED_DAILY: i64 = 3000;
const REFERRED_TOTAL: i64 = 10000;

#[derive(Debug, Clone)]
pub struct ReferralStats {
    pub link: ReferralLink,
    pub referral_count: i64,
    pub earnings: i64,
}

/// Referral links and the transactional completion protocol. A user can
/// be referred at most once, ever; both parties are credited atomically.
#[derive(Debug, Clone)]
pub struct ReferralService {
    pool: SqlitePool,
}

impl ReferralService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotent per user: returns the existing link when there is one.
    pub async fn create_link(&self, telegram_id: i64) -> ServiceResult<ReferralLink> {
        if let Some(link) = self.link_for(telegram_id).await? {
            return Ok(link);
        }

        fetch_user(&self.pool, telegram_id).await?;

        let code = format!(
            "ref_{:x}_{}",
            telegram_id,
            to_base36(Utc::now().timestamp_millis())
        );

        sqlx::query(
            "INSERT INTO referral_links (user_id, referral_code) VALUES (?, ?)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(telegram_id)
        .bind(&code)
        .execute(&self.pool)
        .await?;

        self.link_for(telegram_id)
            .await?
            .ok_or(ServiceError::NotFound("referral link"))
    }

    /// Resolves a start-payload code to its owner and counts the click.
    /// Clicks are counted whether or not the visit converts; an unknown
    /// code is no referrer, not an error.
    pub async fn resolve(&self, code: &str) -> ServiceResult<Option<i64>> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT id, user_id FROM referral_links WHERE referral_code = ?")
                .bind(code.trim())
                .fetch_optional(&self.pool)
                .await?;

        let Some((link_id, owner)) = row else {
            return Ok(None);
        };

        sqlx::query("UPDATE referral_links SET clicks = clicks + 1 WHERE id = ?")
            .bind(link_id)
            .execute(&self.pool)
            .await?;

        Ok(Some(owner))
    }

    pub async fn process_referral(&self, referrer_id: i64, referred_id: i64) -> ServiceResult<()> {
        if referrer_id == referred_id {
            return Err(ServiceError::SelfReferral);
        }

        let referrer_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE telegram_id = ?)")
                .bind(referrer_id)
                .fetch_one(&self.pool)
                .await?;
        if !referrer_exists {
            return Err(ServiceError::NotFound("referrer"));
        }

        fetch_user(&self.pool, referred_id).await?;

        let already: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM referrals WHERE referred_id = ?)")
                .bind(referred_id)
                .fetch_one(&self.pool)
                .await?;
        if already {
            return Err(ServiceError::AlreadyUsed);
        }

        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            "INSERT INTO referrals (referrer_id, referred_id, reward_given) VALUES (?, ?, 1)",
        )
        .bind(referrer_id)
        .bind(referred_id)
        .execute(&mut *tx)
        .await?;
        let referral_id = res.last_insert_rowid();

        sqlx::query(
            "UPDATE users SET daily_tokens = daily_tokens + ?, total_tokens = total_tokens + ?,
                referral_count = referral_count + 1, referral_earnings = referral_earnings + ?
             WHERE telegram_id = ?",
        )
        .bind(REFERRER_DAILY)
        .bind(REFERRER_TOTAL)
        .bind(REFERRER_TOTAL)
        .bind(referrer_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE users SET daily_tokens = daily_tokens + ?, total_tokens = total_tokens + ?,
                referred_by = ?
             WHERE telegram_id = ?",
        )
        .bind(REFERRED_DAILY)
        .bind(REFERRED_TOTAL)
        .bind(referrer_id)
        .bind(referred_id)
        .execute(&mut *tx)
        .await?;

        // Reward ledger, one row per party.
        sqlx::query(
            "INSERT INTO referral_rewards (user_id, referral_id, daily_tokens, total_tokens)
             VALUES (?, ?, ?, ?)",
        )
        .bind(referrer_id)
        .bind(referral_id)
        .bind(REFERRER_DAILY)
        .bind(REFERRER_TOTAL)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO referral_rewards (user_id, referral_id, daily_tokens, total_tokens)
             VALUES (?, ?, ?, ?)",
        )
        .bind(referred_id)
        .bind(referral_id)
        .bind(REFERRED_DAILY)
        .bind(REFERRED_TOTAL)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE referral_links SET conversions = conversions + 1 WHERE user_id = ?")
            .bind(referrer_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(referrer = referrer_id, referred = referred_id, "Referral completed");
        Ok(())
    }

    /// Creates the link on first ask, like the original stats view did.
    pub async fn stats(&self, telegram_id: i64) -> ServiceResult<ReferralStats> {
        let link = self.create_link(telegram_id).await?;
        let user = fetch_user(&self.pool, telegram_id).await?;

        Ok(ReferralStats {
            link,
            referral_count: user.referral_count,
            earnings: user.referral_earnings,
        })
    }

    pub async fn leaderboard(&self, limit: i64) -> ServiceResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE referral_count > 0
             ORDER BY referral_count DESC, referral_earnings DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn link_for(&self, telegram_id: i64) -> ServiceResult<Option<ReferralLink>> {
        let link =
            sqlx::query_as::<_, ReferralLink>("SELECT * FROM referral_links WHERE user_id = ?")
                .bind(telegram_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(link)
    }
}

fn to_base36(mut n: i64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n <= 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
