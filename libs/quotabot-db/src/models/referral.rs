use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Referral edge. `referred_id` is unique: a user can be referred at most
/// once, ever.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Referral {
    pub id: i64,
    pub referrer_id: i64,
    pub referred_id: i64,
    pub reward_given: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReferralLink {
    pub id: i64,
    pub user_id: i64,
    pub referral_code: String,
    pub clicks: i64,
    pub conversions: i64,
    pub created_at: Option<DateTime<Utc>>,
}
