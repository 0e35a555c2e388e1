use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub plan_type: String,
    pub is_pro: bool,
    pub pro_expires_at: Option<DateTime<Utc>>,
    /// Entitlement ceilings. Consumption is gated against these before any
    /// increment, not enforced at write time.
    pub daily_tokens: i64,
    pub total_tokens: i64,
    pub daily_used: i64,
    pub total_used: i64,
    pub selected_model: Option<String>,
    pub referred_by: Option<i64>,
    pub referral_count: i64,
    pub referral_earnings: i64,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn daily_remaining(&self) -> i64 {
        (self.daily_tokens - self.daily_used).max(0)
    }

    pub fn total_remaining(&self) -> i64 {
        (self.total_tokens - self.total_used).max(0)
    }

    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.username) {
            (Some(first), _) => first.clone(),
            (None, Some(username)) => format!("@{}", username),
            _ => self.telegram_id.to_string(),
        }
    }
}
