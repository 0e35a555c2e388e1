use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Promocode {
    pub id: i64,
    pub code: String,
    #[sqlx(rename = "type")]
    pub promo_type: String, // TOKENS | TTS | STT | PRO | PREMIUM
    pub description: Option<String>,
    pub daily_tokens: i64,
    pub total_tokens: i64,
    pub tts_limit: i64,
    pub stt_limit: i64,
    pub pro_days: i64,
    pub plan_name: Option<String>,
    pub max_usage: i64,
    pub current_usage: i64,
    pub is_active: bool,
    pub created_by: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Promocode {
    pub fn is_exhausted(&self) -> bool {
        self.current_usage >= self.max_usage
    }
}
