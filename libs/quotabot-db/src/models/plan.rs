use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row of the plan catalog. Seeded at startup, admin-editable at
/// runtime; the entitlement engine resolves all TTS/STT/image limits from
/// here rather than from constants.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub daily_tokens: i64,
    pub total_tokens: i64,
    pub image_limit: i64,
    pub tts_limit: i64,
    pub stt_limit: i64,
    pub pro_model_access: bool,
    pub priority_processing: bool,
    pub price_monthly: i64,
    pub is_active: bool,
}

impl Plan {
    pub fn is_free(&self) -> bool {
        self.name == "FREE"
    }
}
