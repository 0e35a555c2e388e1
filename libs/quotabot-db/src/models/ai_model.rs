use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AiModel {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub category: String,
    pub max_tokens: i64,
    /// 'FREE' or 'PRO'. PRO models are gated by the premium-model usage
    /// counter on top of the regular token quota.
    pub model_type: String,
    pub monthly_limit: i64,
    pub is_active: bool,
}

impl AiModel {
    pub fn is_premium(&self) -> bool {
        self.model_type == "PRO"
    }
}
