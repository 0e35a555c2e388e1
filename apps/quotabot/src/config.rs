use std::env;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub database_url: String,
    pub admin_ids: Vec<i64>,
    pub openrouter_api_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub hf_api_key: Option<String>,
    pub default_model: String,
    pub tts_lang: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bot_token: env::var("BOT_TOKEN").context("BOT_TOKEN is not set")?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:quotabot.db".to_string()),
            admin_ids: env::var("ADMIN_IDS")
                .map(|raw| {
                    raw.split(',')
                        .filter_map(|part| part.trim().parse::<i64>().ok())
                        .collect()
                })
                .unwrap_or_default(),
            openrouter_api_key: optional_var("OPENROUTER_API_KEY"),
            groq_api_key: optional_var("GROQ_API_KEY"),
            hf_api_key: optional_var("HF_API_KEY"),
            default_model: env::var("DEFAULT_MODEL")
                .unwrap_or_else(|_| "meta-llama/llama-3.1-8b-instruct".to_string()),
            tts_lang: env::var("TTS_LANG").unwrap_or_else(|_| "en".to_string()),
        })
    }

    pub fn is_admin(&self, telegram_id: i64) -> bool {
        self.admin_ids.contains(&telegram_id)
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
