pub mod groq;
pub mod gtts;
pub mod huggingface;
pub mod openrouter;
pub mod pollinations;

use anyhow::Result;
use async_trait::async_trait;
use quotabot_db::models::AiModel;

/// One completed text generation. `tokens_used` is the provider-reported
/// total when the API returns usage data, `None` when it has to be estimated.
#[derive(Debug, Clone)]
pub struct TextOutput {
    pub text: String,
    pub tokens_used: Option<i64>,
}

#[async_trait]
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, prompt: &str, model: &AiModel) -> Result<TextOutput>;
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, prompt: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait TtsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait SttProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transcribe(&self, audio: Vec<u8>) -> Result<String>;
}
