use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use quotabot_db::models::AiModel;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{TextOutput, TextProvider};

const API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Clone)]
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    fallback_model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: i64,
}

impl OpenRouterProvider {
    pub fn new(api_key: String, fallback_model: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_key,
            fallback_model,
        }
    }
}

#[async_trait]
impl TextProvider for OpenRouterProvider {
    fn name(&self) -> &'static str {
        "openrouter"
    }

    async fn generate(&self, prompt: &str, model: &AiModel) -> Result<TextOutput> {
        // Models routed to other providers fall back to our default here,
        // so a chain position after groq still answers for groq-only models.
        let model_id = if model.provider == "openrouter" {
            model.id.as_str()
        } else {
            self.fallback_model.as_str()
        };

        let body = json!({
            "model": model_id,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": model.max_tokens,
        });

        let resp = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(
                "OpenRouter request failed: {}",
                resp.status()
            ));
        }

        let parsed: ChatResponse = resp.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("OpenRouter returned no choices"))?;

        Ok(TextOutput {
            text,
            tokens_used: parsed.usage.map(|u| u.total_tokens),
        })
    }
}
