use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{ImageProvider, SttProvider};

const SDXL_URL: &str =
    "https://api-inference.huggingface.co/models/stabilityai/stable-diffusion-xl-base-1.0";
const WHISPER_URL: &str = "https://api-inference.huggingface.co/models/openai/whisper-large-v3";

/// Stable Diffusion XL through the HF inference API. Second link in the
/// image chain, only wired when an API key is configured.
#[derive(Clone)]
pub struct HfImageProvider {
    client: Client,
    api_key: String,
}

impl HfImageProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_key,
        }
    }
}

#[async_trait]
impl ImageProvider for HfImageProvider {
    fn name(&self) -> &'static str {
        "huggingface"
    }

    async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .post(SDXL_URL)
            .bearer_auth(&self.api_key)
            .json(&json!({ "inputs": prompt }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(
                "HF image request failed: {}",
                resp.status()
            ));
        }

        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(anyhow::anyhow!("HF returned an empty image"));
        }

        Ok(bytes.to_vec())
    }
}

#[derive(Clone)]
pub struct HfWhisperProvider {
    client: Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
}

impl HfWhisperProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_key,
        }
    }
}

#[async_trait]
impl SttProvider for HfWhisperProvider {
    fn name(&self) -> &'static str {
        "whisper"
    }

    async fn transcribe(&self, audio: Vec<u8>) -> Result<String> {
        let resp = self
            .client
            .post(WHISPER_URL)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "audio/ogg")
            .body(audio)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(
                "HF whisper request failed: {}",
                resp.status()
            ));
        }

        let parsed: WhisperResponse = resp.json().await?;
        let text = parsed.text.trim().to_string();
        if text.is_empty() {
            return Err(anyhow::anyhow!("Whisper returned an empty transcript"));
        }

        Ok(text)
    }
}
