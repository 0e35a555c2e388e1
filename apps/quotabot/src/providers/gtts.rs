use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;

use super::TtsProvider;

/// Keyless speech synthesis via the Google Translate TTS endpoint.
/// Input is capped upstream, the endpoint rejects long q parameters.
#[derive(Clone)]
pub struct GttsProvider {
    client: Client,
}

impl GttsProvider {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for GttsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtsProvider for GttsProvider {
    fn name(&self) -> &'static str {
        "gtts"
    }

    async fn synthesize(&self, text: &str, lang: &str) -> Result<Vec<u8>> {
        let url = format!(
            "https://translate.google.com/translate_tts?ie=UTF-8&client=tw-ob&tl={}&q={}",
            urlencoding::encode(lang),
            urlencoding::encode(text)
        );

        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow::anyhow!("TTS request failed: {}", resp.status()));
        }

        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(anyhow::anyhow!("TTS returned empty audio"));
        }

        Ok(bytes.to_vec())
    }
}
