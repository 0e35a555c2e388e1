use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;

use super::ImageProvider;

/// Keyless image generation via pollinations.ai. Used as the first link in
/// the image provider chain so the bot works without any paid API key.
#[derive(Clone)]
pub struct PollinationsProvider {
    client: Client,
}

impl PollinationsProvider {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(90))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for PollinationsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageProvider for PollinationsProvider {
    fn name(&self) -> &'static str {
        "pollinations"
    }

    async fn generate(&self, prompt: &str) -> Result<Vec<u8>> {
        let url = format!(
            "https://image.pollinations.ai/prompt/{}?width=1024&height=1024&nologo=true",
            urlencoding::encode(prompt)
        );

        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow::anyhow!(
                "Pollinations request failed: {}",
                resp.status()
            ));
        }

        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(anyhow::anyhow!("Pollinations returned an empty image"));
        }

        Ok(bytes.to_vec())
    }
}
