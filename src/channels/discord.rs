// ABOUTME: Posts alert text to the configured Discord channels through the bot REST API
// ABOUTME: Chunking happens in the core sink; each call here sends one message per channel

use anyhow::{Context, Result};
use async_trait::async_trait;
use jarvis_core::config::DiscordConfig;
use jarvis_core::notify::ChatPoster;
use serde::Serialize;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

#[derive(Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
}

#[derive(Clone)]
pub struct DiscordPoster {
    api_base: String,
    bot_token: String,
    channel_ids: Vec<u64>,
    client: reqwest::Client,
}

impl std::fmt::Debug for DiscordPoster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordPoster")
            .field("api_base", &self.api_base)
            .field("bot_token", &"[REDACTED]")
            .field("channel_ids", &self.channel_ids)
            .finish()
    }
}

impl DiscordPoster {
    pub fn new(config: &DiscordConfig) -> Self {
        Self {
            api_base: DISCORD_API_BASE.to_string(),
            bot_token: config.bot_token.clone(),
            channel_ids: config.channel_ids.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// Point at a different API root (used by tests)
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn channel_ids(&self) -> &[u64] {
        &self.channel_ids
    }

    async fn post_to_channel(&self, channel_id: u64, text: &str) -> Result<()> {
        let url = format!("{}/channels/{}/messages", self.api_base, channel_id);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&CreateMessage { content: text })
            .send()
            .await
            .with_context(|| format!("Failed to reach Discord for channel {}", channel_id))?;

        if !response.status().is_success() {
            anyhow::bail!("Discord rejected message for channel {}: {}", channel_id, response.status());
        }
        Ok(())
    }
}

#[async_trait]
impl ChatPoster for DiscordPoster {
    async fn post(&self, text: &str) -> Result<()> {
        if self.channel_ids.is_empty() {
            anyhow::bail!("No Discord channel ids configured for alerts");
        }
        let mut failed = Vec::new();
        for &channel_id in &self.channel_ids {
            if let Err(e) = self.post_to_channel(channel_id, text).await {
                tracing::warn!(channel_id, error = %e, "Discord post failed");
                failed.push(channel_id.to_string());
            }
        }
        if !failed.is_empty() {
            anyhow::bail!("Discord post failed for channels {}", failed.join(", "));
        }
        Ok(())
    }
}
