// ABOUTME: Synology Chat incoming-webhook client used for proactive alerts
// ABOUTME: Sends a form field `payload` holding a JSON object with the message text

use anyhow::{Context, Result};
use async_trait::async_trait;
use jarvis_core::config::SynologyConfig;
use jarvis_core::notify::WebhookPoster;

#[derive(Clone)]
pub struct SynologyWebhook {
    webhook_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for SynologyWebhook {
    // The webhook URL embeds the access token
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynologyWebhook")
            .field("webhook_url", &"[REDACTED]")
            .finish()
    }
}

/// Form body value: `{"text": "..."}` with proper JSON escaping
pub fn webhook_payload(text: &str) -> String {
    serde_json::json!({ "text": text }).to_string()
}

impl SynologyWebhook {
    pub fn new(config: &SynologyConfig) -> Self {
        Self::from_url(&config.webhook_url)
    }

    pub fn from_url(webhook_url: &str) -> Self {
        Self {
            webhook_url: webhook_url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WebhookPoster for SynologyWebhook {
    async fn post_text(&self, text: &str) -> Result<()> {
        let payload = webhook_payload(text);
        let response = self
            .client
            .post(&self.webhook_url)
            .form(&[("payload", payload.as_str())])
            .send()
            .await
            .context("Failed to reach Synology Chat webhook")?;

        if !response.status().is_success() {
            anyhow::bail!("Synology Chat webhook returned {}", response.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_escapes_quotes_and_newlines() {
        let payload = webhook_payload("Monitoring - git\n\nrepo \"infra\" is dirty");
        assert_eq!(
            payload,
            r#"{"text":"Monitoring - git\n\nrepo \"infra\" is dirty"}"#
        );
    }

    #[test]
    fn test_debug_hides_token() {
        let hook = SynologyWebhook::from_url("https://nas.local/webapi/entry.cgi?token=%22secret%22");
        assert!(!format!("{:?}", hook).contains("secret"));
    }
}
