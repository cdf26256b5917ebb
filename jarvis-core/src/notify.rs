// ABOUTME: Alert fan-out to every configured channel sink with per-sink failure isolation.
// ABOUTME: Sinks wrap transport seams (chat poster, live hub, webhook) implemented by the binary.

use crate::metrics;
use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Discord rejects messages over 2000 characters; leave headroom
pub const CHAT_CHUNK_SIZE: usize = 1900;

/// A destination alerts can be delivered to
#[async_trait]
pub trait ChannelSink: Send + Sync {
    /// Short identifier used in logs and metrics
    fn name(&self) -> &str;

    async fn deliver(&self, message: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Ok,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResult {
    pub sink_name: String,
    pub outcome: DeliveryOutcome,
}

impl NotificationResult {
    pub fn is_ok(&self) -> bool {
        self.outcome == DeliveryOutcome::Ok
    }
}

impl fmt::Display for NotificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            DeliveryOutcome::Ok => write!(f, "{}:ok", self.sink_name),
            DeliveryOutcome::Error(_) => write!(f, "{}:error", self.sink_name),
        }
    }
}

/// Broadcasts a message to every registered sink
#[derive(Default, Clone)]
pub struct NotificationFanout {
    sinks: Vec<Arc<dyn ChannelSink>>,
}

impl fmt::Debug for NotificationFanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationFanout")
            .field("sinks", &self.sink_names())
            .finish()
    }
}

impl NotificationFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn ChannelSink>) -> Self {
        self.register(sink);
        self
    }

    pub fn register(&mut self, sink: Arc<dyn ChannelSink>) {
        tracing::debug!(sink = %sink.name(), "Notification sink registered");
        self.sinks.push(sink);
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver to all sinks concurrently. A failing or panicking sink is
    /// logged and reported in the results; it never stops delivery to the others.
    pub async fn notify_all(&self, message: &str) -> Vec<NotificationResult> {
        if self.sinks.is_empty() {
            tracing::warn!("No notification sinks configured, alert dropped");
            return Vec::new();
        }

        let deliveries = self.sinks.iter().map(|sink| async move {
            let outcome = match AssertUnwindSafe(sink.deliver(message)).catch_unwind().await {
                Ok(Ok(())) => DeliveryOutcome::Ok,
                Ok(Err(e)) => {
                    tracing::error!(sink = %sink.name(), error = %e, "Notification delivery failed");
                    DeliveryOutcome::Error(format!("{:#}", e))
                }
                Err(_) => {
                    tracing::error!(sink = %sink.name(), "Notification sink panicked");
                    DeliveryOutcome::Error("sink panicked".to_string())
                }
            };
            metrics::record_notification(sink.name(), outcome == DeliveryOutcome::Ok);
            NotificationResult {
                sink_name: sink.name().to_string(),
                outcome,
            }
        });
        let results = futures_util::future::join_all(deliveries).await;

        let summary = results
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(results = %summary, "Notifications sent");
        results
    }
}

/// Split into consecutive chunks of at most `size` characters. No attempt is
/// made to break on words or lines.
pub fn chunk_fixed(text: &str, size: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if size == 0 {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

/// Remove bold markers everywhere and the leading bell emoji, for plain-text webhooks
pub fn strip_formatting(message: &str) -> String {
    let plain = message.replace("**", "");
    match plain.strip_prefix("🔔 ") {
        Some(rest) => rest.to_string(),
        None => plain,
    }
}

// =============================================================================
// Chat bot
// =============================================================================

/// Posts one already-sized message to the chat bot's alert channels
#[async_trait]
pub trait ChatPoster: Send + Sync {
    async fn post(&self, text: &str) -> Result<()>;
}

/// Chat bot sink. Long alerts go out as ordered fixed-size chunks.
pub struct ChatBotSink<P> {
    poster: P,
    chunk_size: usize,
}

impl<P: ChatPoster> ChatBotSink<P> {
    pub fn new(poster: P) -> Self {
        Self {
            poster,
            chunk_size: CHAT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

#[async_trait]
impl<P: ChatPoster> ChannelSink for ChatBotSink<P> {
    fn name(&self) -> &str {
        "discord"
    }

    async fn deliver(&self, message: &str) -> Result<()> {
        let chunks = chunk_fixed(message, self.chunk_size);
        let total = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            // A gap in the middle would garble the alert, so stop at the first failure
            self.poster.post(chunk).await.map_err(|e| {
                e.context(format!("chunk {} of {} not delivered", i + 1, total))
            })?;
        }
        Ok(())
    }
}

// =============================================================================
// Live connections
// =============================================================================

/// Registry of live client connections, grouped by session id
#[async_trait]
pub trait LiveHub: Send + Sync {
    /// Session groupings that currently have at least one connection
    fn groups(&self) -> Vec<String>;

    async fn broadcast(&self, group: &str, message: &str) -> Result<()>;
}

pub struct LiveConnectionSink<H> {
    hub: H,
}

impl<H: LiveHub> LiveConnectionSink<H> {
    pub fn new(hub: H) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl<H: LiveHub> ChannelSink for LiveConnectionSink<H> {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn deliver(&self, message: &str) -> Result<()> {
        let mut failed = Vec::new();
        for group in self.hub.groups() {
            if let Err(e) = self.hub.broadcast(&group, message).await {
                tracing::warn!(group = %group, error = %e, "Live broadcast failed");
                failed.push(group);
            }
        }
        if !failed.is_empty() {
            anyhow::bail!("broadcast failed for {}", failed.join(", "));
        }
        Ok(())
    }
}

// =============================================================================
// Webhook
// =============================================================================

/// Posts plain text to an incoming-webhook endpoint
#[async_trait]
pub trait WebhookPoster: Send + Sync {
    async fn post_text(&self, text: &str) -> Result<()>;
}

pub struct WebhookSink<W> {
    poster: W,
}

impl<W: WebhookPoster> WebhookSink<W> {
    pub fn new(poster: W) -> Self {
        Self { poster }
    }
}

#[async_trait]
impl<W: WebhookPoster> ChannelSink for WebhookSink<W> {
    fn name(&self) -> &str {
        "synology"
    }

    async fn deliver(&self, message: &str) -> Result<()> {
        self.poster.post_text(&strip_formatting(message)).await
    }
}
