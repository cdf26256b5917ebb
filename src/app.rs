// ABOUTME: Composition root wiring registries, invoker, fan-out sinks and the check scheduler
// ABOUTME: Built once from Config; everything downstream receives Arc or cheap-clone handles

use jarvis_core::config::Config;
use jarvis_core::engine::{CliRunner, EngineInvoker, EngineRunner, EngineSettings};
use jarvis_core::integrations::{Environment, IntegrationRegistry, ProcessEnvironment};
use jarvis_core::monitor::{CheckScheduler, SchedulerSettings};
use jarvis_core::notify::{ChatBotSink, LiveConnectionSink, NotificationFanout, WebhookSink};
use jarvis_core::session::ConversationRegistry;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::channels::{DiscordPoster, SynologyWebhook, WebHub};
use crate::server::AppState;

pub struct Dispatcher {
    pub config: Arc<Config>,
    pub integrations: IntegrationRegistry,
    pub sessions: ConversationRegistry,
    pub invoker: Arc<EngineInvoker>,
    pub fanout: Arc<NotificationFanout>,
    pub scheduler: CheckScheduler,
    pub hub: WebHub,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("integrations", &self.integrations)
            .field("fanout", &self.fanout)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl Dispatcher {
    /// Production wiring: real engine CLI, real process environment
    pub fn new(config: Config) -> Self {
        let runner = Arc::new(CliRunner::new(config.engine.binary.clone()));
        Self::with_parts(config, runner, Arc::new(ProcessEnvironment))
    }

    pub fn with_parts(config: Config, runner: Arc<dyn EngineRunner>, env: Arc<dyn Environment>) -> Self {
        let integrations = IntegrationRegistry::new(config.integrations.clone(), env)
            .with_tool_namespace(config.engine.tool_namespace.clone());
        let sessions = ConversationRegistry::new();
        let invoker = Arc::new(EngineInvoker::new(
            EngineSettings::from(&config.engine),
            sessions.clone(),
            integrations.clone(),
            runner,
        ));

        let hub = WebHub::new();
        let fanout = Arc::new(build_fanout(&config, &hub));

        let scheduler = CheckScheduler::new(
            config.monitoring.to_checks(),
            Arc::clone(&invoker),
            Arc::clone(&fanout),
            integrations.clone(),
            SchedulerSettings::from(&config.monitoring),
        );

        Self {
            config: Arc::new(config),
            integrations,
            sessions,
            invoker,
            fanout,
            scheduler,
            hub,
        }
    }

    pub fn app_state(&self, metrics: Option<PrometheusHandle>) -> AppState {
        AppState {
            invoker: Arc::clone(&self.invoker),
            hub: self.hub.clone(),
            metrics,
        }
    }

    /// Startup summary: integrations, alert channels, engine limits
    pub fn log_status(&self) {
        self.integrations.log_status();
        tracing::info!(
            project_dir = %self.config.engine.project_dir,
            max_turns = self.config.engine.max_turns,
            max_budget_usd = %self.config.engine.max_budget_usd,
            timeout_secs = self.config.engine.timeout_secs,
            "Engine configured"
        );
        tracing::info!(sinks = %self.fanout.sink_names().join(", "), "Alert channels");
    }
}

fn build_fanout(config: &Config, hub: &WebHub) -> NotificationFanout {
    let mut fanout = NotificationFanout::new();

    match &config.discord {
        Some(discord) if !discord.channel_ids.is_empty() => {
            fanout.register(Arc::new(ChatBotSink::new(DiscordPoster::new(discord))));
            tracing::info!(channels = discord.channel_ids.len(), "Channel enabled: Discord");
        }
        Some(_) => tracing::info!("Channel disabled: Discord (no channel ids for alerts)"),
        None => tracing::info!("Channel disabled: Discord (DISCORD_BOT_TOKEN not set)"),
    }

    fanout.register(Arc::new(LiveConnectionSink::new(hub.clone())));
    tracing::info!(
        addr = %format!("{}:{}", config.server.host, config.server.port),
        "Channel enabled: Web UI"
    );

    match &config.synology {
        Some(synology) => {
            fanout.register(Arc::new(WebhookSink::new(SynologyWebhook::new(synology))));
            tracing::info!("Channel enabled: Synology Chat (webhook)");
        }
        None => tracing::info!("Channel disabled: Synology Chat (SYNOLOGY_CHAT_WEBHOOK_URL not set)"),
    }

    fanout
}
