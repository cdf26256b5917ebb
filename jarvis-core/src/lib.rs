// ABOUTME: Session-oriented dispatch engine shared by every inbound surface
// ABOUTME: Integration gating, conversation sessions, engine invocation, health checks and alert fan-out

pub mod config;
pub mod engine;
pub mod integrations;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod paths;
pub mod session;

pub use config::Config;
pub use engine::{CliRunner, EngineInvoker, EngineRunner, EngineSettings, InvocationError};
pub use integrations::{
    CapabilityManifest, Environment, IntegrationDescriptor, IntegrationRegistry, ProcessEnvironment,
    StaticEnvironment,
};
pub use monitor::{Check, CheckScheduler, Classification, SchedulerSettings};
pub use notify::{
    ChannelSink, ChatBotSink, ChatPoster, LiveConnectionSink, LiveHub, NotificationFanout,
    NotificationResult, WebhookPoster, WebhookSink,
};
pub use session::ConversationRegistry;
