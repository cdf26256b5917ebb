// ABOUTME: Outbound channel transports plugged into the core notification sinks
// ABOUTME: Discord REST poster, Synology Chat incoming webhook, and the web connection hub

pub mod discord;
pub mod synology;
pub mod web;

pub use discord::DiscordPoster;
pub use synology::SynologyWebhook;
pub use web::WebHub;
