// ABOUTME: Jarvis dispatcher binary crate: HTTP front end, channel transports and wiring
// ABOUTME: The dispatch engine itself lives in jarvis-core and is re-exported here

pub mod app;
pub mod channels;
pub mod server;

pub use jarvis_core::{config, engine, integrations, metrics, monitor, notify, paths, session};
