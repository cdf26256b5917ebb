// ABOUTME: Jarvis entry point: logging, config, and the serve / integrations / send / check commands
// ABOUTME: `serve` runs the HTTP front end and health-check loops until Ctrl-C or SIGTERM

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jarvis::app::Dispatcher;
use jarvis::{config::Config, metrics, server};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "jarvis", version, about = "Routes chat messages to the reasoning engine and runs health checks")]
struct Cli {
    /// Path to config.toml (overrides JARVIS_CONFIG_PATH and the default search)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the dispatcher: HTTP API, WebSocket, health checks (default)
    Serve,
    /// Show which integrations are configured
    Integrations,
    /// Send one message to the engine and print the reply
    Send {
        #[arg(long, default_value = "default")]
        session: String,
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Run a single health check now
    Check {
        name: String,
        /// Also deliver an alert if the result is actionable
        #[arg(long)]
        notify: bool,
    },
}

fn init_logging(json: bool, log_dir: Option<PathBuf>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (json_layer, text_layer) = if json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(&dir, "jarvis.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }
    tracing::info!("Received SIGINT");
}

async fn run_serve(dispatcher: Dispatcher) -> Result<()> {
    let metrics_handle = match metrics::init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics disabled");
            None
        }
    };

    dispatcher.log_status();
    dispatcher.scheduler.start();

    let state = dispatcher.app_state(metrics_handle);
    let result = server::serve(
        &dispatcher.config.server.host,
        dispatcher.config.server.port,
        state,
        shutdown_signal(),
    )
    .await;

    dispatcher.scheduler.stop();
    tracing::info!("Jarvis dispatcher stopped");
    result
}

fn print_integrations(dispatcher: &Dispatcher) {
    let width = dispatcher
        .integrations
        .descriptors()
        .iter()
        .map(|d| d.name.len())
        .max()
        .unwrap_or(0);
    for (name, active) in dispatcher.integrations.status() {
        let state = if active { "active" } else { "inactive" };
        println!("{:<width$}  {}", name, state, width = width);
    }
}

async fn run_check(dispatcher: &Dispatcher, name: &str, notify: bool) -> Result<()> {
    let check = dispatcher
        .scheduler
        .checks()
        .iter()
        .find(|c| c.name == name)
        .with_context(|| format!("Unknown check: {}", name))?;
    if !dispatcher.integrations.check_is_eligible(check) {
        tracing::warn!(check = %name, "No dependency of this check is active; running anyway");
    }

    let report = dispatcher.scheduler.run_check_once(name, notify).await?;
    println!("{}: {}", report.check, report.classification.as_str());
    println!();
    println!("{}", report.response);
    for result in &report.notifications {
        println!("{}", result);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    // The log directory comes from the config, so the source is reported once logging is up
    let config_path = cli.config.or_else(Config::find_config_file);
    let config = Config::load_from(config_path.clone())?;
    let _log_guard = init_logging(cli.json, config.logging.resolved_dir())?;
    match &config_path {
        Some(path) => tracing::info!(path = %path.display(), "Loaded configuration from file"),
        None => tracing::info!("No config file found, using environment variables and defaults"),
    }

    let dispatcher = Dispatcher::new(config);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Jarvis dispatcher");
            run_serve(dispatcher).await
        }
        Command::Integrations => {
            print_integrations(&dispatcher);
            Ok(())
        }
        Command::Send { session, message } => {
            let reply = dispatcher.invoker.send(&session, &message.join(" ")).await;
            println!("{}", reply);
            Ok(())
        }
        Command::Check { name, notify } => run_check(&dispatcher, &name, notify).await,
    }
}
