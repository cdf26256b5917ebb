// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and provides sensible defaults for optional ones
use crate::integrations::{default_descriptors, Environment, IntegrationDescriptor, ProcessEnvironment};
use crate::monitor::{AllClearMarkers, Check};
use crate::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default = "default_descriptors")]
    pub integrations: Vec<IntegrationDescriptor>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<DiscordConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synology: Option<SynologyConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine CLI binary
    #[serde(default = "default_engine_binary")]
    pub binary: String,
    /// Working directory for every invocation (holds the engine's project instructions)
    #[serde(default = "default_project_dir")]
    pub project_dir: String,
    /// Base capability manifest. Defaults to `<project_dir>/mcp.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_config: Option<String>,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Passed verbatim to `--max-budget-usd`
    #[serde(default = "default_max_budget")]
    pub max_budget_usd: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_tool_namespace")]
    pub tool_namespace: String,
    /// Where per-invocation manifest files are written. Defaults to the system temp dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_engine_binary(),
            project_dir: default_project_dir(),
            mcp_config: None,
            max_turns: default_max_turns(),
            max_budget_usd: default_max_budget(),
            timeout_secs: default_timeout_secs(),
            tool_namespace: default_tool_namespace(),
            scratch_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn mcp_config_path(&self) -> PathBuf {
        match &self.mcp_config {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.project_dir).join("mcp.json"),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Grace period before each check's first run
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,
    /// Case-insensitive phrases meaning "nothing to report". A marker must
    /// appear as whole words: "ras" matches "RAS." but not "infrastructure".
    #[serde(default = "default_all_clear_markers")]
    pub all_clear_markers: Vec<String>,
    #[serde(default = "default_checks")]
    pub checks: Vec<CheckConfig>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_delay_secs: default_startup_delay_secs(),
            all_clear_markers: default_all_clear_markers(),
            checks: default_checks(),
        }
    }
}

impl MonitoringConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn markers(&self) -> AllClearMarkers {
        AllClearMarkers::new(self.all_clear_markers.iter().map(String::as_str))
    }

    pub fn to_checks(&self) -> Vec<Check> {
        self.checks.iter().map(CheckConfig::to_check).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConfig {
    pub name: String,
    pub prompt: String,
    pub interval_minutes: u64,
    /// Integrations the check needs; any one of them being active is enough
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl CheckConfig {
    pub fn to_check(&self) -> Check {
        Check {
            name: self.name.clone(),
            prompt: self.prompt.clone(),
            interval: Duration::from_secs(self.interval_minutes.saturating_mul(60)),
            dependencies: self.dependencies.iter().cloned().collect::<BTreeSet<_>>(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: String,
    /// Channels that receive proactive notifications
    #[serde(default)]
    pub channel_ids: Vec<u64>,
}

// Custom Debug impl to redact sensitive fields
impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("bot_token", &"[REDACTED]")
            .field("channel_ids", &self.channel_ids)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SynologyConfig {
    /// Incoming webhook URL (contains its own token)
    pub webhook_url: String,
}

impl std::fmt::Debug for SynologyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynologyConfig")
            .field("webhook_url", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily-rolling log files; console only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

impl LoggingConfig {
    pub fn resolved_dir(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| {
            if d == "default" {
                paths::log_dir()
            } else {
                PathBuf::from(d)
            }
        })
    }
}

fn default_engine_binary() -> String {
    "claude".to_string()
}

fn default_project_dir() -> String {
    "/home/jarvis/app".to_string()
}

fn default_max_turns() -> u32 {
    10
}

fn default_max_budget() -> String {
    "1.00".to_string()
}

fn default_timeout_secs() -> u64 {
    300 // 5 minutes
}

fn default_tool_namespace() -> String {
    crate::integrations::DEFAULT_TOOL_NAMESPACE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_startup_delay_secs() -> u64 {
    60
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

/// One week
pub const MAX_CHECK_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

pub fn default_all_clear_markers() -> Vec<String> {
    ["ras", "rien à signaler", "tout est ok", "tout va bien", "aucun problème"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

pub fn default_checks() -> Vec<CheckConfig> {
    vec![
        CheckConfig {
            name: "cluster-health".to_string(),
            prompt: "Fais un check de santé du cluster Kubernetes. \
                     Vérifie : pods en erreur, restarts élevés, nodes en pression, \
                     réconciliations FluxCD en échec, alertes Prometheus actives. \
                     C'est un check de monitoring automatique."
                .to_string(),
            interval_minutes: 15,
            dependencies: vec!["kubernetes".to_string(), "grafana-prometheus".to_string()],
        },
        CheckConfig {
            name: "homeassistant".to_string(),
            prompt: "Vérifie l'état de Home Assistant. \
                     Y a-t-il des entités unavailable, des automations en erreur, \
                     ou des capteurs avec des valeurs anormales ? \
                     C'est un check de monitoring automatique."
                .to_string(),
            interval_minutes: 30,
            dependencies: vec!["homeassistant".to_string()],
        },
        CheckConfig {
            name: "fluxcd-reconciliation".to_string(),
            prompt: "Vérifie l'état de réconciliation de toutes les ressources FluxCD. \
                     GitRepositories, Kustomizations, HelmReleases. \
                     Signale tout ce qui n'est pas Ready. \
                     C'est un check de monitoring automatique."
                .to_string(),
            interval_minutes: 10,
            dependencies: vec!["fluxcd".to_string()],
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            monitoring: MonitoringConfig::default(),
            integrations: default_descriptors(),
            server: ServerConfig::default(),
            discord: None,
            synology: None,
            logging: LoggingConfig::default(),
        }
    }
}

fn env_value(env: &dyn Environment, key: &str) -> Option<String> {
    env.var(key).filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Find the config file, checking in order:
    /// 1. JARVIS_CONFIG_PATH env var (if set)
    /// 2. ./config.toml
    /// 3. ~/.config/jarvis/config.toml
    pub fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("JARVIS_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load configuration from the first config file found (or defaults),
    /// apply environment overrides, then validate.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::find_config_file())
    }

    /// Same as [`Config::load`] with an explicit file; a missing path means defaults.
    pub fn load_from(path: Option<PathBuf>) -> Result<Self> {
        let mut config = match path {
            Some(config_path) => {
                tracing::debug!(path = %config_path.display(), "Loading configuration from file");
                let content = std::fs::read_to_string(&config_path)
                    .with_context(|| format!("Failed to read {}", config_path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Failed to parse {}", config_path.display()))?
            }
            None => {
                tracing::debug!("No config file found, using environment variables and defaults");
                Config::default()
            }
        };

        config.apply_env_overrides(&ProcessEnvironment)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Config>(content).context("Invalid configuration TOML")
    }

    /// Environment variables win over file values
    pub fn apply_env_overrides(&mut self, env: &dyn Environment) -> Result<()> {
        if let Some(val) = env_value(env, "JARVIS_ENGINE_BINARY") {
            self.engine.binary = val;
        }
        if let Some(val) = env_value(env, "JARVIS_PROJECT_DIR") {
            self.engine.project_dir = val;
        }
        if let Some(val) = env_value(env, "JARVIS_MCP_CONFIG") {
            self.engine.mcp_config = Some(val);
        }
        if let Some(val) = env_value(env, "JARVIS_MAX_BUDGET") {
            self.engine.max_budget_usd = val;
        }
        if let Some(val) = env_value(env, "JARVIS_MAX_TURNS") {
            self.engine.max_turns = val.trim().parse().with_context(|| {
                format!("JARVIS_MAX_TURNS must be a positive integer, got: {}", val)
            })?;
        }
        if let Some(val) = env_value(env, "JARVIS_TIMEOUT_SECS") {
            self.engine.timeout_secs = val.trim().parse().with_context(|| {
                format!("JARVIS_TIMEOUT_SECS must be a number of seconds, got: {}", val)
            })?;
        }
        if let Some(val) = env_value(env, "JARVIS_MONITORING") {
            self.monitoring.enabled = val.trim().eq_ignore_ascii_case("true");
        }
        if let Some(val) = env_value(env, "JARVIS_HOST") {
            self.server.host = val;
        }
        if let Some(val) = env_value(env, "JARVIS_PORT") {
            self.server.port = val.trim().parse().with_context(|| {
                format!("JARVIS_PORT must be a valid port number, got: {}", val)
            })?;
        }
        if let Some(token) = env_value(env, "DISCORD_BOT_TOKEN") {
            match self.discord {
                Some(ref mut discord) => discord.bot_token = token,
                None => {
                    self.discord = Some(DiscordConfig {
                        bot_token: token,
                        channel_ids: Vec::new(),
                    })
                }
            }
        }
        if let Some(val) = env_value(env, "DISCORD_CHANNEL_IDS") {
            let ids = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u64>()
                        .with_context(|| format!("Invalid Discord channel id in DISCORD_CHANNEL_IDS: {}", s))
                })
                .collect::<Result<Vec<_>>>()?;
            if let Some(ref mut discord) = self.discord {
                discord.channel_ids = ids;
            }
        }
        if let Some(url) = env_value(env, "SYNOLOGY_CHAT_WEBHOOK_URL") {
            self.synology = Some(SynologyConfig { webhook_url: url });
        }
        if let Some(val) = env_value(env, "JARVIS_LOG_DIR") {
            self.logging.dir = Some(val);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.binary.trim().is_empty() {
            anyhow::bail!("engine.binary must not be empty");
        }
        if self.engine.max_turns == 0 {
            anyhow::bail!("engine.max_turns must be greater than zero");
        }
        if self.engine.timeout_secs == 0 {
            anyhow::bail!("engine.timeout_secs must be greater than zero");
        }
        match self.engine.max_budget_usd.trim().parse::<f64>() {
            Ok(budget) if budget > 0.0 => {}
            _ => anyhow::bail!(
                "engine.max_budget_usd must be a positive number, got: {}",
                self.engine.max_budget_usd
            ),
        }

        let mut seen = HashSet::new();
        for check in &self.monitoring.checks {
            if check.name.trim().is_empty() {
                anyhow::bail!("monitoring check names must not be empty");
            }
            if !seen.insert(check.name.as_str()) {
                anyhow::bail!("Duplicate monitoring check name: {}", check.name);
            }
            if check.interval_minutes == 0 {
                anyhow::bail!("monitoring check '{}' needs an interval of at least one minute", check.name);
            }
            if check.interval_minutes > MAX_CHECK_INTERVAL_MINUTES {
                anyhow::bail!(
                    "monitoring check '{}' interval exceeds {} minutes",
                    check.name,
                    MAX_CHECK_INTERVAL_MINUTES
                );
            }
            if check.prompt.trim().is_empty() {
                anyhow::bail!("monitoring check '{}' has an empty prompt", check.name);
            }
        }

        let mut names = HashSet::new();
        for integration in &self.integrations {
            if !names.insert(integration.name.as_str()) {
                anyhow::bail!("Duplicate integration name: {}", integration.name);
            }
        }

        if let Some(ref discord) = self.discord {
            if discord.bot_token.trim().is_empty() {
                anyhow::bail!("discord.bot_token must not be empty when [discord] is present");
            }
        }
        if let Some(ref synology) = self.synology {
            if !synology.webhook_url.starts_with("http://") && !synology.webhook_url.starts_with("https://") {
                anyhow::bail!("synology.webhook_url must be an http(s) URL");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::{Requirement, StaticEnvironment};

    #[test]
    fn test_defaults_without_file() {
        let config = Config::default();
        assert_eq!(config.engine.binary, "claude");
        assert_eq!(config.engine.max_turns, 10);
        assert_eq!(config.engine.max_budget_usd, "1.00");
        assert_eq!(config.engine.timeout(), Duration::from_secs(300));
        assert_eq!(
            config.engine.mcp_config_path(),
            PathBuf::from("/home/jarvis/app/mcp.json")
        );
        assert!(config.monitoring.enabled);
        assert_eq!(config.monitoring.checks.len(), 3);
        assert_eq!(config.integrations.len(), 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
                [engine]
                project_dir = "/srv/jarvis"
                max_turns = 4

                [monitoring]
                enabled = false
                startup_delay_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.project_dir, "/srv/jarvis");
        assert_eq!(config.engine.max_turns, 4);
        assert_eq!(config.engine.timeout_secs, 300);
        assert!(!config.monitoring.enabled);
        assert_eq!(config.monitoring.startup_delay(), Duration::from_secs(5));
        assert_eq!(config.monitoring.checks.len(), 3);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_custom_checks_and_integrations() {
        let config = Config::from_toml(
            r#"
                [[integrations]]
                name = "homeassistant"
                requirement = { type = "env_var_set", vars = ["HA_TOKEN"] }

                [[integrations]]
                name = "kubernetes"
                requirement = { type = "credential_presence", path_env = "KUBECONFIG", paths = ["~/.kube/config"] }

                [[monitoring.checks]]
                name = "lights"
                prompt = "Any lamp left on?"
                interval_minutes = 5
                dependencies = ["homeassistant"]
            "#,
        )
        .unwrap();
        assert_eq!(config.integrations.len(), 2);
        assert_eq!(
            config.integrations[0].requirement,
            Requirement::EnvVarSet {
                vars: vec!["HA_TOKEN".to_string()]
            }
        );
        let checks = config.monitoring.to_checks();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].interval, Duration::from_secs(300));
        assert!(checks[0].dependencies.contains("homeassistant"));
    }

    #[test]
    fn test_env_overrides() {
        let env = StaticEnvironment::new()
            .with_var("JARVIS_PROJECT_DIR", "/opt/jarvis")
            .with_var("JARVIS_MAX_TURNS", "3")
            .with_var("JARVIS_MAX_BUDGET", "0.25")
            .with_var("JARVIS_MONITORING", "FALSE")
            .with_var("DISCORD_BOT_TOKEN", "bot-token")
            .with_var("DISCORD_CHANNEL_IDS", "123, 456,")
            .with_var("SYNOLOGY_CHAT_WEBHOOK_URL", "https://nas.local/webapi/entry.cgi?token=x");
        let mut config = Config::default();
        config.apply_env_overrides(&env).unwrap();

        assert_eq!(config.engine.project_dir, "/opt/jarvis");
        assert_eq!(config.engine.max_turns, 3);
        assert_eq!(config.engine.max_budget_usd, "0.25");
        assert!(!config.monitoring.enabled);
        let discord = config.discord.as_ref().unwrap();
        assert_eq!(discord.channel_ids, vec![123, 456]);
        assert!(config.synology.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_env_number_is_an_error() {
        let env = StaticEnvironment::new().with_var("JARVIS_MAX_TURNS", "lots");
        let mut config = Config::default();
        let err = config.apply_env_overrides(&env).unwrap_err();
        assert!(err.to_string().contains("JARVIS_MAX_TURNS"));
    }

    #[test]
    fn test_validate_rejects_duplicate_checks_and_bad_budget() {
        let mut config = Config::default();
        let dup = config.monitoring.checks[0].clone();
        config.monitoring.checks.push(dup);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.engine.max_budget_usd = "free".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.monitoring.checks[0].interval_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_interval_is_rejected_not_overflowed() {
        let mut config = Config::default();
        config.monitoring.checks[0].interval_minutes = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("interval exceeds"));

        let check = config.monitoring.checks[0].to_check();
        assert_eq!(check.interval, Duration::from_secs(u64::MAX));

        config.monitoring.checks[0].interval_minutes = MAX_CHECK_INTERVAL_MINUTES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let discord = DiscordConfig {
            bot_token: "super-secret".to_string(),
            channel_ids: vec![1],
        };
        let debug = format!("{:?}", discord);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
