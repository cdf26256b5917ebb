// ABOUTME: Integration availability gate deciding which tool providers have usable credentials.
// ABOUTME: Builds the filtered capability manifest and tool allowlist handed to the engine.

use crate::monitor::Check;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default tool namespace used by the engine for externally provided tools
pub const DEFAULT_TOOL_NAMESPACE: &str = "mcp";

/// What an integration needs before it is considered configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Requirement {
    /// A local credential file must exist. When `path_env` names a non-empty
    /// variable, its value replaces the first entry of `paths`.
    CredentialPresence {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path_env: Option<String>,
        paths: Vec<String>,
    },
    /// Every listed variable must be set to a non-blank value
    EnvVarSet { vars: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationDescriptor {
    pub name: String,
    pub requirement: Requirement,
}

impl IntegrationDescriptor {
    pub fn env(name: &str, vars: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            requirement: Requirement::EnvVarSet {
                vars: vars.iter().map(|v| v.to_string()).collect(),
            },
        }
    }

    pub fn credential(name: &str, path_env: Option<&str>, paths: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            requirement: Requirement::CredentialPresence {
                path_env: path_env.map(String::from),
                paths: paths.iter().map(|p| p.to_string()).collect(),
            },
        }
    }
}

/// Kubeconfig lookup shared by the cluster integrations: $KUBECONFIG (or
/// ~/.kube/config), then the in-cluster service account token.
fn kubeconfig_descriptor(name: &str) -> IntegrationDescriptor {
    IntegrationDescriptor::credential(
        name,
        Some("KUBECONFIG"),
        &[
            "~/.kube/config",
            "/var/run/secrets/kubernetes.io/serviceaccount/token",
        ],
    )
}

/// The built-in integration table used when the config declares none
pub fn default_descriptors() -> Vec<IntegrationDescriptor> {
    vec![
        kubeconfig_descriptor("kubernetes"),
        kubeconfig_descriptor("fluxcd"),
        IntegrationDescriptor::env("homeassistant", &["HA_TOKEN"]),
        IntegrationDescriptor::env("grafana-prometheus", &["PROMETHEUS_URL"]),
        IntegrationDescriptor::env("git", &["GIT_REPOS"]),
        IntegrationDescriptor::env("planka", &["PLANKA_USER", "PLANKA_PASSWORD"]),
        IntegrationDescriptor::env("miniflux", &["MINIFLUX_API_KEY"]),
        IntegrationDescriptor::env("immich", &["IMMICH_API_KEY"]),
        IntegrationDescriptor::env("karakeep", &["KARAKEEP_API_KEY"]),
        IntegrationDescriptor::env("music-assistant", &["MUSIC_ASSISTANT_URL"]),
    ]
}

// =============================================================================
// Environment access
// =============================================================================

/// Read-only view of the process environment and local filesystem.
///
/// Availability checks go through this trait so tests can supply a fixed
/// environment instead of mutating the real one.
pub trait Environment: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
    fn is_file(&self, path: &Path) -> bool;
    fn home_dir(&self) -> Option<PathBuf>;
}

/// The real process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn home_dir(&self) -> Option<PathBuf> {
        directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
    }
}

/// A fixed environment, useful for tests and dry runs
#[derive(Debug, Default, Clone)]
pub struct StaticEnvironment {
    vars: HashMap<String, String>,
    files: HashSet<PathBuf>,
    home: Option<PathBuf>,
}

impl StaticEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.insert(path.into());
        self
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }
}

impl Environment for StaticEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    fn home_dir(&self) -> Option<PathBuf> {
        self.home.clone()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn expand_home(path: &str, env: &dyn Environment) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = env.home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

// =============================================================================
// Capability manifest
// =============================================================================

/// Tool-server manifest passed to the engine: integration name -> tool config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    #[serde(rename = "mcpServers", default)]
    pub servers: Map<String, Value>,
}

impl CapabilityManifest {
    /// Read a manifest from disk. A missing or unparseable file yields None,
    /// which callers treat the same as an empty manifest.
    pub fn load(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "No base capability manifest");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Invalid capability manifest, ignoring");
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Evaluates integration descriptors against an environment.
///
/// Nothing is cached: every call re-reads the environment, so credentials that
/// appear while the process runs are picked up by the next invocation.
#[derive(Clone)]
pub struct IntegrationRegistry {
    descriptors: Arc<Vec<IntegrationDescriptor>>,
    env: Arc<dyn Environment>,
    tool_namespace: String,
}

impl std::fmt::Debug for IntegrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationRegistry")
            .field("descriptors", &self.descriptors)
            .field("tool_namespace", &self.tool_namespace)
            .finish()
    }
}

impl IntegrationRegistry {
    pub fn new(descriptors: Vec<IntegrationDescriptor>, env: Arc<dyn Environment>) -> Self {
        Self {
            descriptors: Arc::new(descriptors),
            env,
            tool_namespace: DEFAULT_TOOL_NAMESPACE.to_string(),
        }
    }

    pub fn with_tool_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.tool_namespace = namespace.into();
        self
    }

    pub fn descriptors(&self) -> &[IntegrationDescriptor] {
        &self.descriptors
    }

    pub fn availability(&self, descriptor: &IntegrationDescriptor) -> bool {
        let env = self.env.as_ref();
        match &descriptor.requirement {
            Requirement::EnvVarSet { vars } => vars.iter().all(|v| non_blank(env.var(v)).is_some()),
            Requirement::CredentialPresence { path_env, paths } => {
                let override_path = path_env.as_deref().and_then(|k| non_blank(env.var(k)));
                let mut candidates: Vec<PathBuf> = paths.iter().map(|p| expand_home(p, env)).collect();
                if let Some(custom) = override_path {
                    let custom = expand_home(&custom, env);
                    match candidates.first_mut() {
                        Some(first) => *first = custom,
                        None => candidates.push(custom),
                    }
                }
                candidates.iter().any(|p| env.is_file(p))
            }
        }
    }

    /// Availability of every descriptor, in declaration order
    pub fn status(&self) -> Vec<(String, bool)> {
        self.descriptors
            .iter()
            .map(|d| (d.name.clone(), self.availability(d)))
            .collect()
    }

    pub fn active_integrations(&self) -> BTreeSet<String> {
        self.descriptors
            .iter()
            .filter(|d| self.availability(d))
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn filtered_capability_manifest(&self, base: Option<&CapabilityManifest>) -> CapabilityManifest {
        filter_manifest(base, &self.active_integrations())
    }

    /// `<namespace>__<name>__*` per integration, comma separated
    pub fn tool_allowlist_string<'a, I>(&self, integrations: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        integrations
            .into_iter()
            .map(|name| format!("{}__{}__*", self.tool_namespace, name))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// A check runs when at least one of its dependencies is active. Checks
    /// that declare no dependencies need nothing and are always eligible.
    pub fn check_is_eligible(&self, check: &Check) -> bool {
        if check.dependencies.is_empty() {
            return true;
        }
        let active = self.active_integrations();
        check.dependencies.iter().any(|dep| active.contains(dep))
    }

    /// Log which integrations are active and which are missing configuration
    pub fn log_status(&self) {
        let (active, inactive): (Vec<_>, Vec<_>) =
            self.status().into_iter().partition(|(_, ok)| *ok);
        let active: Vec<String> = active.into_iter().map(|(n, _)| n).collect();
        let inactive: Vec<String> = inactive.into_iter().map(|(n, _)| n).collect();

        crate::metrics::set_active_integrations(active.len());
        if !active.is_empty() {
            tracing::info!(integrations = %active.join(", "), "Integrations active");
        }
        if !inactive.is_empty() {
            tracing::info!(
                integrations = %inactive.join(", "),
                "Integrations inactive (missing config)"
            );
        }
    }
}

/// Keep only the manifest entries whose key is in `active`
pub fn filter_manifest(base: Option<&CapabilityManifest>, active: &BTreeSet<String>) -> CapabilityManifest {
    let Some(base) = base else {
        return CapabilityManifest::default();
    };
    let servers = base
        .servers
        .iter()
        .filter(|(name, _)| active.contains(name.as_str()))
        .map(|(name, cfg)| (name.clone(), cfg.clone()))
        .collect();
    CapabilityManifest { servers }
}
