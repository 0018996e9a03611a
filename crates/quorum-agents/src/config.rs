//! Application configuration.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, `QUORUM_*`
//! environment variables, then CLI flags applied by the runner.

use std::path::Path;
use std::time::Duration;

use coordination::backend::DecodingOptions;
use coordination::fleet::{
    Credentials, Endpoint, FleetConfig, SanityProbe, DEFAULT_PORT, DEFAULT_PULL_TIMEOUT,
};
use coordination::registry::{ModelCatalog, ModelDescriptor};
use coordination::resilience::RetryPolicy;
use coordination::session::SessionSettings;
use coordination::tools::ToolPolicy;
use serde::Deserialize;
use thiserror::Error;

/// Picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "quorum.toml";

/// Error type for configuration loading and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    #[error("No models configured")]
    NoModels,

    #[error("Model '{0}' is listed more than once")]
    DuplicateModel(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("Tools are enabled but no gateway URL is configured")]
    MissingGateway,

    #[error("Model '{0}' is not in the allow-list")]
    UnknownModel(String),

    #[error("Environment variable {0} is not set")]
    MissingSecret(String),
}

/// Result type for configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

/// One allow-listed model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    #[serde(default)]
    pub context_window: Option<u32>,
    #[serde(default)]
    pub confidence_threshold: Option<u8>,
}

impl ModelEntry {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context_window: None,
            confidence_threshold: None,
        }
    }

    fn descriptor(&self) -> ModelDescriptor {
        let mut descriptor = ModelDescriptor::new(&self.name);
        if let Some(window) = self.context_window {
            descriptor = descriptor.with_context_window(window);
        }
        if let Some(threshold) = self.confidence_threshold {
            descriptor = descriptor.with_threshold(threshold);
        }
        descriptor
    }
}

/// Statically configured node, optionally behind basic auth.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticEndpoint {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl StaticEndpoint {
    fn endpoint(&self) -> Endpoint {
        let endpoint = Endpoint::new(&self.url);
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => endpoint.with_credentials(Credentials::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => endpoint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SanitySection {
    pub prompt: String,
    pub expected: String,
}

impl Default for SanitySection {
    fn default() -> Self {
        let probe = SanityProbe::default();
        Self {
            prompt: probe.prompt,
            expected: probe.expected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FleetSection {
    pub scan_enabled: bool,
    pub prefixes: Vec<String>,
    pub port: u16,
    /// TCP connect timeout while scanning.
    pub timeout_ms: u64,
    /// HTTP timeout for inference calls.
    pub request_timeout_secs: u64,
    /// HTTP timeout for a single model pull.
    pub pull_timeout_secs: u64,
    pub workers: usize,
    pub static_endpoints: Vec<StaticEndpoint>,
    pub deny_autopull: Vec<String>,
    /// Zero disables periodic re-verification.
    pub rewire_interval_secs: u64,
    pub sanity: SanitySection,
}

impl Default for FleetSection {
    fn default() -> Self {
        Self {
            scan_enabled: false,
            prefixes: Vec::new(),
            port: DEFAULT_PORT,
            timeout_ms: 300,
            request_timeout_secs: 120,
            pull_timeout_secs: DEFAULT_PULL_TIMEOUT.as_secs(),
            workers: 64,
            static_endpoints: Vec::new(),
            deny_autopull: Vec::new(),
            rewire_interval_secs: 0,
            sanity: SanitySection::default(),
        }
    }
}

/// OpenAI-compatible cloud model. The key is read from `api_key_env`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CloudModel {
    pub name: String,
    pub url: String,
    pub api_key_env: String,
    #[serde(default)]
    pub confidence_threshold: Option<u8>,
}

impl CloudModel {
    /// Endpoint carrying the bearer key looked up through `lookup`.
    pub fn endpoint(&self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Endpoint> {
        let token = lookup(&self.api_key_env)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConfigError::MissingSecret(self.api_key_env.clone()))?;
        Ok(Endpoint::new(&self.url).with_credentials(Credentials::Bearer { token }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub profile_statement: String,
    pub hide_uncertain: bool,
    pub word_cap: usize,
    pub max_tool_depth: u32,
    pub tool_pause_secs: u64,
    /// Fixed decoding seed; random when unset.
    pub seed: Option<i64>,
}

impl Default for SessionSection {
    fn default() -> Self {
        let settings = SessionSettings::default();
        Self {
            max_attempts: settings.attempt_policy.max_attempts,
            retry_delay_ms: settings.attempt_policy.delay.as_millis() as u64,
            profile_statement: "You are a precise assistant. Answer briefly and factually."
                .to_string(),
            hide_uncertain: settings.hide_uncertain,
            word_cap: settings.word_cap,
            max_tool_depth: settings.max_tool_depth,
            tool_pause_secs: settings.tool_pause.as_secs(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub enabled: bool,
    pub gateway_url: Option<String>,
    /// Environment variable holding the gateway bearer token.
    pub token_env: Option<String>,
    pub timeout_secs: u64,
    /// Attempts per gateway request, including the first.
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub blind_trust: bool,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            gateway_url: None,
            token_env: None,
            timeout_secs: 60,
            max_attempts: 3,
            retry_delay_ms: 500,
            blind_trust: false,
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub models: Vec<ModelEntry>,
    pub fleet: FleetSection,
    pub cloud: Vec<CloudModel>,
    pub session: SessionSection,
    pub tools: ToolsSection,
}

impl AppConfig {
    pub fn from_toml_str(text: &str, origin: &str) -> ConfigResult<Self> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text, &path.display().to_string())
    }

    /// File (or defaults) with the process environment applied on top.
    /// Without an explicit path, `quorum.toml` in the working directory is
    /// used when it exists.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let local = Path::new(DEFAULT_CONFIG_FILE);
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if local.is_file() => Self::from_file(local)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Apply `QUORUM_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(models) = lookup("QUORUM_MODELS") {
            let names = split_list(&models);
            self.models = names
                .into_iter()
                .map(|name| {
                    self.models
                        .iter()
                        .find(|m| m.name == name)
                        .cloned()
                        .unwrap_or_else(|| ModelEntry::named(name))
                })
                .collect();
        }
        if let Some(port) = lookup("QUORUM_PORT") {
            self.fleet.port = parse_env("QUORUM_PORT", &port)?;
        }
        if let Some(scan) = lookup("QUORUM_SCAN") {
            self.fleet.scan_enabled = parse_flag("QUORUM_SCAN", &scan)?;
        }
        if let Some(prefixes) = lookup("QUORUM_PREFIXES") {
            self.fleet.prefixes = split_list(&prefixes);
        }
        if let Some(endpoints) = lookup("QUORUM_ENDPOINTS") {
            self.fleet.static_endpoints = split_list(&endpoints)
                .into_iter()
                .map(|url| StaticEndpoint {
                    url,
                    username: None,
                    password: None,
                })
                .collect();
        }
        if let Some(workers) = lookup("QUORUM_WORKERS") {
            self.fleet.workers = parse_env("QUORUM_WORKERS", &workers)?;
        }
        if let Some(timeout) = lookup("QUORUM_TIMEOUT_MS") {
            self.fleet.timeout_ms = parse_env("QUORUM_TIMEOUT_MS", &timeout)?;
        }
        if let Some(url) = lookup("QUORUM_TOOLS_URL") {
            self.tools.enabled = !url.trim().is_empty();
            self.tools.gateway_url = Some(url.trim().to_string()).filter(|u| !u.is_empty());
        }
        if let Some(trust) = lookup("QUORUM_BLIND_TRUST") {
            self.tools.blind_trust = parse_flag("QUORUM_BLIND_TRUST", &trust)?;
        }
        Ok(())
    }

    /// Reject configurations the rest of the program cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.models.is_empty() {
            return Err(ConfigError::NoModels);
        }
        let mut seen = std::collections::HashSet::new();
        for name in self
            .models
            .iter()
            .map(|m| &m.name)
            .chain(self.cloud.iter().map(|c| &c.name))
        {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateModel(name.clone()));
            }
        }
        if self.fleet.workers == 0 {
            return Err(ConfigError::Zero("fleet.workers"));
        }
        if self.session.max_attempts == 0 {
            return Err(ConfigError::Zero("session.max_attempts"));
        }
        if self.tools.max_attempts == 0 {
            return Err(ConfigError::Zero("tools.max_attempts"));
        }
        if self.tools.enabled && self.tools.gateway_url.is_none() {
            return Err(ConfigError::MissingGateway);
        }
        Ok(())
    }

    /// Ensure `name` is an allow-listed local or cloud model.
    pub fn ensure_model(&self, name: &str) -> ConfigResult<()> {
        let known = self.models.iter().any(|m| m.name == name)
            || self.cloud.iter().any(|c| c.name == name);
        if known {
            Ok(())
        } else {
            Err(ConfigError::UnknownModel(name.to_string()))
        }
    }

    pub fn local_model_names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }

    pub fn fleet_config(&self) -> FleetConfig {
        let fleet = &self.fleet;
        FleetConfig {
            required_models: self.local_model_names(),
            scan_enabled: fleet.scan_enabled,
            prefixes: fleet.prefixes.clone(),
            port: fleet.port,
            connect_timeout: Duration::from_millis(fleet.timeout_ms),
            workers: fleet.workers,
            static_endpoints: fleet
                .static_endpoints
                .iter()
                .map(StaticEndpoint::endpoint)
                .collect(),
            deny_autopull: fleet.deny_autopull.clone(),
            request_timeout: self.request_timeout(),
            pull_timeout: Duration::from_secs(fleet.pull_timeout_secs.max(1)),
            sanity_probe: SanityProbe::new(&fleet.sanity.prompt, &fleet.sanity.expected),
            ..FleetConfig::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.fleet.request_timeout_secs.max(1))
    }

    pub fn rewire_interval(&self) -> Option<Duration> {
        (self.fleet.rewire_interval_secs > 0)
            .then(|| Duration::from_secs(self.fleet.rewire_interval_secs))
    }

    /// Catalog over local and cloud models.
    pub fn model_catalog(&self) -> ModelCatalog {
        let local = self.models.iter().map(ModelEntry::descriptor);
        let cloud = self.cloud.iter().map(|c| {
            let descriptor = ModelDescriptor::new(&c.name);
            match c.confidence_threshold {
                Some(threshold) => descriptor.with_threshold(threshold),
                None => descriptor,
            }
        });
        ModelCatalog::from_descriptors(local.chain(cloud))
    }

    pub fn session_settings(&self, confidence_threshold: u8) -> SessionSettings {
        let s = &self.session;
        let attempt_policy =
            RetryPolicy::new(s.max_attempts, Duration::from_millis(s.retry_delay_ms));
        SessionSettings {
            attempt_policy,
            profile_policy: attempt_policy,
            hide_uncertain: s.hide_uncertain,
            confidence_threshold,
            word_cap: s.word_cap,
            max_tool_depth: s.max_tool_depth,
            tool_pause: Duration::from_secs(s.tool_pause_secs),
            tool_timeout: Duration::from_secs(self.tools.timeout_secs.max(1)),
        }
    }

    pub fn decoding_options(&self, descriptor: &ModelDescriptor) -> DecodingOptions {
        DecodingOptions::for_model(descriptor).with_seed(self.session.seed)
    }

    pub fn tool_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.tools.max_attempts,
            Duration::from_millis(self.tools.retry_delay_ms),
        )
    }

    pub fn tool_policy(&self) -> ToolPolicy {
        let policy = ToolPolicy::new().with_blind_trust(self.tools.blind_trust);
        let policy = self
            .tools
            .allow
            .iter()
            .fold(policy, |p, name| p.allow(name.clone()));
        self.tools
            .deny
            .iter()
            .fold(policy, |p, name| p.deny(name.clone()))
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_env<T: std::str::FromStr>(var: &'static str, raw: &str) -> ConfigResult<T> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: raw.to_string(),
    })
}

fn parse_flag(var: &'static str, raw: &str) -> ConfigResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list_trims_and_skips_blanks() {
        assert_eq!(split_list(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("X", "Yes").unwrap());
        assert!(!parse_flag("X", "0").unwrap());
        assert!(parse_flag("X", "maybe").is_err());
    }

    #[test]
    fn test_basic_auth_only_with_both_parts() {
        let both = StaticEndpoint {
            url: "http://n1:11434".into(),
            username: Some("u".into()),
            password: Some("p".into()),
        };
        assert!(both.endpoint().credentials.is_some());

        let half = StaticEndpoint {
            password: None,
            ..both
        };
        assert!(half.endpoint().credentials.is_none());
    }
}
