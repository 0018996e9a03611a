//! Configuration loading, overrides and validation.

use std::collections::HashMap;
use std::time::Duration;

use coordination::fleet::Credentials;
use quorum_agents::config::{AppConfig, ConfigError};

const SAMPLE: &str = r#"
[[models]]
name = "llama3"
context_window = 8192
confidence_threshold = 70

[[models]]
name = "mistral"

[fleet]
scan_enabled = true
prefixes = ["192.168.1.0/24"]
workers = 16
deny_autopull = ["llama3:70b"]
rewire_interval_secs = 300
pull_timeout_secs = 1800

[[fleet.static_endpoints]]
url = "http://gpu-1:11434"
username = "ops"
password = "hunter2"

[[cloud]]
name = "gpt-4o"
url = "https://api.openai.com/v1"
api_key_env = "OPENAI_API_KEY"
confidence_threshold = 80

[session]
max_attempts = 5
retry_delay_ms = 250
hide_uncertain = true
seed = 7

[tools]
enabled = true
gateway_url = "http://tools:8080/rpc"
max_attempts = 4
allow = ["clock"]
"#;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

fn sample() -> AppConfig {
    AppConfig::from_toml_str(SAMPLE, "sample.toml").unwrap()
}

#[test]
fn test_sample_parses_and_validates() {
    let config = sample();
    config.validate().unwrap();
    assert_eq!(config.models.len(), 2);
    assert_eq!(config.fleet.port, 11434);
    assert_eq!(config.fleet.timeout_ms, 300);
    assert_eq!(config.session.max_attempts, 5);
    assert_eq!(config.rewire_interval(), Some(Duration::from_secs(300)));
}

#[test]
fn test_fleet_config_conversion() {
    let fleet = sample().fleet_config();
    assert_eq!(fleet.required_models, vec!["llama3", "mistral"]);
    assert!(fleet.scan_enabled);
    assert_eq!(fleet.workers, 16);
    assert!(fleet.is_autopull_denied("llama3:70b"));
    assert!(matches!(
        &fleet.static_endpoints[0].credentials,
        Some(Credentials::Basic { username, .. }) if username == "ops"
    ));
    assert_eq!(fleet.sanity_probe.expected, "4");
    assert_eq!(fleet.request_timeout, Duration::from_secs(120));
    assert_eq!(fleet.pull_timeout, Duration::from_secs(1800));
}

#[test]
fn test_pull_timeout_defaults_to_an_hour() {
    let fleet = AppConfig::default().fleet_config();
    assert_eq!(fleet.pull_timeout, Duration::from_secs(3600));
}

#[test]
fn test_catalog_covers_local_and_cloud() {
    let catalog = sample().model_catalog();
    assert_eq!(catalog.context_window("llama3"), 8192);
    assert_eq!(catalog.threshold("llama3"), 70);
    assert_eq!(catalog.threshold("mistral"), 55);
    assert_eq!(catalog.threshold("gpt-4o"), 80);
}

#[test]
fn test_session_settings_and_options() {
    let config = sample();
    let settings = config.session_settings(70);
    assert_eq!(settings.attempt_policy.max_attempts, 5);
    assert_eq!(settings.attempt_policy.delay, Duration::from_millis(250));
    assert!(settings.hide_uncertain);
    assert_eq!(settings.confidence_threshold, 70);

    let descriptor = config.model_catalog().descriptor("llama3");
    let options = config.decoding_options(&descriptor);
    assert_eq!(options.seed, Some(7));
    assert_eq!(options.context_window, 8192);
}

#[test]
fn test_tool_retry_from_tools_section() {
    let config = sample();
    let retry = config.tool_retry();
    assert_eq!(retry.max_attempts, 4);
    assert_eq!(retry.delay, Duration::from_millis(500));

    let mut zero = sample();
    zero.tools.max_attempts = 0;
    assert!(matches!(zero.validate(), Err(ConfigError::Zero("tools.max_attempts"))));
}

#[test]
fn test_env_overrides_file() {
    let mut config = sample();
    config
        .apply_env(env(&[
            ("QUORUM_MODELS", "mistral, phi3"),
            ("QUORUM_PORT", "8080"),
            ("QUORUM_SCAN", "off"),
            ("QUORUM_ENDPOINTS", "http://a:1,http://b:2"),
            ("QUORUM_WORKERS", "4"),
            ("QUORUM_TIMEOUT_MS", "900"),
            ("QUORUM_BLIND_TRUST", "true"),
        ]))
        .unwrap();

    assert_eq!(config.local_model_names(), vec!["mistral", "phi3"]);
    assert_eq!(config.fleet.port, 8080);
    assert!(!config.fleet.scan_enabled);
    assert_eq!(config.fleet.static_endpoints.len(), 2);
    assert!(config.fleet.static_endpoints[0].username.is_none());
    assert_eq!(config.fleet.workers, 4);
    assert_eq!(config.fleet.timeout_ms, 900);
    assert!(config.tools.blind_trust);
}

#[test]
fn test_env_model_keeps_file_settings() {
    let mut config = sample();
    config
        .apply_env(env(&[("QUORUM_MODELS", "llama3")]))
        .unwrap();
    assert_eq!(config.models[0].context_window, Some(8192));
}

#[test]
fn test_env_tools_url_enables_tools() {
    let mut config = AppConfig::default();
    config
        .apply_env(env(&[
            ("QUORUM_MODELS", "llama3"),
            ("QUORUM_TOOLS_URL", "http://tools:9000/rpc"),
        ]))
        .unwrap();
    assert!(config.tools.enabled);
    assert_eq!(config.tools.gateway_url.as_deref(), Some("http://tools:9000/rpc"));
    config.validate().unwrap();
}

#[test]
fn test_invalid_env_value_rejected() {
    let mut config = sample();
    let err = config
        .apply_env(env(&[("QUORUM_PORT", "eleven")]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidEnv { var: "QUORUM_PORT", .. }));
}

#[test]
fn test_validation_failures() {
    let empty = AppConfig::default();
    assert!(matches!(empty.validate(), Err(ConfigError::NoModels)));

    let mut dup = sample();
    dup.cloud[0].name = "llama3".into();
    assert!(matches!(dup.validate(), Err(ConfigError::DuplicateModel(m)) if m == "llama3"));

    let mut workers = sample();
    workers.fleet.workers = 0;
    assert!(matches!(workers.validate(), Err(ConfigError::Zero("fleet.workers"))));

    let mut attempts = sample();
    attempts.session.max_attempts = 0;
    assert!(matches!(attempts.validate(), Err(ConfigError::Zero(_))));

    let mut tools = sample();
    tools.tools.gateway_url = None;
    assert!(matches!(tools.validate(), Err(ConfigError::MissingGateway)));
}

#[test]
fn test_ensure_model_allow_list() {
    let config = sample();
    assert!(config.ensure_model("mistral").is_ok());
    assert!(config.ensure_model("gpt-4o").is_ok());
    assert!(matches!(
        config.ensure_model("phi3"),
        Err(ConfigError::UnknownModel(_))
    ));
}

#[test]
fn test_cloud_endpoint_requires_key() {
    let config = sample();
    let cloud = &config.cloud[0];
    assert!(matches!(
        cloud.endpoint(env(&[])),
        Err(ConfigError::MissingSecret(var)) if var == "OPENAI_API_KEY"
    ));
    let endpoint = cloud
        .endpoint(env(&[("OPENAI_API_KEY", "sk-test")]))
        .unwrap();
    assert!(matches!(endpoint.credentials, Some(Credentials::Bearer { .. })));
}

#[test]
fn test_load_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quorum.toml");
    std::fs::write(&path, "[[models]]\nname = \"llama3\"\n").unwrap();
    let config = AppConfig::from_file(&path).unwrap();
    assert_eq!(config.local_model_names(), vec!["llama3"]);

    let missing = AppConfig::from_file(&dir.path().join("nope.toml"));
    assert!(matches!(missing, Err(ConfigError::Read { .. })));
}

#[test]
fn test_malformed_toml_reports_origin() {
    let err = AppConfig::from_toml_str("models = 3", "bad.toml").unwrap_err();
    assert!(err.to_string().contains("bad.toml"));
}
