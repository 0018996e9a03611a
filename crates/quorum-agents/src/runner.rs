//! Subcommand implementations wiring configuration into the library.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use coordination::backend::{InferenceBackend, OllamaBackend, OllamaConnector, OpenAiBackend};
use coordination::ensemble::{ConsensusEngine, ConsensusOutcome, EnsembleConfig};
use coordination::fleet::{FleetRegistry, SharedFleetRegistry, VerificationReport};
use coordination::scorecard::{
    append_capacity, append_tuning, evaluate, CapacityConfig, CapacityProbe, EvalQuery,
};
use coordination::session::{Session, ToolRuntime};
use coordination::tools::{HttpToolGateway, OperatorPrompt, ToolCatalog, ToolGateway};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AppConfig;

/// `[[query]]` tables of an evaluation file.
#[derive(Debug, Deserialize)]
struct QueryFile {
    #[serde(default, rename = "query")]
    queries: Vec<EvalQuery>,
}

pub fn parse_queries(text: &str) -> Result<Vec<EvalQuery>> {
    let file: QueryFile = toml::from_str(text).context("Invalid query file")?;
    Ok(file.queries)
}

pub fn load_queries(path: &Path) -> Result<Vec<EvalQuery>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_queries(&text)
}

/// Live registry plus the optional background rewire loop.
pub struct Fleet {
    pub registry: SharedFleetRegistry,
    rewire: Option<JoinHandle<()>>,
}

impl Drop for Fleet {
    fn drop(&mut self) {
        if let Some(handle) = self.rewire.take() {
            handle.abort();
        }
    }
}

fn registry(config: &AppConfig) -> FleetRegistry {
    FleetRegistry::new(
        config.fleet_config(),
        Arc::new(OllamaConnector::new(config.request_timeout())),
    )
}

/// Bootstrap the registry; blocks until an endpoint verifies.
pub async fn start_fleet(config: &AppConfig) -> Result<Fleet> {
    let registry = registry(config).shared();
    let fleet = registry
        .bootstrap()
        .await
        .context("Fleet bootstrap failed")?;
    info!(endpoints = fleet.len(), "Fleet ready");
    let rewire = config
        .rewire_interval()
        .map(|interval| registry.spawn_rewire(interval));
    Ok(Fleet { registry, rewire })
}

/// Tool runtime when tools are enabled.
pub fn tool_runtime(
    config: &AppConfig,
    operator: Arc<dyn OperatorPrompt>,
) -> Result<Option<Arc<ToolRuntime>>> {
    if !config.tools.enabled {
        return Ok(None);
    }
    let gateway = http_gateway(config)?;
    Ok(Some(
        ToolRuntime::new(Arc::new(gateway), config.tool_policy(), operator)
            .with_retry(config.tool_retry())
            .shared(),
    ))
}

pub fn http_gateway(config: &AppConfig) -> Result<HttpToolGateway> {
    let url = config
        .tools
        .gateway_url
        .as_deref()
        .context("No tool gateway URL configured")?;
    let token = match &config.tools.token_env {
        Some(var) => Some(
            std::env::var(var).with_context(|| format!("Tool gateway token {var} is not set"))?,
        ),
        None => None,
    };
    HttpToolGateway::new(url, token).context("Failed to build tool gateway client")
}

/// One session for `model`, local models on a randomly selected verified
/// endpoint, cloud models on their configured URL.
pub async fn build_session(
    config: &AppConfig,
    fleet: Option<&Fleet>,
    model: &str,
) -> Result<Session> {
    let catalog = config.model_catalog();
    let descriptor = catalog.descriptor(model);
    let settings = config.session_settings(descriptor.confidence_threshold);
    let options = config.decoding_options(&descriptor);

    let backend: Arc<dyn InferenceBackend> =
        match config.cloud.iter().find(|c| c.name == model) {
            Some(cloud) => {
                let endpoint = cloud.endpoint(|var| std::env::var(var).ok())?;
                Arc::new(OpenAiBackend::new(endpoint, config.request_timeout())?)
            }
            None => {
                let fleet = fleet.context("Local model requested without a fleet")?;
                let endpoint = fleet.registry.select_endpoint().await;
                Arc::new(OllamaBackend::new(endpoint, config.request_timeout())?)
            }
        };
    Ok(Session::new(backend, model, options, settings))
}

/// Sessions for every allow-listed local model and every cloud model.
pub async fn build_sessions(config: &AppConfig, fleet: &Fleet) -> Result<Vec<Session>> {
    let mut sessions = Vec::new();
    for model in config.local_model_names() {
        sessions.push(build_session(config, Some(fleet), &model).await?);
    }
    for cloud in &config.cloud {
        match build_session(config, None, &cloud.name).await {
            Ok(session) => sessions.push(session),
            Err(e) => warn!(model = %cloud.name, error = %e, "Skipping cloud model"),
        }
    }
    Ok(sessions)
}

pub async fn run_ask(
    config: &AppConfig,
    operator: Arc<dyn OperatorPrompt>,
    question: &str,
    ensemble: EnsembleConfig,
) -> Result<ConsensusOutcome> {
    let fleet = start_fleet(config).await?;
    let tools = tool_runtime(config, operator)?;
    let catalog = config.model_catalog();

    let mut engine = ConsensusEngine::new(ensemble);
    for session in build_sessions(config, &fleet).await? {
        let threshold = catalog.threshold(session.model());
        let session = match &tools {
            Some(tools) => session.with_tools(Arc::clone(tools)),
            None => session,
        };
        engine.add_session(session, threshold);
    }
    let profiled = engine.profile_all(&config.session.profile_statement).await;
    if profiled == 0 {
        anyhow::bail!("No session accepted the profile statement");
    }
    Ok(engine.ask_and_resolve(question).await)
}

pub async fn run_fleet(config: &AppConfig) -> Result<VerificationReport> {
    registry(config)
        .verify_once()
        .await
        .context("Verification pass failed")
}

pub async fn run_tools(gateway: &dyn ToolGateway) -> Result<ToolCatalog> {
    let tools = gateway
        .list_tools()
        .await
        .context("Failed to list tools")?;
    Ok(ToolCatalog::new(tools))
}

pub async fn run_eval(config: &AppConfig, queries: &Path, out: &Path) -> Result<usize> {
    let queries = load_queries(queries)?;
    let fleet = start_fleet(config).await?;
    let mut sessions = build_sessions(config, &fleet).await?;
    for session in &mut sessions {
        session.set_profile(&config.session.profile_statement).await;
    }

    let card = evaluate(&mut sessions, &queries).await;
    for (model, tally) in card.tallies() {
        info!(
            model = %model,
            positives = tally.positives,
            negatives = tally.negatives,
            suggested_threshold = ?card.suggest_threshold(&model),
            "Evaluation tally"
        );
    }
    append_tuning(out, &card).with_context(|| format!("Failed to write {}", out.display()))
}

pub async fn run_capacity(
    config: &AppConfig,
    model: &str,
    out: &Path,
    steps: Option<usize>,
) -> Result<usize> {
    config.ensure_model(model)?;
    let is_local = config.models.iter().any(|m| m.name == model);
    let fleet = if is_local {
        Some(start_fleet(config).await?)
    } else {
        None
    };
    let mut session = build_session(config, fleet.as_ref(), model).await?;
    session.set_profile(&config.session.profile_statement).await;

    let mut probe_config = CapacityConfig::default();
    if let Some(steps) = steps {
        probe_config.steps = steps;
    }
    let rows = CapacityProbe::new(probe_config).run(&mut session).await;
    append_capacity(out, &rows).with_context(|| format!("Failed to write {}", out.display()))?;
    Ok(rows.len())
}

pub fn render_outcome(outcome: &ConsensusOutcome) -> String {
    let mut out = String::new();
    let resolution = &outcome.resolution;
    match &resolution.answer {
        Some(answer) => {
            let _ = writeln!(out, "Answer: {answer}");
            let _ = writeln!(
                out,
                "Rule: {} ({} supporter(s))",
                resolution.rule,
                resolution.supporters.len()
            );
            for supporter in &resolution.supporters {
                let _ = writeln!(out, "  - {supporter}");
            }
        }
        None => {
            let _ = writeln!(out, "No consensus");
        }
    }
    let round = outcome.deciding_round();
    let _ = writeln!(
        out,
        "Replies ({}{}):",
        round.len(),
        if outcome.second_round.is_some() {
            ", refined"
        } else {
            ""
        }
    );
    for (identity, reply) in &round.replies {
        let _ = writeln!(
            out,
            "  {identity}: {} [{}%]",
            reply.response, reply.probability
        );
    }
    out
}

pub fn render_report(report: &VerificationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Verified ({}):", report.verified.len());
    for endpoint in &report.verified {
        let _ = writeln!(out, "  {endpoint}");
    }
    let _ = writeln!(out, "Abandoned ({}):", report.abandoned.len());
    for (endpoint, reason) in &report.abandoned {
        let _ = writeln!(out, "  {endpoint}: {reason}");
    }
    out
}

pub fn render_catalog(catalog: &ToolCatalog) -> String {
    let mut out = String::new();
    for tool in catalog.descriptors() {
        let _ = writeln!(out, "{}: {}", tool.name, tool.description);
    }
    if catalog.is_empty() {
        out.push_str("No tools available\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_queries() {
        let queries = parse_queries(
            r#"
            [[query]]
            question = "Capital of France?"
            acceptable = ["Paris"]

            [[query]]
            question = "2 + 2?"
            acceptable = ["4", "four"]
            "#,
        )
        .unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].acceptable, vec!["4", "four"]);
    }

    #[test]
    fn test_parse_queries_empty_file() {
        assert!(parse_queries("").unwrap().is_empty());
    }
}
