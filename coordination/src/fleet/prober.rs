//! Per-endpoint verification: ping, model presence (with auto-pull), sanity probe.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{Endpoint, FleetConfig};
use crate::backend::{model_matches, BackendConnector, InferenceBackend};

/// Why an endpoint was dropped from a verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// No client could be built for the endpoint.
    ConnectFailed { error: String },
    /// Ping failed after retries.
    Unreachable { error: String },
    /// Model listing failed after retries.
    ListingFailed { error: String },
    /// Model absent and auto-pull denied for it.
    ModelMissing { model: String },
    /// Model absent and the pull (or the recheck) failed.
    PullFailed { model: String, error: String },
    /// Sanity probe answered, but wrongly.
    SanityMismatch {
        model: String,
        expected: String,
        actual: String,
    },
    /// Sanity probe request itself failed.
    SanityError { model: String, error: String },
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed { error } => write!(f, "client setup failed: {error}"),
            Self::Unreachable { error } => write!(f, "unreachable: {error}"),
            Self::ListingFailed { error } => write!(f, "model listing failed: {error}"),
            Self::ModelMissing { model } => write!(f, "model {model} missing (auto-pull denied)"),
            Self::PullFailed { model, error } => write!(f, "pull of {model} failed: {error}"),
            Self::SanityMismatch {
                model,
                expected,
                actual,
            } => write!(
                f,
                "sanity probe on {model}: expected '{expected}', got '{actual}'"
            ),
            Self::SanityError { model, error } => {
                write!(f, "sanity probe on {model} failed: {error}")
            }
        }
    }
}

/// Outcome of one verification pass.
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub verified: Vec<Endpoint>,
    pub abandoned: Vec<(Endpoint, AbandonReason)>,
}

impl VerificationReport {
    pub fn is_empty(&self) -> bool {
        self.verified.is_empty()
    }
}

/// Runs the verification steps against candidate endpoints.
#[derive(Clone)]
pub struct HealthProber {
    config: FleetConfig,
    connector: Arc<dyn BackendConnector>,
}

impl HealthProber {
    pub fn new(config: FleetConfig, connector: Arc<dyn BackendConnector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Verify every candidate once, one task per endpoint with at most
    /// `workers` in flight. Duplicate URLs are probed once. Returns after
    /// every task has finished, entries sorted by URL.
    pub async fn verify_pass(&self, candidates: Vec<Endpoint>) -> VerificationReport {
        let mut unique: BTreeMap<String, Endpoint> = BTreeMap::new();
        for endpoint in candidates {
            // Static entries carry credentials; keep the first one seen.
            unique.entry(endpoint.url.clone()).or_insert(endpoint);
        }

        let prober = Arc::new(self.clone());
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();
        for endpoint in unique.into_values() {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let prober = Arc::clone(&prober);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = prober.verify_endpoint(&endpoint).await;
                (endpoint, outcome)
            });
        }

        let mut report = VerificationReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((endpoint, Ok(()))) => {
                    info!(endpoint = %endpoint, "Endpoint verified");
                    report.verified.push(endpoint);
                }
                Ok((endpoint, Err(reason))) => {
                    warn!(endpoint = %endpoint, reason = %reason, "Endpoint abandoned");
                    report.abandoned.push((endpoint, reason));
                }
                Err(e) => warn!(error = %e, "Verification task failed"),
            }
        }
        report.verified.sort_by(|a, b| a.url.cmp(&b.url));
        report.abandoned.sort_by(|(a, _), (b, _)| a.url.cmp(&b.url));
        report
    }

    /// Full check of one endpoint against every required model.
    pub async fn verify_endpoint(&self, endpoint: &Endpoint) -> Result<(), AbandonReason> {
        let backend = self
            .connector
            .connect(endpoint)
            .map_err(|e| AbandonReason::ConnectFailed {
                error: e.to_string(),
            })?;

        self.config
            .probe_policy
            .run("ping", |_| backend.ping())
            .await
            .map_err(|e| AbandonReason::Unreachable {
                error: e.to_string(),
            })?;

        for model in &self.config.required_models {
            self.ensure_model(backend.as_ref(), model).await?;
            self.sanity_check(backend.as_ref(), model).await?;
        }
        Ok(())
    }

    async fn has_model(&self, backend: &dyn InferenceBackend, model: &str) -> Result<bool, String> {
        let listed = self
            .config
            .probe_policy
            .run("list_models", |_| backend.list_models())
            .await
            .map_err(|e| e.to_string())?;
        Ok(listed.iter().any(|name| model_matches(name, model)))
    }

    async fn ensure_model(
        &self,
        backend: &dyn InferenceBackend,
        model: &str,
    ) -> Result<(), AbandonReason> {
        let present = self
            .has_model(backend, model)
            .await
            .map_err(|error| AbandonReason::ListingFailed { error })?;
        if present {
            return Ok(());
        }
        if self.config.is_autopull_denied(model) {
            return Err(AbandonReason::ModelMissing {
                model: model.to_string(),
            });
        }

        info!(endpoint = %backend.endpoint(), model, "Model missing, attempting pull");
        self.config
            .pull_policy
            .run("pull_model", |_| {
                backend.pull_model(model, self.config.pull_timeout)
            })
            .await
            .map_err(|e| AbandonReason::PullFailed {
                model: model.to_string(),
                error: e.to_string(),
            })?;

        match self.has_model(backend, model).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AbandonReason::PullFailed {
                model: model.to_string(),
                error: "model still absent after pull".to_string(),
            }),
            Err(error) => Err(AbandonReason::PullFailed {
                model: model.to_string(),
                error,
            }),
        }
    }

    async fn sanity_check(
        &self,
        backend: &dyn InferenceBackend,
        model: &str,
    ) -> Result<(), AbandonReason> {
        let probe = &self.config.sanity_probe;
        let output = self
            .config
            .probe_policy
            .run("sanity_probe", |_| {
                backend.generate(model, &probe.prompt, &probe.options)
            })
            .await
            .map_err(|e| AbandonReason::SanityError {
                model: model.to_string(),
                error: e.to_string(),
            })?;

        if probe.accepts(&output) {
            debug!(endpoint = %backend.endpoint(), model, "Sanity probe passed");
            Ok(())
        } else {
            Err(AbandonReason::SanityMismatch {
                model: model.to_string(),
                expected: probe.expected.clone(),
                actual: output.trim().to_string(),
            })
        }
    }
}
