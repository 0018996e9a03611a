//! Live registry of verified endpoints.
//!
//! Readers take a cheap `Arc` clone of the current snapshot; a verification
//! pass builds a new [`VerifiedFleet`] off to the side and installs it with a
//! single pointer swap, so selection never observes a half-built map.
//! Rewires are serialized by `rewire_guard` (single writer).

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::IteratorRandom;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::prober::{HealthProber, VerificationReport};
use super::scan::scan;
use super::{Endpoint, FleetConfig, FleetError};
use crate::backend::BackendConnector;

/// Immutable snapshot of verified endpoints keyed by URL.
#[derive(Debug, Clone, Default)]
pub struct VerifiedFleet {
    endpoints: BTreeMap<String, Endpoint>,
    verified_at: Option<DateTime<Utc>>,
}

impl VerifiedFleet {
    pub fn new(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        Self {
            endpoints: endpoints
                .into_iter()
                .map(|e| (e.url.clone(), e))
                .collect(),
            verified_at: Some(Utc::now()),
        }
    }

    pub fn get(&self, url: &str) -> Option<&Endpoint> {
        self.endpoints.get(url)
    }

    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn verified_at(&self) -> Option<DateTime<Utc>> {
        self.verified_at
    }
}

/// What a periodic rewire did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewireOutcome {
    /// A non-empty snapshot replaced the previous one.
    Replaced { endpoints: usize },
    /// Every attempt verified nothing; the prior snapshot stays live.
    KeptPrevious { attempts: u32 },
}

/// Shared reference to FleetRegistry
pub type SharedFleetRegistry = Arc<FleetRegistry>;

/// Registry service: discovery, verification, atomic snapshot, selection.
pub struct FleetRegistry {
    prober: HealthProber,
    snapshot: RwLock<Arc<VerifiedFleet>>,
    rewire_guard: Mutex<()>,
}

impl FleetRegistry {
    pub fn new(config: FleetConfig, connector: Arc<dyn BackendConnector>) -> Self {
        Self {
            prober: HealthProber::new(config, connector),
            snapshot: RwLock::new(Arc::new(VerifiedFleet::default())),
            rewire_guard: Mutex::new(()),
        }
    }

    pub fn shared(self) -> SharedFleetRegistry {
        Arc::new(self)
    }

    pub fn config(&self) -> &FleetConfig {
        self.prober.config()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<VerifiedFleet> {
        let current = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*current)
    }

    fn install(&self, fleet: VerifiedFleet) {
        let fleet = Arc::new(fleet);
        let mut current = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        *current = fleet;
    }

    /// Scan results (when enabled) plus static endpoints.
    pub async fn candidates(&self) -> Result<Vec<Endpoint>, FleetError> {
        let config = self.config();
        let mut candidates = Vec::new();
        if config.scan_enabled && !config.prefixes.is_empty() {
            candidates.extend(
                scan(
                    &config.prefixes,
                    config.port,
                    config.connect_timeout,
                    config.workers,
                )
                .await?,
            );
        }
        candidates.extend(config.static_endpoints.iter().cloned());
        Ok(candidates)
    }

    /// One discovery + verification pass; does not touch the live snapshot.
    pub async fn verify_once(&self) -> Result<VerificationReport, FleetError> {
        let candidates = self.candidates().await?;
        info!(candidates = candidates.len(), "Starting verification pass");
        Ok(self.prober.verify_pass(candidates).await)
    }

    /// Startup: block until at least one endpoint verifies, retrying
    /// indefinitely. Only configuration errors (bad prefixes) escape.
    pub async fn bootstrap(&self) -> Result<Arc<VerifiedFleet>, FleetError> {
        let _writer = self.rewire_guard.lock().await;
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let report = self.verify_once().await?;
            if !report.is_empty() {
                let fleet = VerifiedFleet::new(report.verified);
                info!(endpoints = fleet.len(), attempt, "Fleet bootstrapped");
                self.install(fleet);
                return Ok(self.snapshot());
            }
            warn!(
                attempt,
                retry_in = ?self.config().empty_retry_interval,
                "No usable endpoint yet, waiting"
            );
            tokio::time::sleep(self.config().empty_retry_interval).await;
        }
    }

    /// Periodic re-verification. Keeps the prior snapshot when every
    /// attempt comes back empty or fails.
    pub async fn rewire(&self) -> RewireOutcome {
        let _writer = self.rewire_guard.lock().await;
        let attempts = self.config().rewire_max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.verify_once().await {
                Ok(report) if !report.is_empty() => {
                    let fleet = VerifiedFleet::new(report.verified);
                    let endpoints = fleet.len();
                    self.install(fleet);
                    info!(endpoints, attempt, "Fleet rewired");
                    return RewireOutcome::Replaced { endpoints };
                }
                Ok(_) => warn!(attempt, "Rewire pass verified nothing"),
                Err(e) => warn!(attempt, error = %e, "Rewire pass failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.config().empty_retry_interval).await;
            }
        }
        warn!(
            attempts,
            live = self.snapshot().len(),
            "Rewire exhausted, keeping previous registry"
        );
        RewireOutcome::KeptPrevious { attempts }
    }

    /// Spawn the periodic rewire loop.
    pub fn spawn_rewire(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                registry.rewire().await;
            }
        })
    }

    /// Uniform-random endpoint from the live snapshot, if any.
    pub fn try_select(&self) -> Option<Endpoint> {
        let fleet = self.snapshot();
        fleet.endpoints().choose(&mut rand::thread_rng()).cloned()
    }

    /// Uniform-random endpoint; blocks (retrying on the empty-retry interval)
    /// while the registry is empty.
    pub async fn select_endpoint(&self) -> Endpoint {
        loop {
            if let Some(endpoint) = self.try_select() {
                return endpoint;
            }
            warn!("Registry empty, waiting for endpoints");
            tokio::time::sleep(self.config().empty_retry_interval).await;
        }
    }
}
