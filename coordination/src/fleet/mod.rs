//! Fleet Registry & Health Prober
//!
//! Turns network prefixes plus statically configured endpoints into a
//! verified map of endpoints proven to serve every required model.
//!
//! ```text
//!  prefixes ──scan──┐
//!                   ├─▶ candidates ──verify (ping → models → sanity)──▶ VerifiedFleet
//!  static ──────────┘                                                     │ atomic swap
//!                                                                          ▼
//!                                                        FleetRegistry::select_endpoint()
//! ```
//!
//! Verification short-circuits per endpoint: the first failing step abandons
//! the endpoint for the rest of the pass, even if earlier models passed.

pub mod endpoint;
pub mod prober;
pub mod registry;
pub mod scan;

use std::time::Duration;

use thiserror::Error;

use crate::backend::DecodingOptions;
use crate::resilience::RetryPolicy;

pub use endpoint::{Credentials, Endpoint};
pub use prober::{AbandonReason, HealthProber, VerificationReport};
pub use registry::{FleetRegistry, RewireOutcome, SharedFleetRegistry, VerifiedFleet};
pub use scan::{expand_prefix, scan};

/// Default Ollama port.
pub const DEFAULT_PORT: u16 = 11434;

pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Error types for fleet operations
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Invalid network prefix '{0}': {1}")]
    InvalidPrefix(String, String),
}

/// Fixed deterministic question with a known single-token answer.
#[derive(Debug, Clone, PartialEq)]
pub struct SanityProbe {
    pub prompt: String,
    pub expected: String,
    pub options: DecodingOptions,
}

impl SanityProbe {
    pub fn new(prompt: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            expected: expected.into(),
            options: DecodingOptions::deterministic(crate::registry::DEFAULT_CONTEXT_WINDOW),
        }
    }

    /// Exact match after trimming surrounding whitespace.
    pub fn accepts(&self, output: &str) -> bool {
        output.trim() == self.expected
    }
}

impl Default for SanityProbe {
    fn default() -> Self {
        Self::new(
            "Reply with a single digit and nothing else. What is 2 + 2?",
            "4",
        )
    }
}

/// Configuration for discovery and verification
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Every verified endpoint must serve all of these.
    pub required_models: Vec<String>,
    /// Scan `prefixes` in addition to the static endpoints.
    pub scan_enabled: bool,
    /// IPv4 CIDR prefixes, e.g. `192.168.1.0/24`.
    pub prefixes: Vec<String>,
    pub port: u16,
    /// TCP connect timeout per scanned host.
    pub connect_timeout: Duration,
    /// Scanner worker-pool size.
    pub workers: usize,
    pub static_endpoints: Vec<Endpoint>,
    /// Models that must never be pulled automatically.
    pub deny_autopull: Vec<String>,
    /// HTTP timeout for backend calls made by the prober.
    pub request_timeout: Duration,
    /// Ping, listing and sanity calls.
    pub probe_policy: RetryPolicy,
    /// Remote model pulls.
    pub pull_policy: RetryPolicy,
    /// Per-request timeout of a pull; a non-streamed pull of a large model
    /// outlives `request_timeout` by far.
    pub pull_timeout: Duration,
    pub sanity_probe: SanityProbe,
    /// Sleep between attempts when a pass verifies nothing.
    pub empty_retry_interval: Duration,
    /// Attempts a periodic rewire makes before keeping the prior registry.
    pub rewire_max_attempts: u32,
}

impl FleetConfig {
    pub fn is_autopull_denied(&self, model: &str) -> bool {
        self.deny_autopull.iter().any(|m| m == model)
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            required_models: Vec::new(),
            scan_enabled: false,
            prefixes: Vec::new(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_millis(300),
            workers: 64,
            static_endpoints: Vec::new(),
            deny_autopull: Vec::new(),
            request_timeout: Duration::from_secs(60),
            probe_policy: RetryPolicy::new(3, Duration::from_secs(1)),
            pull_policy: RetryPolicy::new(3, Duration::from_secs(10)),
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            sanity_probe: SanityProbe::default(),
            empty_retry_interval: Duration::from_secs(5),
            rewire_max_attempts: 10,
        }
    }
}
