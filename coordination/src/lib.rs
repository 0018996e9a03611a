//! Fleet Consensus Library
//!
//! Ask one question, get one trustworthy answer from a fleet of individually
//! unreliable language-model backends.
//!
//! This library provides:
//! - Fleet discovery and health verification of inference endpoints
//! - Strict-contract model sessions with JSON repair and tool-call rounds
//! - Quorum consensus across sessions, with single-supporter fallback and
//!   one refinement round
//! - Offline scorecards: threshold tuning and context-capacity probes
//!
//! # Layers
//!
//! ```text
//! registry / resilience ─▶ backend ─▶ fleet ─▶ session (+ tools) ─▶ ensemble ─▶ scorecard
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use coordination::fleet::{FleetConfig, FleetRegistry};
//! use coordination::backend::OllamaConnector;
//!
//! let registry = FleetRegistry::new(config, Arc::new(OllamaConnector::new(timeout))).shared();
//! registry.bootstrap().await?;
//! let endpoint = registry.select_endpoint().await;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod backend;
pub mod ensemble;
pub mod fleet;
pub mod registry;
pub mod resilience;
pub mod scorecard;
pub mod session;
pub mod tools;

pub use backend::{
    BackendConnector, BackendError, BackendFamily, ChatTurn, DecodingOptions, InferenceBackend,
    OllamaBackend, OllamaConnector, OpenAiBackend, Role,
};
pub use ensemble::{
    resolve, ConsensusEngine, ConsensusOutcome, EnsembleConfig, EnsembleResponse, Resolution,
    ResolutionRule,
};
pub use fleet::{
    AbandonReason, Credentials, Endpoint, FleetConfig, FleetError, FleetRegistry, HealthProber,
    RewireOutcome, SanityProbe, SharedFleetRegistry, VerificationReport, VerifiedFleet,
};
pub use registry::{ModelCatalog, ModelDescriptor};
pub use resilience::RetryPolicy;
pub use scorecard::{EvalQuery, ModelTally, ScoreCard, ScoreRecord};
pub use session::{QuestionResponse, Session, SessionSettings, SessionState, ToolRuntime};
pub use tools::{
    HttpToolGateway, OperatorPrompt, ToolCallRequest, ToolGateway, ToolMode, ToolPolicy,
};
