//! Inference backends
//!
//! Two backend families expose the same logical operations:
//!
//! - [`OllamaBackend`]: locally discovered nodes (`/api/*` routes, model pull).
//! - [`OpenAiBackend`]: OpenAI-compatible cloud endpoints (`/chat/completions`).
//!
//! A system message is not a separate call: it is the leading
//! [`Role::System`] turn of the history handed to [`InferenceBackend::chat`].

pub mod ollama;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fleet::Endpoint;
use crate::registry::ModelDescriptor;

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

/// Which wire protocol a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFamily {
    Ollama,
    OpenAi,
}

impl std::fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One stored conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }

    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// Decoding knobs sent with every generation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecodingOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// Fixed seed, or `None` to let the backend pick a random one.
    pub seed: Option<i64>,
    /// Context window in tokens.
    pub context_window: u32,
}

impl DecodingOptions {
    /// Defaults sized to the model's context window.
    pub fn for_model(descriptor: &ModelDescriptor) -> Self {
        Self {
            context_window: descriptor.context_window,
            ..Self::default()
        }
    }

    /// Greedy, seeded decoding used by the sanity probe.
    pub fn deterministic(context_window: u32) -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
            top_k: 1,
            seed: Some(42),
            context_window,
        }
    }

    pub fn with_seed(mut self, seed: Option<i64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

impl Default for DecodingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            seed: None,
            context_window: crate::registry::DEFAULT_CONTEXT_WINDOW,
        }
    }
}

/// Error type for backend calls
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed backend payload: {0}")]
    Decode(String),

    #[error("Model pull failed: {0}")]
    Pull(String),

    #[error("Operation not supported by {family} backends: {operation}")]
    Unsupported {
        family: BackendFamily,
        operation: &'static str,
    },
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

/// Logical operations every inference backend provides.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    fn family(&self) -> BackendFamily;

    fn endpoint(&self) -> &Endpoint;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<(), BackendError>;

    /// Names of the models the backend currently serves.
    async fn list_models(&self) -> Result<Vec<String>, BackendError>;

    /// Ask the backend to fetch a model it does not have yet. `timeout`
    /// replaces the client's request timeout for this call only.
    async fn pull_model(&self, model: &str, timeout: Duration) -> Result<(), BackendError>;

    /// Send the whole history; returns the assistant text.
    async fn chat(
        &self,
        model: &str,
        history: &[ChatTurn],
        options: &DecodingOptions,
    ) -> Result<String, BackendError>;

    /// Raw single-prompt completion.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &DecodingOptions,
    ) -> Result<String, BackendError>;
}

/// Builds a backend client for an endpoint.
pub trait BackendConnector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn InferenceBackend>, BackendError>;
}

/// Connector for locally discovered Ollama nodes.
#[derive(Debug, Clone)]
pub struct OllamaConnector {
    pub timeout: Duration,
}

impl OllamaConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl BackendConnector for OllamaConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn InferenceBackend>, BackendError> {
        Ok(Arc::new(OllamaBackend::new(endpoint.clone(), self.timeout)?))
    }
}

/// Whether a listed model name satisfies a required one.
///
/// Ollama reports untagged pulls as `name:latest`, so `llama3` is served by
/// `llama3:latest` but not by `llama3:70b`.
pub fn model_matches(listed: &str, required: &str) -> bool {
    if listed == required {
        return true;
    }
    match listed.strip_suffix(":latest") {
        Some(base) => base == required,
        None => false,
    }
}
