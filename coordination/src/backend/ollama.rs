//! Ollama-native backend (`/api/version`, `/api/tags`, `/api/pull`, `/api/chat`, `/api/generate`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BackendError, BackendFamily, ChatTurn, DecodingOptions, InferenceBackend};
use crate::fleet::{Credentials, Endpoint};

/// `options` object of Ollama generation requests.
#[derive(Debug, Serialize)]
struct WireOptions {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    num_ctx: u32,
}

impl From<&DecodingOptions> for WireOptions {
    fn from(o: &DecodingOptions) -> Self {
        Self {
            temperature: o.temperature,
            top_p: o.top_p,
            top_k: o.top_k,
            seed: o.seed,
            num_ctx: o.context_window,
        }
    }
}

/// Client for a single Ollama node.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    endpoint: Endpoint,
    http: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { endpoint, http })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.endpoint.credentials {
            Some(Credentials::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            Some(Credentials::Bearer { token }) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let response = self.authorize(request).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }
        response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn family(&self) -> BackendFamily {
        BackendFamily::Ollama
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn ping(&self) -> Result<(), BackendError> {
        #[derive(Deserialize)]
        struct VersionResponse {
            #[allow(dead_code)]
            version: String,
        }

        let _: VersionResponse = self
            .send(self.http.get(self.endpoint.join("api/version")))
            .await?;
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        #[derive(Deserialize)]
        struct TagsResponse {
            #[serde(default)]
            models: Vec<TagEntry>,
        }

        #[derive(Deserialize)]
        struct TagEntry {
            name: String,
        }

        let tags: TagsResponse = self
            .send(self.http.get(self.endpoint.join("api/tags")))
            .await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn pull_model(&self, model: &str, timeout: Duration) -> Result<(), BackendError> {
        #[derive(Serialize)]
        struct PullRequest<'a> {
            model: &'a str,
            stream: bool,
        }

        #[derive(Deserialize)]
        struct PullResponse {
            #[serde(default)]
            status: String,
            #[serde(default)]
            error: Option<String>,
        }

        info!(endpoint = %self.endpoint, model, timeout = ?timeout, "Pulling model");
        let response: PullResponse = self
            .send(
                self.http
                    .post(self.endpoint.join("api/pull"))
                    .timeout(timeout)
                    .json(&PullRequest {
                        model,
                        stream: false,
                    }),
            )
            .await?;

        if let Some(error) = response.error {
            return Err(BackendError::Pull(error));
        }
        if response.status != "success" {
            return Err(BackendError::Pull(format!(
                "unexpected pull status '{}'",
                response.status
            )));
        }
        Ok(())
    }

    async fn chat(
        &self,
        model: &str,
        history: &[ChatTurn],
        options: &DecodingOptions,
    ) -> Result<String, BackendError> {
        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: &'a [ChatTurn],
            stream: bool,
            options: WireOptions,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            message: ResponseMessage,
        }

        #[derive(Deserialize)]
        struct ResponseMessage {
            #[serde(default)]
            content: String,
        }

        let request = ChatRequest {
            model,
            messages: history,
            stream: false,
            options: options.into(),
        };
        let response: ChatResponse = self
            .send(self.http.post(self.endpoint.join("api/chat")).json(&request))
            .await?;

        debug!(
            endpoint = %self.endpoint,
            model,
            turns = history.len(),
            chars = response.message.content.len(),
            "Chat complete"
        );
        Ok(response.message.content)
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &DecodingOptions,
    ) -> Result<String, BackendError> {
        #[derive(Serialize)]
        struct GenerateRequest<'a> {
            model: &'a str,
            prompt: &'a str,
            stream: bool,
            options: WireOptions,
        }

        #[derive(Deserialize)]
        struct GenerateResponse {
            #[serde(default)]
            response: String,
        }

        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: options.into(),
        };
        let response: GenerateResponse = self
            .send(
                self.http
                    .post(self.endpoint.join("api/generate"))
                    .json(&request),
            )
            .await?;
        Ok(response.response)
    }
}
