//! OpenAI-compatible backend for optional cloud models.
//!
//! Cloud endpoints are trusted as configured: they are not scanned and
//! cannot pull models.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BackendError, BackendFamily, ChatTurn, DecodingOptions, InferenceBackend};
use crate::fleet::{Credentials, Endpoint};

/// Client for an OpenAI-compatible `/v1` base URL.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    endpoint: Endpoint,
    http: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { endpoint, http })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.endpoint.credentials {
            Some(Credentials::Bearer { token }) => request.bearer_auth(token),
            Some(Credentials::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
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

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

fn first_choice(response: ChatResponse) -> Result<String, BackendError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| BackendError::Decode("response carried no choices".to_string()))
}

#[async_trait]
impl InferenceBackend for OpenAiBackend {
    fn family(&self) -> BackendFamily {
        BackendFamily::OpenAi
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.list_models().await.map(|_| ())
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        #[derive(Deserialize)]
        struct ModelsResponse {
            #[serde(default)]
            data: Vec<ModelEntry>,
        }

        #[derive(Deserialize)]
        struct ModelEntry {
            id: String,
        }

        let models: ModelsResponse = self.send(self.http.get(self.endpoint.join("models"))).await?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }

    async fn pull_model(&self, _model: &str, _timeout: Duration) -> Result<(), BackendError> {
        Err(BackendError::Unsupported {
            family: BackendFamily::OpenAi,
            operation: "pull_model",
        })
    }

    async fn chat(
        &self,
        model: &str,
        history: &[ChatTurn],
        options: &DecodingOptions,
    ) -> Result<String, BackendError> {
        // top_k and num_ctx have no OpenAI equivalent and are dropped.
        let request = ChatRequest {
            model,
            messages: history,
            temperature: options.temperature,
            top_p: options.top_p,
            seed: options.seed,
        };
        let response: ChatResponse = self
            .send(
                self.http
                    .post(self.endpoint.join("chat/completions"))
                    .json(&request),
            )
            .await?;
        let text = first_choice(response)?;
        debug!(endpoint = %self.endpoint, model, chars = text.len(), "Cloud chat complete");
        Ok(text)
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &DecodingOptions,
    ) -> Result<String, BackendError> {
        self.chat(model, &[ChatTurn::user(prompt)], options).await
    }
}
