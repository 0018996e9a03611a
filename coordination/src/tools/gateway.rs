//! Tool gateway client.
//!
//! The gateway exposes a catalog (`tools/list`) and invocation
//! (`tools/call`) over JSON-RPC 2.0 carried by plain HTTP POST.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    pub input_schema: Value,
}

/// One content block of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallOutput {
    #[serde(default, rename = "isError", alias = "is_error")]
    pub is_error: bool,
    #[serde(default)]
    pub content: Vec<ToolContent>,
}

impl ToolCallOutput {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: vec![ToolContent::text(text)],
        }
    }

    /// Concatenated text blocks; non-text blocks are ignored.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|c| c.kind == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Error type for gateway calls
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("tool call timed out")]
    Timeout,

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed gateway payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GatewayError {
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

/// External tool catalog + invocation.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<ToolCallOutput, GatewayError>;
}

/// Tool names the gateway advertised, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolCatalog {
    pub fn new(tools: impl IntoIterator<Item = ToolDescriptor>) -> Self {
        Self {
            tools: tools.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

/// JSON-RPC over HTTP POST, optional bearer token.
pub struct HttpToolGateway {
    url: String,
    token: Option<String>,
    http: reqwest::Client,
    list_timeout: Duration,
    next_id: AtomicU64,
}

impl HttpToolGateway {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            url: url.into(),
            token,
            http,
            list_timeout: Duration::from_secs(30),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<T, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, url = %self.url, "Gateway request");

        let mut request = self.http.post(&self.url).timeout(timeout).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Http(format!("HTTP {}: {}", status.as_u16(), text)));
        }

        let reply: RpcResponse<T> = response.json().await?;
        if let Some(err) = reply.error {
            return Err(GatewayError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        reply
            .result
            .ok_or_else(|| GatewayError::Decode(format!("{method}: response has no result")))
    }
}

#[async_trait]
impl ToolGateway for HttpToolGateway {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError> {
        let result: ListToolsResult = self.rpc("tools/list", json!({}), self.list_timeout).await?;
        Ok(result.tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<ToolCallOutput, GatewayError> {
        self.rpc(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
            timeout,
        )
        .await
    }
}
