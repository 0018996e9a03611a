//! Tool access shared by the sessions of one process.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::resilience::RetryPolicy;
use crate::tools::{
    GatewayError, OperatorPrompt, ToolCallRequest, ToolCatalog, ToolGateway, ToolPolicy,
};

static WHITESPACE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("WHITESPACE_RUN_RE regex should compile"));

/// Collapse runs of whitespace in tool output to a single space.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN_RE.replace_all(text.trim(), " ").into_owned()
}

/// Gateway, authorization policy and operator, plus the cached catalog.
///
/// Every gateway request goes through `retry`.
pub struct ToolRuntime {
    gateway: Arc<dyn ToolGateway>,
    policy: ToolPolicy,
    operator: Arc<dyn OperatorPrompt>,
    retry: RetryPolicy,
    catalog: OnceCell<ToolCatalog>,
}

impl ToolRuntime {
    pub fn new(
        gateway: Arc<dyn ToolGateway>,
        policy: ToolPolicy,
        operator: Arc<dyn OperatorPrompt>,
    ) -> Self {
        Self {
            gateway,
            policy,
            operator,
            retry: RetryPolicy::default(),
            catalog: OnceCell::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Catalog fetched once per runtime. A listing that fails every retry is
    /// not cached and reads as an empty catalog for this round.
    pub async fn catalog(&self) -> Option<&ToolCatalog> {
        let fetched = self
            .catalog
            .get_or_try_init(|| async {
                let tools = self
                    .retry
                    .run("tools/list", |_| self.gateway.list_tools())
                    .await?;
                debug!(tools = tools.len(), "Tool catalog loaded");
                Ok::<_, GatewayError>(ToolCatalog::new(tools))
            })
            .await;
        match fetched {
            Ok(catalog) => Some(catalog),
            Err(e) => {
                warn!(error = %e, "Tool catalog unavailable");
                None
            }
        }
    }

    /// Whether every request names a catalogued tool.
    pub async fn all_known(&self, requests: &[ToolCallRequest]) -> Result<(), String> {
        let catalog = self.catalog().await;
        for request in requests {
            let known = catalog.is_some_and(|c| c.contains(&request.name));
            if !known {
                return Err(request.name.clone());
            }
        }
        Ok(())
    }

    pub async fn authorize(&self, request: &ToolCallRequest) -> bool {
        self.policy.authorize(self.operator.as_ref(), request).await
    }

    /// Invoke one tool; returns its collapsed textual result.
    pub async fn invoke(
        &self,
        request: &ToolCallRequest,
        timeout: Duration,
    ) -> Result<String, GatewayError> {
        debug!(tool = %request.name, mode = %request.mode, "Invoking tool");
        let arguments = request.arguments_json();
        let output = self
            .retry
            .run(&request.name, |_| {
                self.gateway.call_tool(&request.name, &arguments, timeout)
            })
            .await?;
        let text = collapse_whitespace(&output.text());
        if output.is_error {
            warn!(tool = %request.name, "Tool reported an error");
            Ok(format!("error: {text}"))
        } else {
            Ok(text)
        }
    }
}
