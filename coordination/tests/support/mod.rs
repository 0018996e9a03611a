//! Hand-written fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use coordination::backend::{
    BackendConnector, BackendError, BackendFamily, ChatTurn, DecodingOptions, InferenceBackend,
};
use coordination::fleet::Endpoint;
use coordination::session::contract::PROFILE_ACK_PROMPT;
use coordination::tools::{GatewayError, ToolCallOutput, ToolDescriptor, ToolGateway};

/// Contract-shaped single-line JSON reply.
pub fn contract_reply(response: &str, probability: u8) -> String {
    json!({
        "response": response,
        "probability": probability,
        "motivation": format!("because {response}"),
        "assumptions_made": "",
        "tool_calls": "",
    })
    .to_string()
}

pub fn tool_reply(trigger: &str, tool_calls: &str) -> String {
    json!({
        "response": trigger,
        "probability": 90,
        "motivation": "need data",
        "assumptions_made": "",
        "tool_calls": tool_calls,
    })
    .to_string()
}

/// Scriptable inference backend.
pub struct FakeBackend {
    endpoint: Endpoint,
    pub reachable: AtomicBool,
    ping_delay: Duration,
    pub profile_fails: AtomicBool,
    models: Mutex<Vec<String>>,
    pullable: bool,
    sanity: Mutex<HashMap<String, String>>,
    replies: Mutex<VecDeque<Result<String, BackendError>>>,
    fallback: Mutex<String>,
    pub pulls: AtomicUsize,
    pub pull_timeouts: Mutex<Vec<Duration>>,
    pub chats: AtomicUsize,
    pub seen: Mutex<Vec<Vec<ChatTurn>>>,
}

impl FakeBackend {
    pub fn new(url: &str) -> Self {
        Self {
            endpoint: Endpoint::new(url),
            reachable: AtomicBool::new(true),
            ping_delay: Duration::ZERO,
            profile_fails: AtomicBool::new(false),
            models: Mutex::new(Vec::new()),
            pullable: false,
            sanity: Mutex::new(HashMap::new()),
            replies: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(String::new()),
            pulls: AtomicUsize::new(0),
            pull_timeouts: Mutex::new(Vec::new()),
            chats: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_models(self, models: &[&str]) -> Self {
        *self.models.lock().unwrap() = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn pullable(mut self) -> Self {
        self.pullable = true;
        self
    }

    /// Sanity answer for `model`; unset models answer "4".
    pub fn with_sanity(self, model: &str, answer: &str) -> Self {
        self.sanity
            .lock()
            .unwrap()
            .insert(model.to_string(), answer.to_string());
        self
    }

    pub fn with_replies(self, replies: Vec<String>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .extend(replies.into_iter().map(Ok));
        self
    }

    pub fn with_error(self) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(BackendError::Timeout));
        self
    }

    /// Reply used once the script runs out.
    pub fn with_fallback(self, reply: String) -> Self {
        *self.fallback.lock().unwrap() = reply;
        self
    }

    /// Ping answers only after `delay`.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.ping_delay = delay;
        self
    }

    pub fn unreachable(self) -> Self {
        self.reachable.store(false, Ordering::SeqCst);
        self
    }

    pub fn failing_profile(self) -> Self {
        self.profile_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn url(&self) -> &str {
        &self.endpoint.url
    }

    pub fn chat_count(&self) -> usize {
        self.chats.load(Ordering::SeqCst)
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Last user turn of every question sent.
    pub fn questions(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|h| h.last().map(|t| t.content.clone()))
            .collect()
    }
}

#[async_trait]
impl InferenceBackend for FakeBackend {
    fn family(&self) -> BackendFamily {
        BackendFamily::Ollama
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn ping(&self) -> Result<(), BackendError> {
        if !self.ping_delay.is_zero() {
            tokio::time::sleep(self.ping_delay).await;
        }
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Http("connection refused".into()))
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.models.lock().unwrap().clone())
    }

    async fn pull_model(&self, model: &str, timeout: Duration) -> Result<(), BackendError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.pull_timeouts.lock().unwrap().push(timeout);
        if self.pullable {
            self.models.lock().unwrap().push(format!("{model}:latest"));
            Ok(())
        } else {
            Err(BackendError::Pull(format!("{model} not found upstream")))
        }
    }

    async fn chat(
        &self,
        _model: &str,
        history: &[ChatTurn],
        _options: &DecodingOptions,
    ) -> Result<String, BackendError> {
        if history.last().is_some_and(|t| t.content == PROFILE_ACK_PROMPT) {
            return if self.profile_fails.load(Ordering::SeqCst) {
                Err(BackendError::Timeout)
            } else {
                Ok("OKIDOKI".to_string())
            };
        }
        self.chats.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(history.to_vec());
        let scripted = self.replies.lock().unwrap().pop_front();
        match scripted {
            Some(reply) => reply,
            None => Ok(self.fallback.lock().unwrap().clone()),
        }
    }

    async fn generate(
        &self,
        model: &str,
        _prompt: &str,
        options: &DecodingOptions,
    ) -> Result<String, BackendError> {
        assert_eq!(options.temperature, 0.0, "sanity probe must be deterministic");
        Ok(self
            .sanity
            .lock()
            .unwrap()
            .get(model)
            .cloned()
            .unwrap_or_else(|| "4".to_string()))
    }
}

/// Connector resolving URLs to pre-built fakes.
#[derive(Default)]
pub struct FakeConnector {
    backends: HashMap<String, Arc<FakeBackend>>,
}

impl FakeConnector {
    pub fn new(backends: &[Arc<FakeBackend>]) -> Self {
        Self {
            backends: backends
                .iter()
                .map(|b| (b.endpoint().url.clone(), Arc::clone(b)))
                .collect(),
        }
    }
}

impl BackendConnector for FakeConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn InferenceBackend>, BackendError> {
        match self.backends.get(&endpoint.url) {
            Some(backend) => Ok(Arc::clone(backend) as Arc<dyn InferenceBackend>),
            None => Err(BackendError::Http(format!("no route to {}", endpoint.url))),
        }
    }
}

/// Gateway with a fixed catalog that echoes a canned output.
pub struct FakeGateway {
    tools: Vec<String>,
    output: String,
    /// Calls still to fail with a timeout before answering.
    failures: AtomicUsize,
    pub attempts: AtomicUsize,
    pub calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl FakeGateway {
    pub fn new(tools: &[&str], output: &str) -> Self {
        Self {
            tools: tools.iter().map(|t| t.to_string()).collect(),
            output: output.to_string(),
            failures: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Time out the first `n` calls.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ToolGateway for FakeGateway {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError> {
        Ok(self
            .tools
            .iter()
            .map(|name| ToolDescriptor {
                name: name.clone(),
                description: format!("{name} tool"),
                input_schema: json!({"type": "object"}),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        _timeout: Duration,
    ) -> Result<ToolCallOutput, GatewayError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(GatewayError::Timeout);
        }
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        Ok(ToolCallOutput::success(self.output.clone()))
    }
}
