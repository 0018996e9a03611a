//! Session State Machine
//!
//! One stateful conversation bound to a single (model, endpoint) pair.
//!
//! ```text
//! Uninit ──set_profile ok──▶ Profiled ──ask──▶ Ready ◀─┐
//!    │                          ▲                │      │ ask / tool rounds
//!    │                          └─reset_history──┘──────┘
//!    └──set_profile exhausted──▶ Abandoned (every ask → JSONERROR)
//! ```
//!
//! Asks never fail towards the caller: transport errors are retried and
//! then turned into the `JSONERROR` sentinel.

pub mod contract;
pub mod repair;
pub mod state;
pub mod tool_round;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::{BackendError, ChatTurn, DecodingOptions, InferenceBackend, Role};
use crate::registry::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::resilience::RetryPolicy;
use crate::tools::parse_tool_calls;

pub use contract::{
    sanitize, QuestionResponse, CONTRACT_SUFFIX, FAILTOUNDERSTAND, JSONERROR, LOWPROBA, OKIDOKI,
    TOOLCALL, TOOLCALL_AFTER_PAUSE,
};
pub use repair::{decode_reply, parse_reply, repair_reply};
pub use state::{IllegalTransition, Lifecycle, SessionState};
pub use tool_round::{collapse_whitespace, ToolRuntime};

/// Knobs for one session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Attempts per strict question (transport errors and unrecoverable replies).
    pub attempt_policy: RetryPolicy,
    /// Attempts to get the profile statement acknowledged.
    pub profile_policy: RetryPolicy,
    /// Mask replies below `confidence_threshold` with `LOWPROBA`.
    pub hide_uncertain: bool,
    pub confidence_threshold: u8,
    /// Tool rounds stop once the conversation exceeds this many words.
    pub word_cap: usize,
    /// Maximum nested tool rounds per question.
    pub max_tool_depth: u32,
    /// Sleep before the re-ask after `TOOLCALL_AFTER_PAUSE`.
    pub tool_pause: Duration,
    pub tool_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            attempt_policy: RetryPolicy::new(3, Duration::from_secs(1)),
            profile_policy: RetryPolicy::new(3, Duration::from_millis(500)),
            hide_uncertain: false,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            word_cap: 3000,
            max_tool_depth: 3,
            tool_pause: Duration::from_secs(10),
            tool_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum AskError {
    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("unrecoverable reply ({chars} chars)")]
    Unrecoverable { chars: usize },
}

/// Conversation with one model on one endpoint.
pub struct Session {
    backend: Arc<dyn InferenceBackend>,
    model: String,
    instance: String,
    options: DecodingOptions,
    history: Vec<ChatTurn>,
    interactions: u64,
    lifecycle: Lifecycle,
    settings: SessionSettings,
    tools: Option<Arc<ToolRuntime>>,
}

impl Session {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        model: impl Into<String>,
        options: DecodingOptions,
        settings: SessionSettings,
    ) -> Self {
        let instance = backend.endpoint().url.clone();
        Self {
            backend,
            model: model.into(),
            instance,
            options,
            history: Vec::new(),
            interactions: 0,
            lifecycle: Lifecycle::new(),
            settings,
            tools: None,
        }
    }

    /// Enable tool-call orchestration.
    pub fn with_tools(mut self, tools: Arc<ToolRuntime>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Stable identity `model::instance`.
    pub fn identity(&self) -> String {
        format!("{}::{}", self.model, self.instance)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.current()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn options(&self) -> &DecodingOptions {
        &self.options
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    /// Number of questions sent, tool re-asks included.
    pub fn interactions(&self) -> u64 {
        self.interactions
    }

    pub fn word_count(&self) -> usize {
        self.history.iter().map(ChatTurn::word_count).sum()
    }

    pub fn char_count(&self) -> usize {
        self.history.iter().map(ChatTurn::char_count).sum()
    }

    fn transition(&mut self, to: SessionState) {
        if let Err(e) = self.lifecycle.advance(to) {
            warn!(session = %self.identity(), error = %e, "Transition refused");
        }
    }

    /// Install the system statement. On exhaustion a fresh session is
    /// abandoned; an already profiled session keeps its previous profile.
    pub async fn set_profile(&mut self, statement: &str) -> SessionState {
        if self.state().is_terminal() {
            return self.state();
        }

        let turns = [
            ChatTurn::system(statement),
            ChatTurn::user(contract::PROFILE_ACK_PROMPT),
        ];
        let backend = &self.backend;
        let model = self.model.as_str();
        let options = &self.options;
        let probe = &turns;
        let outcome = self
            .settings
            .profile_policy
            .run("set_profile", move |_| backend.chat(model, probe, options))
            .await;

        match outcome {
            Ok(ack) => {
                debug!(session = %self.identity(), ack = %ack.trim(), "Profile acknowledged");
                self.history = vec![ChatTurn::system(statement)];
                self.transition(SessionState::Profiled);
            }
            Err(e) => {
                warn!(session = %self.identity(), error = %e, "Profile could not be set");
                if self.state() == SessionState::Uninit {
                    self.transition(SessionState::Abandoned);
                }
            }
        }
        self.state()
    }

    /// Drop every turn after the profile statement.
    pub fn reset_history(&mut self) {
        let keep = usize::from(matches!(self.history.first(), Some(t) if t.role == Role::System));
        self.history.truncate(keep);
        if self.state() == SessionState::Ready {
            self.transition(SessionState::Profiled);
        }
    }

    /// Ask with the session's own decoding options.
    pub async fn ask_strict_question(&mut self, question: &str) -> QuestionResponse {
        let options = self.options;
        self.ask_strict_question_with(question, &options).await
    }

    /// Ask under the reply contract, running tool rounds when enabled.
    ///
    /// Tool rounds stop, returning the last reply as is, when the depth
    /// limit or the word cap is reached, when a requested tool is not in the
    /// catalog, or when no authorized tool produced output.
    pub async fn ask_strict_question_with(
        &mut self,
        question: &str,
        options: &DecodingOptions,
    ) -> QuestionResponse {
        let mut buffer = question.to_string();
        let mut depth: u32 = 0;

        loop {
            let reply = self.exchange(&buffer, options).await;

            let Some(tools) = self.tools.clone() else {
                return self.finish(reply);
            };
            if !reply.is_tool_trigger() {
                return self.finish(reply);
            }
            if depth >= self.settings.max_tool_depth {
                info!(session = %self.identity(), depth, "Tool depth limit reached");
                return self.finish(reply);
            }
            let words = self.word_count();
            if words > self.settings.word_cap {
                info!(
                    session = %self.identity(),
                    words,
                    cap = self.settings.word_cap,
                    "Word cap reached, stopping tool rounds"
                );
                return self.finish(reply);
            }

            let requests = parse_tool_calls(&reply.tool_calls);
            if requests.is_empty() {
                debug!(session = %self.identity(), raw = %reply.tool_calls, "No parseable tool call");
                return self.finish(reply);
            }
            if let Err(unknown) = tools.all_known(&requests).await {
                warn!(session = %self.identity(), tool = %unknown, "Unknown tool, aborting round");
                return self.finish(reply);
            }

            let mut results = Vec::new();
            for request in &requests {
                if !tools.authorize(request).await {
                    debug!(session = %self.identity(), tool = %request.name, "Tool not authorized");
                    continue;
                }
                match tools.invoke(request, self.settings.tool_timeout).await {
                    Ok(text) => results.push(format!("Result of {}: {}", request.name, text)),
                    Err(e) => warn!(tool = %request.name, error = %e, "Tool call failed"),
                }
            }
            if results.is_empty() {
                return self.finish(reply);
            }

            if reply.wants_pause() {
                tokio::time::sleep(self.settings.tool_pause).await;
            }
            buffer = format!("{buffer}\n\n{}", results.join("\n"));
            depth += 1;
        }
    }

    fn finish(&self, reply: QuestionResponse) -> QuestionResponse {
        sanitize(
            Some(reply),
            self.settings.hide_uncertain,
            self.settings.confidence_threshold,
        )
    }

    /// One question/answer exchange with retries.
    async fn exchange(&mut self, question: &str, options: &DecodingOptions) -> QuestionResponse {
        if !self.state().accepts_questions() {
            warn!(session = %self.identity(), state = %self.state(), "Session cannot take questions");
            return QuestionResponse::json_error();
        }

        self.history
            .push(ChatTurn::user(format!("{question}{CONTRACT_SUFFIX}")));
        self.interactions += 1;

        let backend = &self.backend;
        let model = self.model.as_str();
        let history = self.history.as_slice();
        let outcome = self
            .settings
            .attempt_policy
            .run("ask_strict_question", move |_| async move {
                let raw = backend.chat(model, history, options).await?;
                match decode_reply(&raw) {
                    Some(reply) => Ok((raw, reply)),
                    None => Err(AskError::Unrecoverable {
                        chars: raw.chars().count(),
                    }),
                }
            })
            .await;

        match outcome {
            Ok((raw, reply)) => {
                self.history.push(ChatTurn::assistant(raw));
                self.transition(SessionState::Ready);
                sanitize(Some(reply), false, 0)
            }
            Err(e) => {
                warn!(session = %self.identity(), error = %e, "Strict question exhausted");
                // Keep the history alternating.
                self.history.pop();
                QuestionResponse::json_error()
            }
        }
    }
}
