//! Strict reply contract: wire shape, sentinels, sanity normalization.

use serde::{Deserialize, Serialize};

/// Reply could not be recovered into the contract shape.
pub const JSONERROR: &str = "JSONERROR";
/// Hide-uncertain mode masked a reply below the model's threshold.
pub const LOWPROBA: &str = "LOWPROBA";
/// The model declared it did not understand the question.
pub const FAILTOUNDERSTAND: &str = "FAILTOUNDERSTAND";
/// Acknowledgement literal used when setting a profile.
pub const OKIDOKI: &str = "OKIDOKI";
/// The model wants the listed tools run before answering.
pub const TOOLCALL: &str = "TOOLCALL";
/// As [`TOOLCALL`], with a pause before the re-ask.
pub const TOOLCALL_AFTER_PAUSE: &str = "TOOLCALL_AFTER_PAUSE";

/// Appended to every strict question.
pub const CONTRACT_SUFFIX: &str = concat!(
    "\n\nReply with exactly one line of JSON and nothing else, with these fields: ",
    r#"{"response": "<short answer>", "probability": <integer 0-100, your confidence>, "#,
    r#""motivation": "<why>", "assumptions_made": "<assumptions, or empty>", "#,
    r#""tool_calls": "<tool calls, or empty>"}. "#,
    "If you do not understand the question, set response to FAILTOUNDERSTAND. ",
    "To run tools first, set response to TOOLCALL (or TOOLCALL_AFTER_PAUSE when the tools ",
    r#"need time to settle) and list the calls in tool_calls as mode name(key="value", ...)."#
);

/// Sent after the profile statement; any reply means the profile was received.
pub const PROFILE_ACK_PROMPT: &str = "Acknowledge these instructions by replying OKIDOKI.";

/// One normalized reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResponse {
    pub response: String,
    /// Self-reported confidence, 0–100.
    pub probability: u8,
    pub motivation: String,
    pub assumptions_made: String,
    /// Raw tool-call text, empty when none.
    pub tool_calls: String,
    /// Response text is blank; excluded from grouping.
    pub empty: bool,
}

impl QuestionResponse {
    pub fn new(
        response: impl Into<String>,
        probability: u8,
        motivation: impl Into<String>,
        assumptions_made: impl Into<String>,
    ) -> Self {
        let response = response.into();
        Self {
            empty: response.trim().is_empty(),
            response,
            probability: probability.min(100),
            motivation: motivation.into(),
            assumptions_made: assumptions_made.into(),
            tool_calls: String::new(),
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: impl Into<String>) -> Self {
        self.tool_calls = tool_calls.into();
        self
    }

    /// Sentinel reply with probability 0.
    pub fn sentinel(response: &str) -> Self {
        Self::new(response, 0, "", "")
    }

    pub fn json_error() -> Self {
        Self::sentinel(JSONERROR)
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self.response.as_str(), JSONERROR | LOWPROBA | FAILTOUNDERSTAND)
    }

    pub fn is_tool_trigger(&self) -> bool {
        matches!(self.response.as_str(), TOOLCALL | TOOLCALL_AFTER_PAUSE)
    }

    pub fn wants_pause(&self) -> bool {
        self.response == TOOLCALL_AFTER_PAUSE
    }
}

/// Apply sanity normalization to a parse outcome.
///
/// - `None` becomes [`JSONERROR`] with probability 0.
/// - [`FAILTOUNDERSTAND`] forces probability 0.
/// - With `hide_uncertain`, a non-sentinel reply whose probability is below
///   `threshold` gets its response replaced with [`LOWPROBA`]; the other
///   fields are kept.
pub fn sanitize(
    reply: Option<QuestionResponse>,
    hide_uncertain: bool,
    threshold: u8,
) -> QuestionResponse {
    let mut reply = reply.unwrap_or_else(QuestionResponse::json_error);

    if reply.response == FAILTOUNDERSTAND {
        reply.probability = 0;
    }
    if hide_uncertain && !reply.is_sentinel() && reply.probability < threshold {
        reply.response = LOWPROBA.to_string();
    }
    reply.empty = reply.response.trim().is_empty();
    reply
}
