//! Per-tool authorization.
//!
//! Precedence is strict: deny-list, then blind trust, then allow-list,
//! then the interactive operator.

use std::collections::HashSet;

use async_trait::async_trait;

use super::call_parser::ToolCallRequest;

/// What the static policy says about a tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// On the deny-list; skipped without prompting.
    Blocked,
    /// Blind-trust mode.
    Trusted,
    /// On the allow-list.
    Allowed,
    /// No static decision; the operator must confirm.
    AskOperator,
}

#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    pub blind_trust: bool,
    pub allow: HashSet<String>,
    pub deny: HashSet<String>,
}

impl ToolPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blind_trust(mut self, blind_trust: bool) -> Self {
        self.blind_trust = blind_trust;
        self
    }

    pub fn allow(mut self, name: impl Into<String>) -> Self {
        self.allow.insert(name.into());
        self
    }

    pub fn deny(mut self, name: impl Into<String>) -> Self {
        self.deny.insert(name.into());
        self
    }

    pub fn evaluate(&self, name: &str) -> Authorization {
        if self.deny.contains(name) {
            Authorization::Blocked
        } else if self.blind_trust {
            Authorization::Trusted
        } else if self.allow.contains(name) {
            Authorization::Allowed
        } else {
            Authorization::AskOperator
        }
    }

    /// Resolve the static decision, consulting `operator` only when needed.
    pub async fn authorize(&self, operator: &dyn OperatorPrompt, request: &ToolCallRequest) -> bool {
        match self.evaluate(&request.name) {
            Authorization::Blocked => false,
            Authorization::Trusted | Authorization::Allowed => true,
            Authorization::AskOperator => operator.confirm(request).await,
        }
    }
}

/// Interactive confirmation of a tool call.
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    async fn confirm(&self, request: &ToolCallRequest) -> bool;
}

/// Non-interactive operator: declines everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllOperator;

#[async_trait]
impl OperatorPrompt for DenyAllOperator {
    async fn confirm(&self, _request: &ToolCallRequest) -> bool {
        false
    }
}
