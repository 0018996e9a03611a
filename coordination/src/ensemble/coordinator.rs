//! Consensus engine - asks every member session and resolves the replies

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::response::EnsembleResponse;
use super::voting::{resolve, Resolution};
use crate::session::{Session, SessionState};

/// Configuration for the consensus engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Minimum supporters for a multi-supporter group to win.
    pub quorum: usize,
    /// Run a second round with the first round's confident replies as evidence.
    pub refine: bool,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            quorum: 2,
            refine: true,
        }
    }
}

/// Everything one consensus question produced.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    pub first_round: EnsembleResponse,
    /// Present when refinement ran; supersedes the first round.
    pub second_round: Option<EnsembleResponse>,
    pub resolution: Resolution,
}

impl ConsensusOutcome {
    /// The round the resolution was computed from.
    pub fn deciding_round(&self) -> &EnsembleResponse {
        self.second_round.as_ref().unwrap_or(&self.first_round)
    }
}

struct Member {
    session: Session,
    threshold: u8,
}

/// Sessions queried together, one at a time, in registration order.
pub struct ConsensusEngine {
    members: Vec<Member>,
    identities: BTreeSet<String>,
    config: EnsembleConfig,
}

impl ConsensusEngine {
    pub fn new(config: EnsembleConfig) -> Self {
        Self {
            members: Vec::new(),
            identities: BTreeSet::new(),
            config,
        }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Register a session under its `model::instance` identity. Returns
    /// `false` (and drops the session) when the identity is already present.
    pub fn add_session(&mut self, session: Session, threshold: u8) -> bool {
        let identity = session.identity();
        if !self.identities.insert(identity.clone()) {
            debug!(identity = %identity, "Duplicate session ignored");
            return false;
        }
        self.members.push(Member {
            session,
            threshold: threshold.min(100),
        });
        true
    }

    /// Member identities in registration order.
    pub fn identities(&self) -> Vec<String> {
        self.members.iter().map(|m| m.session.identity()).collect()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.members.iter().map(|m| &m.session)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Set the same profile on every member; returns how many accepted it.
    pub async fn profile_all(&mut self, statement: &str) -> usize {
        let mut profiled = 0;
        for member in &mut self.members {
            if member.session.set_profile(statement).await != SessionState::Abandoned {
                profiled += 1;
            }
        }
        info!(profiled, members = self.members.len(), "Profiles set");
        profiled
    }

    /// Clear every member's history down to its profile.
    pub fn reset_all(&mut self) {
        for member in &mut self.members {
            member.session.reset_history();
        }
    }

    /// Ask every member sequentially and group the replies.
    pub async fn ask_chat_question(&mut self, question: &str) -> EnsembleResponse {
        let mut ensemble = EnsembleResponse::new();
        for member in &mut self.members {
            let reply = member.session.ask_strict_question(question).await;
            let identity = member.session.identity();
            debug!(
                identity = %identity,
                response = %reply.response,
                probability = reply.probability,
                "Member replied"
            );
            ensemble.record(identity, reply, member.threshold);
        }
        ensemble
    }

    /// Ask, resolve, and refine once when the first round had any
    /// confident reply and refinement is enabled.
    pub async fn ask_and_resolve(&mut self, question: &str) -> ConsensusOutcome {
        let first_round = self.ask_chat_question(question).await;

        let second_round = if self.config.refine && first_round.has_confident() {
            let refined = evidence_prompt(question, &first_round);
            Some(self.ask_chat_question(&refined).await)
        } else {
            None
        };

        let deciding = second_round.as_ref().unwrap_or(&first_round);
        let resolution = resolve(deciding, self.config.quorum);
        info!(
            answer = resolution.answer.as_deref().unwrap_or("-"),
            rule = %resolution.rule,
            supporters = resolution.supporters.len(),
            refined = second_round.is_some(),
            "Consensus resolved"
        );

        ConsensusOutcome {
            first_round,
            second_round,
            resolution,
        }
    }
}

/// The question again, followed by the confident replies of a prior round.
pub fn evidence_prompt(question: &str, round: &EnsembleResponse) -> String {
    let mut prompt = format!(
        "{question}\n\nOther assistants already answered this question. \
         Consider their answers as evidence, then give your own final answer:"
    );
    for (text, supporters) in &round.confident {
        let motivation = round
            .confident_replies()
            .filter(|(_, reply)| &reply.response == text)
            .max_by_key(|(_, reply)| reply.probability)
            .map(|(_, reply)| reply.motivation.as_str())
            .unwrap_or_default();
        prompt.push_str(&format!(
            "\n- \"{text}\" (given by {} assistant(s)){}",
            supporters.len(),
            if motivation.is_empty() {
                String::new()
            } else {
                format!(": {motivation}")
            }
        ));
    }
    prompt
}
