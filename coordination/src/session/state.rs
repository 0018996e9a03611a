//! Session lifecycle states and legal transition guards.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one model session.
///
/// Every session starts at `Uninit`. `Abandoned` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No profile statement accepted yet.
    Uninit,
    /// Profile set, no question asked since.
    Profiled,
    /// At least one question asked.
    Ready,
    /// Profile could not be set; every ask yields `JSONERROR`.
    Abandoned,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Abandoned)
    }

    /// Whether questions may be sent to the backend in this state.
    pub fn accepts_questions(self) -> bool {
        matches!(self, Self::Profiled | Self::Ready)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninit => write!(f, "Uninit"),
            Self::Profiled => write!(f, "Profiled"),
            Self::Ready => write!(f, "Ready"),
            Self::Abandoned => write!(f, "Abandoned"),
        }
    }
}

/// ```text
/// Uninit   → Profiled | Abandoned
/// Profiled → Ready | Profiled
/// Ready    → Ready | Profiled
/// ```
///
/// `Profiled → Profiled` and `Ready → Profiled` are history resets.
fn is_legal_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;

    matches!(
        (from, to),
        (Uninit, Profiled)
            | (Uninit, Abandoned)
            | (Profiled, Ready)
            | (Profiled, Profiled)
            | (Ready, Ready)
            | (Ready, Profiled)
    )
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal session transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Current state plus a transition log.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    current: SessionState,
    transitions: Vec<(SessionState, SessionState)>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            current: SessionState::Uninit,
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> SessionState {
        self.current
    }

    pub fn advance(&mut self, to: SessionState) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }
        tracing::debug!(from = %self.current, to = %to, "Session transition");
        self.transitions.push((self.current, to));
        self.current = to;
        Ok(())
    }

    pub fn transitions(&self) -> &[(SessionState, SessionState)] {
        &self.transitions
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut lc = Lifecycle::new();
        lc.advance(SessionState::Profiled).unwrap();
        lc.advance(SessionState::Ready).unwrap();
        lc.advance(SessionState::Ready).unwrap();
        lc.advance(SessionState::Profiled).unwrap();
        assert_eq!(lc.current(), SessionState::Profiled);
        assert_eq!(lc.transitions().len(), 4);
    }

    #[test]
    fn test_abandoned_is_terminal() {
        let mut lc = Lifecycle::new();
        lc.advance(SessionState::Abandoned).unwrap();
        assert!(lc.current().is_terminal());
        for to in [
            SessionState::Uninit,
            SessionState::Profiled,
            SessionState::Ready,
            SessionState::Abandoned,
        ] {
            assert!(lc.advance(to).is_err());
        }
    }

    #[test]
    fn test_cannot_skip_profile() {
        let mut lc = Lifecycle::new();
        let err = lc.advance(SessionState::Ready).unwrap_err();
        assert_eq!(err.from, SessionState::Uninit);
        assert_eq!(err.to, SessionState::Ready);
        assert!(err.to_string().contains("Uninit"));
    }

    #[test]
    fn test_only_profiled_and_ready_accept_questions() {
        assert!(!SessionState::Uninit.accepts_questions());
        assert!(SessionState::Profiled.accepts_questions());
        assert!(SessionState::Ready.accepts_questions());
        assert!(!SessionState::Abandoned.accepts_questions());
    }
}
