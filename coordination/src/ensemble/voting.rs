//! Resolution of an ensemble round into one answer.
//!
//! 1. Take the largest confident group (ties: smallest text).
//! 2. Exactly one supporter: pick the single confident reply with the
//!    highest probability across every confident group (ties: smallest
//!    identity), whatever the quorum.
//! 3. Otherwise the group wins when its size reaches the quorum, and the
//!    resolution is empty when it does not.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::response::EnsembleResponse;

/// Which rule produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRule {
    Quorum,
    HighestProbability,
    NoConsensus,
}

impl fmt::Display for ResolutionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quorum => write!(f, "quorum"),
            Self::HighestProbability => write!(f, "highest_probability"),
            Self::NoConsensus => write!(f, "no_consensus"),
        }
    }
}

/// Outcome of resolving an [`EnsembleResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub answer: Option<String>,
    pub supporters: BTreeSet<String>,
    pub rule: ResolutionRule,
}

impl Resolution {
    pub fn none() -> Self {
        Self {
            answer: None,
            supporters: BTreeSet::new(),
            rule: ResolutionRule::NoConsensus,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.answer.is_none()
    }
}

/// Resolve `ensemble` against `quorum`. Pure: the same input always yields
/// the same resolution.
pub fn resolve(ensemble: &EnsembleResponse, quorum: usize) -> Resolution {
    let mut largest: Option<(&String, &BTreeSet<String>)> = None;
    for (text, ids) in &ensemble.confident {
        if largest.map_or(true, |(_, best)| ids.len() > best.len()) {
            largest = Some((text, ids));
        }
    }
    let Some((text, supporters)) = largest else {
        return Resolution::none();
    };

    if supporters.len() == 1 {
        return highest_probability(ensemble);
    }
    if supporters.len() >= quorum {
        debug!(answer = %text, supporters = supporters.len(), quorum, "Quorum reached");
        return Resolution {
            answer: Some(text.clone()),
            supporters: supporters.clone(),
            rule: ResolutionRule::Quorum,
        };
    }
    debug!(best = supporters.len(), quorum, "Quorum not reached");
    Resolution::none()
}

fn highest_probability(ensemble: &EnsembleResponse) -> Resolution {
    let best = ensemble
        .confident_replies()
        .min_by(|(id_a, a), (id_b, b)| {
            b.probability
                .cmp(&a.probability)
                .then_with(|| id_a.cmp(id_b))
        });
    match best {
        Some((identity, reply)) => Resolution {
            answer: Some(reply.response.clone()),
            supporters: ensemble
                .confident
                .get(&reply.response)
                .cloned()
                .unwrap_or_else(|| BTreeSet::from([identity.to_string()])),
            rule: ResolutionRule::HighestProbability,
        },
        None => Resolution::none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::QuestionResponse;

    fn ensemble(entries: &[(&str, &str, u8)]) -> EnsembleResponse {
        let mut e = EnsembleResponse::new();
        for (id, text, p) in entries {
            e.record(*id, QuestionResponse::new(*text, *p, "", ""), 55);
        }
        e
    }

    #[test]
    fn test_quorum_win() {
        let e = ensemble(&[("s1", "Yes", 80), ("s2", "Yes", 90), ("s3", "Yes", 20)]);
        let r = resolve(&e, 2);
        assert_eq!(r.answer.as_deref(), Some("Yes"));
        assert_eq!(r.rule, ResolutionRule::Quorum);
        assert_eq!(r.supporters.len(), 2);
    }

    #[test]
    fn test_quorum_not_reached_is_empty() {
        let e = ensemble(&[("s1", "Yes", 80), ("s2", "Yes", 90)]);
        let r = resolve(&e, 3);
        assert!(r.is_empty());
        assert_eq!(r.rule, ResolutionRule::NoConsensus);
    }

    #[test]
    fn test_single_supporter_fallback_uses_probability() {
        let e = ensemble(&[("s1", "NTT", 95), ("s2", "NTT LIMITED", 60)]);
        let r = resolve(&e, 2);
        assert_eq!(r.answer.as_deref(), Some("NTT"));
        assert_eq!(r.rule, ResolutionRule::HighestProbability);
    }

    #[test]
    fn test_fallback_can_pick_other_text_than_first_group() {
        // "AAA" sorts first, but "ZZZ" carries the highest probability.
        let e = ensemble(&[("s1", "AAA", 60), ("s2", "ZZZ", 99)]);
        assert_eq!(resolve(&e, 1).answer.as_deref(), Some("ZZZ"));
    }

    #[test]
    fn test_fallback_probability_tie_prefers_smallest_identity() {
        let e = ensemble(&[("b", "B", 70), ("a", "A", 70)]);
        let r = resolve(&e, 2);
        assert_eq!(r.answer.as_deref(), Some("A"));
    }

    #[test]
    fn test_group_tie_prefers_smallest_text() {
        let e = ensemble(&[("1", "beta", 90), ("2", "beta", 90), ("3", "alpha", 60), ("4", "alpha", 60)]);
        assert_eq!(resolve(&e, 2).answer.as_deref(), Some("alpha"));
    }

    #[test]
    fn test_no_confident_reply() {
        let e = ensemble(&[("s1", "Yes", 10)]);
        assert!(resolve(&e, 1).is_empty());
        assert!(resolve(&EnsembleResponse::new(), 1).is_empty());
    }
}
