//! Aggregated replies of one ensemble round.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::session::QuestionResponse;

/// Response text → supporting identities.
pub type ReplyGroups = BTreeMap<String, BTreeSet<String>>;

/// Replies collected from every member session, grouped by exact text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsembleResponse {
    /// Full reply per identity.
    pub replies: BTreeMap<String, QuestionResponse>,
    /// Every non-empty response text.
    pub unique: ReplyGroups,
    /// Texts whose supporters met their own session's threshold.
    pub confident: ReplyGroups,
}

impl EnsembleResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one member's reply. An identity already present keeps its
    /// first reply; returns whether anything was recorded.
    pub fn record(
        &mut self,
        identity: impl Into<String>,
        reply: QuestionResponse,
        threshold: u8,
    ) -> bool {
        let identity = identity.into();
        if self.replies.contains_key(&identity) {
            return false;
        }
        if !reply.empty {
            self.unique
                .entry(reply.response.clone())
                .or_default()
                .insert(identity.clone());
            if reply.probability >= threshold {
                self.confident
                    .entry(reply.response.clone())
                    .or_default()
                    .insert(identity.clone());
            }
        }
        self.replies.insert(identity, reply);
        true
    }

    /// Union with `other`: supporter sets grow, existing replies stay.
    pub fn merge(&mut self, other: &EnsembleResponse) {
        for (identity, reply) in &other.replies {
            self.replies
                .entry(identity.clone())
                .or_insert_with(|| reply.clone());
        }
        union_groups(&mut self.unique, &other.unique);
        union_groups(&mut self.confident, &other.confident);
    }

    pub fn merged(mut self, other: &EnsembleResponse) -> Self {
        self.merge(other);
        self
    }

    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    pub fn has_confident(&self) -> bool {
        !self.confident.is_empty()
    }

    /// `(identity, reply)` for every reply counted in `confident`.
    pub fn confident_replies(&self) -> impl Iterator<Item = (&str, &QuestionResponse)> {
        self.replies.iter().filter_map(|(identity, reply)| {
            self.confident
                .get(&reply.response)
                .is_some_and(|ids| ids.contains(identity))
                .then_some((identity.as_str(), reply))
        })
    }
}

fn union_groups(into: &mut ReplyGroups, from: &ReplyGroups) {
    for (text, ids) in from {
        into.entry(text.clone())
            .or_default()
            .extend(ids.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(text: &str, probability: u8) -> QuestionResponse {
        QuestionResponse::new(text, probability, "", "")
    }

    #[test]
    fn test_record_groups_by_exact_text() {
        let mut e = EnsembleResponse::new();
        e.record("a::1", reply("Yes", 80), 55);
        e.record("b::1", reply("yes", 90), 55);
        e.record("c::1", reply("Yes", 20), 55);

        assert_eq!(e.unique["Yes"].len(), 2);
        assert_eq!(e.unique["yes"].len(), 1);
        assert_eq!(e.confident["Yes"], BTreeSet::from(["a::1".to_string()]));
    }

    #[test]
    fn test_below_threshold_is_unique_but_not_confident() {
        let mut e = EnsembleResponse::new();
        e.record("a::1", reply("Maybe", 54), 55);
        assert!(e.unique.contains_key("Maybe"));
        assert!(!e.confident.contains_key("Maybe"));
    }

    #[test]
    fn test_empty_reply_not_grouped() {
        let mut e = EnsembleResponse::new();
        e.record("a::1", reply("  ", 99), 55);
        assert_eq!(e.len(), 1);
        assert!(e.unique.is_empty());
    }

    #[test]
    fn test_json_error_participates_in_grouping() {
        let mut e = EnsembleResponse::new();
        e.record("a::1", QuestionResponse::json_error(), 55);
        assert!(e.unique.contains_key(crate::session::JSONERROR));
        assert!(e.confident.is_empty());
    }

    #[test]
    fn test_duplicate_identity_keeps_first() {
        let mut e = EnsembleResponse::new();
        assert!(e.record("a::1", reply("Yes", 80), 55));
        assert!(!e.record("a::1", reply("No", 80), 55));
        assert_eq!(e.replies["a::1"].response, "Yes");
        assert!(!e.unique.contains_key("No"));
    }

    #[test]
    fn test_merge_unions_without_overwriting() {
        let mut a = EnsembleResponse::new();
        a.record("x::1", reply("Yes", 80), 55);
        let mut b = EnsembleResponse::new();
        b.record("x::1", reply("No", 80), 55);
        b.record("y::1", reply("Yes", 70), 55);

        a.merge(&b);
        assert_eq!(a.replies["x::1"].response, "Yes");
        assert_eq!(a.unique["Yes"].len(), 2);
        assert!(a.unique.contains_key("No"));
        assert_eq!(a.confident["Yes"].len(), 2);
    }

    #[test]
    fn test_confident_replies_iterator() {
        let mut e = EnsembleResponse::new();
        e.record("a::1", reply("Yes", 80), 55);
        e.record("b::1", reply("No", 10), 55);
        let ids: Vec<&str> = e.confident_replies().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a::1"]);
    }
}
