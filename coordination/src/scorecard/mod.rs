//! Scorecard - flat evaluation records and pure aggregation
//!
//! Evaluation asks every session every query and keeps one
//! [`ScoreRecord`] per (model, query). Tallies, accuracy and threshold
//! suggestions are derived from the flat list on demand.

pub mod capacity;
pub mod export;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::session::Session;

pub use capacity::{CapacityConfig, CapacityProbe, CapacityRow};
pub use export::{
    append_capacity, append_tuning, ScorecardError, ScorecardResult, CAPACITY_HEADER,
    TUNING_HEADER,
};

/// One evaluation query with every answer that counts as correct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalQuery {
    pub question: String,
    pub acceptable: Vec<String>,
}

/// Outcome of asking one model one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub model: String,
    pub query_index: usize,
    pub acceptable_answers: Vec<String>,
    pub actual_answer: String,
    pub probability: u8,
}

impl ScoreRecord {
    /// Exact match against any acceptable answer, ignoring surrounding whitespace.
    pub fn is_correct(&self) -> bool {
        let actual = self.actual_answer.trim();
        self.acceptable_answers.iter().any(|a| a.trim() == actual)
    }
}

/// Per-model aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTally {
    pub positives: usize,
    pub negatives: usize,
}

impl ModelTally {
    pub fn total(&self) -> usize {
        self.positives + self.negatives
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreCard {
    records: Vec<ScoreRecord>,
}

impl ScoreCard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: ScoreRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[ScoreRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn for_model<'a>(&'a self, model: &'a str) -> impl Iterator<Item = &'a ScoreRecord> + 'a {
        self.records.iter().filter(move |r| r.model == model)
    }

    pub fn tallies(&self) -> BTreeMap<String, ModelTally> {
        let mut tallies: BTreeMap<String, ModelTally> = BTreeMap::new();
        for record in &self.records {
            let tally = tallies.entry(record.model.clone()).or_default();
            if record.is_correct() {
                tally.positives += 1;
            } else {
                tally.negatives += 1;
            }
        }
        tallies
    }

    /// Fraction of correct answers, `None` when the model has no records.
    pub fn accuracy(&self, model: &str) -> Option<f64> {
        let tally = self.tallies().get(model).copied()?;
        (tally.total() > 0).then(|| tally.positives as f64 / tally.total() as f64)
    }

    /// Smallest threshold in 0..=100 maximising confident-correct minus
    /// confident-incorrect answers.
    pub fn suggest_threshold(&self, model: &str) -> Option<u8> {
        let records: Vec<&ScoreRecord> = self.for_model(model).collect();
        if records.is_empty() {
            return None;
        }
        let mut best: Option<(i64, u8)> = None;
        for threshold in 0..=100u8 {
            let score: i64 = records
                .iter()
                .filter(|r| r.probability >= threshold)
                .map(|r| if r.is_correct() { 1 } else { -1 })
                .sum();
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, threshold));
            }
        }
        best.map(|(_, threshold)| threshold)
    }
}

/// Ask every session every query, in order. Histories are reset to the
/// profile before each query.
pub async fn evaluate(sessions: &mut [Session], queries: &[EvalQuery]) -> ScoreCard {
    let mut card = ScoreCard::new();
    for (query_index, query) in queries.iter().enumerate() {
        for session in sessions.iter_mut() {
            session.reset_history();
            let reply = session.ask_strict_question(&query.question).await;
            debug!(
                model = session.model(),
                query_index,
                answer = %reply.response,
                probability = reply.probability,
                "Evaluation reply"
            );
            card.record(ScoreRecord {
                model: session.model().to_string(),
                query_index,
                acceptable_answers: query.acceptable.clone(),
                actual_answer: reply.response,
                probability: reply.probability,
            });
        }
    }
    info!(records = card.records().len(), "Evaluation complete");
    card
}
