//! Context-capacity probe: how much filler a model tolerates before it
//! stops answering a fixed question correctly.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::session::Session;

const FILLER: &[&str] = &[
    "The", "archive", "lists", "many", "unrelated", "facts", "about", "rivers,", "harbours,",
    "markets", "and", "old", "roads.",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityConfig {
    pub question: String,
    pub expected: String,
    /// Number of growing-context steps.
    pub steps: usize,
    /// Filler words added per step.
    pub words_per_step: usize,
    /// Stop once this many wrong answers were seen.
    pub max_errors: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            question: "What is 2 + 2? Answer with a single digit.".to_string(),
            expected: "4".to_string(),
            steps: 10,
            words_per_step: 200,
            max_errors: 1,
        }
    }
}

/// One step of a capacity run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityRow {
    pub model: String,
    pub expected: String,
    pub actual: String,
    pub context_wordcount: usize,
    pub context_charcount: usize,
    /// Wrong answers so far, this step included.
    pub errorcount: usize,
}

/// Deterministic filler text of `words` words.
pub fn filler_text(words: usize) -> String {
    FILLER
        .iter()
        .cycle()
        .take(words)
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct CapacityProbe {
    config: CapacityConfig,
}

impl CapacityProbe {
    pub fn new(config: CapacityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CapacityConfig {
        &self.config
    }

    /// Run the probe on `session`; each step starts from the profile.
    pub async fn run(&self, session: &mut Session) -> Vec<CapacityRow> {
        let mut rows = Vec::new();
        let mut errors = 0;

        for step in 1..=self.config.steps {
            session.reset_history();
            let filler = filler_text(step * self.config.words_per_step);
            let question = format!("{filler}\n\n{}", self.config.question);
            let reply = session.ask_strict_question(&question).await;

            let correct = reply.response.trim() == self.config.expected.trim();
            if !correct {
                errors += 1;
            }
            let row = CapacityRow {
                model: session.model().to_string(),
                expected: self.config.expected.clone(),
                actual: reply.response,
                context_wordcount: session.word_count(),
                context_charcount: session.char_count(),
                errorcount: errors,
            };
            info!(
                model = %row.model,
                step,
                words = row.context_wordcount,
                correct,
                "Capacity step"
            );
            rows.push(row);

            if errors >= self.config.max_errors.max(1) {
                warn!(model = session.model(), step, errors, "Capacity limit reached");
                break;
            }
        }
        rows
    }
}
