//! Consensus rounds over scripted sessions.

mod support;

use std::sync::Arc;
use std::time::Duration;

use coordination::backend::DecodingOptions;
use coordination::ensemble::{ConsensusEngine, EnsembleConfig, ResolutionRule};
use coordination::resilience::RetryPolicy;
use coordination::session::{Session, SessionSettings, JSONERROR};
use support::{contract_reply, FakeBackend};

fn session(backend: &Arc<FakeBackend>, model: &str) -> Session {
    Session::new(
        backend.clone(),
        model,
        DecodingOptions::default(),
        SessionSettings {
            attempt_policy: RetryPolicy::new(2, Duration::ZERO),
            profile_policy: RetryPolicy::once(),
            ..SessionSettings::default()
        },
    )
}

fn scripted(url: &str, replies: &[(&str, u8)]) -> Arc<FakeBackend> {
    FakeBackend::new(url)
        .with_replies(
            replies
                .iter()
                .map(|(text, p)| contract_reply(text, *p))
                .collect(),
        )
        .shared()
}

async fn engine(config: EnsembleConfig, members: &[&Arc<FakeBackend>]) -> ConsensusEngine {
    let mut engine = ConsensusEngine::new(config);
    for backend in members {
        assert!(engine.add_session(session(backend, "llama3"), 55));
    }
    assert_eq!(engine.profile_all("Answer briefly.").await, members.len());
    engine
}

const SINGLE_ROUND: EnsembleConfig = EnsembleConfig {
    quorum: 2,
    refine: false,
};

#[tokio::test]
async fn test_quorum_of_confident_replies_wins() {
    let s1 = scripted("http://10.0.0.1:11434", &[("Yes", 80)]);
    let s2 = scripted("http://10.0.0.2:11434", &[("Yes", 90)]);
    let s3 = scripted("http://10.0.0.3:11434", &[("Yes", 20)]);
    let mut engine = engine(SINGLE_ROUND, &[&s1, &s2, &s3]).await;

    let outcome = engine.ask_and_resolve("Is the sky blue?").await;
    let round = &outcome.first_round;
    assert_eq!(round.len(), 3);
    assert_eq!(round.unique["Yes"].len(), 3);
    assert_eq!(round.confident.len(), 1);
    assert_eq!(round.confident["Yes"].len(), 2);
    assert!(!round.confident["Yes"].contains("llama3::http://10.0.0.3:11434"));

    assert_eq!(outcome.resolution.answer.as_deref(), Some("Yes"));
    assert_eq!(outcome.resolution.rule, ResolutionRule::Quorum);
    assert!(outcome.second_round.is_none());
}

#[tokio::test]
async fn test_single_supporters_fall_back_to_highest_probability() {
    let s1 = scripted("http://10.0.0.1:11434", &[("NTT", 95)]);
    let s2 = scripted("http://10.0.0.2:11434", &[("NTT LIMITED", 60)]);
    let mut engine = engine(SINGLE_ROUND, &[&s1, &s2]).await;

    let outcome = engine.ask_and_resolve("Who owns the building?").await;
    assert_eq!(outcome.resolution.answer.as_deref(), Some("NTT"));
    assert_eq!(outcome.resolution.rule, ResolutionRule::HighestProbability);
    assert_eq!(
        outcome.resolution.supporters.iter().collect::<Vec<_>>(),
        vec!["llama3::http://10.0.0.1:11434"]
    );
}

#[tokio::test]
async fn test_no_confident_reply_yields_no_answer() {
    let s1 = scripted("http://10.0.0.1:11434", &[("Maybe", 10)]);
    let s2 = FakeBackend::new("http://10.0.0.2:11434")
        .with_fallback("garbage".to_string())
        .shared();
    let mut engine = engine(EnsembleConfig::default(), &[&s1, &s2]).await;

    let outcome = engine.ask_and_resolve("?").await;
    assert!(outcome.resolution.is_empty());
    assert_eq!(outcome.resolution.rule, ResolutionRule::NoConsensus);
    assert_eq!(
        outcome.first_round.replies["llama3::http://10.0.0.2:11434"].response,
        JSONERROR
    );
    // Nothing confident, nothing to refine with.
    assert!(outcome.second_round.is_none());
    assert_eq!(s1.chat_count(), 1);
}

#[tokio::test]
async fn test_refinement_round_supersedes_first_round() {
    let s1 = scripted("http://10.0.0.1:11434", &[("Lyon", 70), ("Paris", 90)]);
    let s2 = scripted("http://10.0.0.2:11434", &[("Paris", 80), ("Paris", 85)]);
    let s3 = scripted("http://10.0.0.3:11434", &[("Marseille", 60), ("Marseille", 40)]);
    let mut engine = engine(EnsembleConfig::default(), &[&s1, &s2, &s3]).await;

    let outcome = engine.ask_and_resolve("Capital of France?").await;
    let second = outcome.second_round.as_ref().expect("refinement should run");
    assert_eq!(second.confident["Paris"].len(), 2);
    assert!(std::ptr::eq(outcome.deciding_round(), second));
    assert_eq!(outcome.resolution.answer.as_deref(), Some("Paris"));
    assert_eq!(outcome.resolution.rule, ResolutionRule::Quorum);

    // Round two carries round one's confident answers as evidence.
    let refined = &s3.questions()[1];
    assert!(refined.starts_with("Capital of France?"));
    assert!(refined.contains("\"Lyon\" (given by 1 assistant(s))"));
    assert!(refined.contains("\"Paris\" (given by 1 assistant(s))"));
    assert!(refined.contains("\"Marseille\" (given by 1 assistant(s))"));
}

#[tokio::test]
async fn test_duplicate_identity_is_ignored() {
    let node = scripted("http://10.0.0.1:11434", &[("Yes", 90)]);
    let mut engine = ConsensusEngine::new(SINGLE_ROUND);

    assert!(engine.add_session(session(&node, "llama3"), 55));
    assert!(!engine.add_session(session(&node, "llama3"), 55));
    assert!(engine.add_session(session(&node, "mistral"), 55));
    assert_eq!(
        engine.identities(),
        vec![
            "llama3::http://10.0.0.1:11434".to_string(),
            "mistral::http://10.0.0.1:11434".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_per_member_threshold_applies() {
    let strict = scripted("http://10.0.0.1:11434", &[("Yes", 70)]);
    let lenient = scripted("http://10.0.0.2:11434", &[("Yes", 70)]);
    let mut engine = ConsensusEngine::new(SINGLE_ROUND);
    engine.add_session(session(&strict, "llama3"), 90);
    engine.add_session(session(&lenient, "llama3"), 50);
    engine.profile_all("p").await;

    let round = engine.ask_chat_question("?").await;
    assert_eq!(round.unique["Yes"].len(), 2);
    assert_eq!(
        round.confident["Yes"].iter().collect::<Vec<_>>(),
        vec!["llama3::http://10.0.0.2:11434"]
    );
}

#[tokio::test]
async fn test_reset_all_returns_members_to_profile() {
    let node = scripted("http://10.0.0.1:11434", &[("Yes", 90)]);
    let mut engine = engine(SINGLE_ROUND, &[&node]).await;
    engine.ask_chat_question("?").await;
    assert!(engine.sessions().all(|s| s.history().len() == 3));

    engine.reset_all();
    assert!(engine.sessions().all(|s| s.history().len() == 1));
}
