//! Consensus-session scenarios and invariant properties.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use serde_json::json;
use slate_core::{
    Blackboard, ConflictItem, ConsensusAlgorithm, ConsensusEngine, Result, SessionConfig,
    SessionStatus, TaskDefinition, VoteOption, VoterType,
};

fn conflict() -> ConflictItem {
    ConflictItem::new(
        "decision_conflict",
        vec!["ethics-1".into(), "legal-1".into()],
        "Disagreement on deployment approval",
    )
}

async fn engine() -> Result<ConsensusEngine> {
    let blackboard = Arc::new(Blackboard::in_memory().await?);
    Ok(ConsensusEngine::new(blackboard))
}

async fn session_with_options(
    engine: &ConsensusEngine,
    algorithm: ConsensusAlgorithm,
    option_names: &[&str],
    participants: &[&str],
    deadline_hours: f64,
    config: Option<SessionConfig>,
) -> Result<(String, Vec<String>)> {
    let options: Vec<VoteOption> = option_names
        .iter()
        .map(|name| VoteOption::new(*name, "candidate resolution", "coordinator"))
        .collect();
    let option_ids = options.iter().map(|o| o.id.clone()).collect();
    let session_id = engine
        .initiate_consensus(
            &conflict(),
            algorithm,
            participants.iter().map(|p| (*p).to_owned()).collect(),
            options,
            deadline_hours,
            config,
        )
        .await?;
    Ok((session_id, option_ids))
}

#[tokio::test]
async fn test_majority_vote_scenario() -> Result<()> {
    let engine = engine().await?;
    let (sid, opts) = session_with_options(
        &engine,
        ConsensusAlgorithm::MajorityVote,
        &["A", "B", "C"],
        &["v1", "v2", "v3"],
        24.0,
        None,
    )
    .await?;

    engine.cast_vote(&sid, "v1", VoterType::Agent, &opts[0], 1.0, None, None).await?;
    engine.cast_vote(&sid, "v2", VoterType::Agent, &opts[0], 1.0, None, None).await?;
    engine.cast_vote(&sid, "v3", VoterType::Agent, &opts[1], 1.0, None, None).await?;

    let outcome = engine.execute_consensus(&sid).await?;
    assert!(outcome.success);
    assert_eq!(outcome.details["winning_votes"], 2.0);
    assert!((outcome.confidence_score - 0.667).abs() < 0.001);
    Ok(())
}

#[tokio::test]
async fn test_weighted_vote_below_threshold_scenario() -> Result<()> {
    let engine = engine().await?;
    let config = SessionConfig {
        weighted_threshold: 0.7,
        ..SessionConfig::default()
    };
    let (sid, opts) = session_with_options(
        &engine,
        ConsensusAlgorithm::WeightedVote,
        &["A", "B"],
        &["v1", "v2"],
        24.0,
        Some(config),
    )
    .await?;

    // Weighted scores 0.6 on A and 0.4 on B: A wins the count but misses
    // the 0.7 share bar.
    engine.cast_vote(&sid, "v1", VoterType::Agent, &opts[0], 0.6, None, None).await?;
    engine.cast_vote(&sid, "v2", VoterType::Agent, &opts[1], 0.4, None, None).await?;

    let outcome = engine.execute_consensus(&sid).await?;
    assert!(!outcome.success);
    assert_eq!(
        outcome.winning_option.as_ref().map(|o| o.name.as_str()),
        Some("A")
    );
    assert!(outcome.next_steps.contains(&"escalate".to_owned()));
    Ok(())
}

#[tokio::test]
async fn test_deadline_expiry_scenario() -> Result<()> {
    let engine = engine().await?;
    // ~0.36 seconds.
    let (sid, _) = session_with_options(
        &engine,
        ConsensusAlgorithm::MajorityVote,
        &["A"],
        &["v1"],
        0.0001,
        None,
    )
    .await?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    let expired = engine.check_session_deadlines().await?;
    assert!(expired.contains(&sid));

    // Failed, then escalated by the default failure handler.
    let session = engine.get_session(&sid).await.expect("session exists");
    assert_eq!(session.status, SessionStatus::Escalated);
    let result = session.result.expect("result recorded");
    assert!(result
        .reason
        .as_deref()
        .is_some_and(|r| r.contains("Deadline expired")));
    Ok(())
}

#[tokio::test]
async fn test_escalated_sessions_reject_further_votes() -> Result<()> {
    let engine = engine().await?;
    let (sid, opts) = session_with_options(
        &engine,
        ConsensusAlgorithm::MajorityVote,
        &["A"],
        &["v1"],
        24.0,
        None,
    )
    .await?;

    assert!(engine.escalate_session(&sid, "human_review", None).await?);
    assert!(!engine
        .cast_vote(&sid, "v1", VoterType::Agent, &opts[0], 1.0, None, None)
        .await?);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Vote uniqueness: after any cast sequence, the session retains one
    // vote per distinct voter, and it is that voter's latest.
    #[test]
    fn prop_vote_uniqueness(casts in prop::collection::vec((0..6usize, 0..2usize), 1..30)) {
        let (vote_count, distinct_voters, latest_ok) = tokio_test::block_on(async {
            let engine = engine().await?;
            let (sid, opts) = session_with_options(
                &engine,
                ConsensusAlgorithm::MajorityVote,
                &["A", "B"],
                &["v0", "v1", "v2", "v3", "v4", "v5"],
                24.0,
                None,
            )
            .await?;

            let mut latest: std::collections::HashMap<usize, usize> =
                std::collections::HashMap::new();
            for (voter, option) in &casts {
                let accepted = engine
                    .cast_vote(
                        &sid,
                        &format!("v{voter}"),
                        VoterType::Agent,
                        &opts[*option],
                        0.8,
                        None,
                        None,
                    )
                    .await?;
                assert!(accepted);
                latest.insert(*voter, *option);
            }

            let session = engine.get_session(&sid).await.expect("session exists");
            let latest_ok = session.votes.iter().all(|vote| {
                let voter: usize = vote.voter_id[1..].parse().unwrap_or(usize::MAX);
                latest.get(&voter).map(|o| opts[*o] == vote.option_id).unwrap_or(false)
            });
            Ok::<_, slate_core::Error>((session.votes.len(), latest.len(), latest_ok))
        })
        .map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(vote_count, distinct_voters);
        prop_assert!(latest_ok);
    }

    // Priority order: available tasks always come back in non-decreasing
    // priority, regardless of insertion order.
    #[test]
    fn prop_available_tasks_priority_order(priorities in prop::collection::vec(1..=5i32, 1..20)) {
        let ordered = tokio_test::block_on(async {
            let blackboard = Blackboard::in_memory().await?;
            for priority in &priorities {
                let task = TaskDefinition::new("ethical_analysis", json!({}), json!({}))
                    .with_priority(*priority);
                blackboard.create_task(&task).await?;
            }
            let available = blackboard.get_available_tasks(None, priorities.len()).await?;
            Ok::<_, slate_core::Error>(
                available.windows(2).all(|pair| pair[0].priority <= pair[1].priority),
            )
        })
        .map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert!(ordered);
    }
}
