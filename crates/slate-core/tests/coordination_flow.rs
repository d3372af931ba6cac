//! End-to-end coordination scenarios: a full governance workflow over the
//! blackboard with real worker harnesses, conflict resolution through
//! consensus, and contended claiming.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use slate_core::{
    AbsentValidator, Blackboard, ConflictStatus, CoordinationConfig, Coordinator,
    GovernanceRequest, RequestType, Result, Space, TaskDefinition, TaskHandler, VoterType,
    CONSTITUTIONAL_HASH,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Handler returning a fixed payload, standing in for domain analysis.
struct ScriptedHandler {
    payload: Value,
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    async fn handle(&self, _task: &TaskDefinition) -> Result<Value> {
        Ok(self.payload.clone())
    }
}

fn scripted(entries: Vec<(&str, Value)>) -> HashMap<String, Arc<dyn TaskHandler>> {
    entries
        .into_iter()
        .map(|(task_type, payload)| {
            let handler: Arc<dyn TaskHandler> = Arc::new(ScriptedHandler { payload });
            (task_type.to_owned(), handler)
        })
        .collect()
}

#[tokio::test]
async fn test_model_deployment_happy_path() -> Result<()> {
    init_tracing();
    let blackboard = Arc::new(Blackboard::in_memory().await?);
    let coordinator = Coordinator::new(Arc::clone(&blackboard), Arc::new(AbsentValidator));
    coordinator.initialize().await?;

    let worker = slate_core::WorkerAgent::new(
        "governance-worker-1",
        "governance_worker",
        Arc::clone(&blackboard),
        scripted(vec![
            (
                "ethical_analysis",
                json!({"approved": true, "risk_level": "low", "confidence": 0.9}),
            ),
            (
                "legal_compliance",
                json!({"approved": true, "risk_level": "low", "confidence": 0.85}),
            ),
            (
                "operational_validation",
                json!({"approved": true, "risk_level": "low", "confidence": 0.8}),
            ),
        ]),
        CoordinationConfig::default(),
    );
    worker.initialize().await?;

    let request = GovernanceRequest::new(
        RequestType::ModelDeployment,
        "requester-1",
        json!({"model_info": {"name": "classifier-v2"}}),
    );
    let submission = coordinator.process_request(request).await?;
    assert!(submission.success);
    assert_eq!(submission.task_ids.len(), 3);

    // First pass claims the two dependency-free tasks; the second claims
    // operational validation once its dependency completed.
    join_all(worker.claim_pass().await?).await;
    join_all(worker.claim_pass().await?).await;

    let last = submission.task_ids.last().expect("three tasks");
    let result = coordinator
        .handle_task_completed(last)
        .await?
        .expect("all tasks terminal");

    assert!(result.success);
    assert!(result.conflicts.is_empty());
    assert_eq!(result.assessments["deployment_approved"], true);
    assert_eq!(result.constitutional_hash, CONSTITUTIONAL_HASH);
    // Harmonic mean of 0.9, 0.85, 0.8.
    assert!((result.confidence_score - 0.8486).abs() < 0.001);

    // The workers' knowledge emissions are discoverable by tag.
    let emitted = blackboard
        .query_knowledge(Space::Governance, None, Some("governance-worker-1"), None, 100)
        .await?;
    assert_eq!(emitted.len(), 3);
    assert!(emitted.iter().all(|k| k.tags.contains("analysis_complete")));
    Ok(())
}

#[tokio::test]
async fn test_risk_conflict_resolved_through_consensus() -> Result<()> {
    init_tracing();
    let blackboard = Arc::new(Blackboard::in_memory().await?);
    let coordinator = Coordinator::new(Arc::clone(&blackboard), Arc::new(AbsentValidator));
    coordinator.initialize().await?;

    let worker = slate_core::WorkerAgent::new(
        "governance-worker-1",
        "governance_worker",
        Arc::clone(&blackboard),
        scripted(vec![
            ("ethical_analysis", json!({"risk_level": "low", "confidence": 0.9})),
            ("legal_compliance", json!({"risk_level": "low", "confidence": 0.9})),
            ("operational_validation", json!({"risk_level": "critical", "confidence": 0.9})),
        ]),
        CoordinationConfig::default(),
    );
    worker.initialize().await?;

    let request = GovernanceRequest::new(RequestType::ModelDeployment, "requester-1", json!({}));
    let submission = coordinator.process_request(request).await?;
    join_all(worker.claim_pass().await?).await;
    join_all(worker.claim_pass().await?).await;

    let last = submission.task_ids.last().expect("three tasks");
    let result = coordinator
        .handle_task_completed(last)
        .await?
        .expect("all tasks terminal");

    // Ordinal distance low..critical is 3: a medium-severity conflict.
    assert!(!result.success);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].kind, "risk_assessment_conflict");

    // The resolution pass opens a constitutional-priority session.
    assert_eq!(coordinator.run_conflict_resolution_pass().await?, 1);

    let events = blackboard
        .query_knowledge(Space::Coordination, Some("consensus_session_event"), None, None, 100)
        .await?;
    let initiated = events
        .iter()
        .find(|e| e.content["event_type"] == "initiated")
        .expect("session initiated");
    let session_id = initiated.content["session_id"].as_str().expect("session id").to_owned();
    let conflict_id = initiated.content["conflict_id"].as_str().expect("conflict id").to_owned();

    // An involved participant endorses the safety-first option; the
    // top-ranked option clears the constitutional bar (0.9 >= 0.7).
    let session = coordinator
        .consensus()
        .get_session(&session_id)
        .await
        .expect("session exists");
    let safest = session
        .options
        .iter()
        .max_by(|a, b| {
            a.constitutional_score
                .partial_cmp(&b.constitutional_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .expect("options generated");
    coordinator
        .consensus()
        .cast_vote(
            &session_id,
            "governance_coordinator",
            VoterType::Coordinator,
            &safest.id,
            0.9,
            None,
            None,
        )
        .await?;

    let status = coordinator
        .finalize_consensus_resolution(&conflict_id, &session_id)
        .await?;
    assert_eq!(status, ConflictStatus::Resolved);

    let conflict = blackboard.get_conflict(&conflict_id).await?.expect("conflict exists");
    assert_eq!(conflict.status, ConflictStatus::Resolved);
    assert!(conflict.resolved_at.is_some());
    let resolution = conflict.resolution_data.expect("resolution data");
    let winning_score = resolution["winning_option"]["constitutional_score"]
        .as_f64()
        .expect("winning option score");
    assert!(winning_score >= 0.7);
    Ok(())
}

#[tokio::test]
async fn test_hundred_agents_race_for_one_claim() -> Result<()> {
    // A file-backed store so claims genuinely contend across connections.
    let dir = tempfile::tempdir().expect("tempdir");
    let config = CoordinationConfig::builder()
        .storage_url(format!("sqlite://{}?mode=rwc", dir.path().join("race.db").display()))
        .pool_size(10)
        .build()?;
    let blackboard = Arc::new(Blackboard::connect(&config).await?);

    let task = TaskDefinition::new("ethical_analysis", json!({}), json!({}));
    let task_id = blackboard.create_task(&task).await?;

    let attempts = (0..100).map(|i| {
        let blackboard = Arc::clone(&blackboard);
        let task_id = task_id.clone();
        async move {
            let agent_id = format!("agent-{i}");
            let won = blackboard.claim_task(&task_id, &agent_id).await?;
            Ok::<_, slate_core::Error>((agent_id, won))
        }
    });
    let outcomes = join_all(attempts).await;

    let winners: Vec<String> = outcomes
        .into_iter()
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .filter_map(|(agent_id, won)| won.then_some(agent_id))
        .collect();
    assert_eq!(winners.len(), 1, "exactly one claim must win");

    let task = blackboard.get_task(&task_id).await?.expect("task exists");
    assert_eq!(task.agent_id.as_deref(), Some(winners[0].as_str()));

    // The task appears in exactly one agent's index.
    for i in 0..100 {
        let agent_id = format!("agent-{i}");
        let held = blackboard.get_agent_tasks(&agent_id, None).await?;
        if agent_id == winners[0] {
            assert_eq!(held.len(), 1);
        } else {
            assert!(held.is_empty());
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_claim_complete_read_round_trip() -> Result<()> {
    let blackboard = Arc::new(Blackboard::in_memory().await?);
    let task = TaskDefinition::new("legal_compliance", json!({}), json!({}));
    let task_id = blackboard.create_task(&task).await?;

    assert!(blackboard.claim_task(&task_id, "legal-1").await?);
    let output = json!({"approved": true, "confidence": 0.8});
    blackboard
        .update_task_status(
            &task_id,
            "legal-1",
            slate_core::TaskStatus::Completed,
            Some(output.clone()),
            None,
        )
        .await?;

    let done = blackboard.get_task(&task_id).await?.expect("task exists");
    assert_eq!(done.status, slate_core::TaskStatus::Completed);
    assert_eq!(done.agent_id.as_deref(), Some("legal-1"));
    assert_eq!(done.output_data, Some(output));
    Ok(())
}
