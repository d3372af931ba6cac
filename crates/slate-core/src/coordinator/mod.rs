//! Coordinator: turns governance requests into task graphs on the
//! blackboard, tracks completion, fuses results, and drives conflict
//! resolution.

mod decompose;
mod graph;
mod integrate;

pub use decompose::TaskTemplate;
pub use graph::DependencyGraph;
pub use integrate::{DetectedConflict, IntegratedResult};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{Display, EnumString};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::blackboard::Blackboard;
use crate::config::CoordinationConfig;
use crate::consensus::{ConsensusAlgorithm, ConsensusEngine, VoteOption};
use crate::events::EventChannel;
use crate::models::{ConflictItem, ConflictStatus, KnowledgeItem, Space, TaskDefinition};
use crate::validator::{ConstitutionalValidator, ValidationOutcome};
use crate::{Error, Result, CONSTITUTIONAL_HASH};

/// Default coordinator identity.
const COORDINATOR_AGENT_ID: &str = "governance_coordinator";

/// The governance request categories the coordinator can decompose.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RequestType {
    ModelDeployment,
    PolicyEnforcement,
    ComplianceAudit,
}

/// A high-level governance request needing multi-agent coordination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceRequest {
    pub id: String,
    pub request_type: RequestType,
    /// 1 is highest, 5 lowest.
    pub priority: i32,
    pub requester_id: String,
    pub input_data: Value,
    pub constitutional_requirements: Vec<String>,
    pub deadline: Option<DateTime<Utc>>,
    /// Complexity estimate in [0, 1].
    pub complexity_score: f64,
    pub created_at: DateTime<Utc>,
}

impl GovernanceRequest {
    /// Create a request with a fresh id and default priority 3.
    #[must_use]
    pub fn new(
        request_type: RequestType,
        requester_id: impl Into<String>,
        input_data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_type,
            priority: 3,
            requester_id: requester_id.into(),
            input_data,
            constitutional_requirements: Vec::new(),
            deadline: None,
            complexity_score: 0.5,
            created_at: Utc::now(),
        }
    }

    /// Set the priority (1 = highest, 5 = lowest).
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Name the constitutional requirements this request must satisfy.
    #[must_use]
    pub fn with_requirements(mut self, requirements: Vec<String>) -> Self {
        self.constitutional_requirements = requirements;
        self
    }
}

/// Response to submitting a request: either tasks were created, or the
/// constitutional pre-check rejected it before any side effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSubmission {
    pub request_id: String,
    pub success: bool,
    pub task_ids: Vec<String>,
    pub constitutional_compliance: ValidationOutcome,
    pub error: Option<String>,
    pub constitutional_hash: String,
}

#[derive(Debug, Clone)]
struct ActiveRequest {
    request: GovernanceRequest,
    task_ids: Vec<String>,
}

/// The coordinator agent.
#[derive(Clone)]
pub struct Coordinator {
    agent_id: String,
    blackboard: Arc<Blackboard>,
    consensus: ConsensusEngine,
    validator: Arc<dyn ConstitutionalValidator>,
    active: Arc<RwLock<HashMap<String, ActiveRequest>>>,
}

impl Coordinator {
    /// Create a coordinator over a blackboard and validator, with default
    /// configuration.
    #[must_use]
    pub fn new(blackboard: Arc<Blackboard>, validator: Arc<dyn ConstitutionalValidator>) -> Self {
        Self::with_config(blackboard, validator, &CoordinationConfig::default())
    }

    /// Create a coordinator whose consensus sessions fall back to the
    /// configured default thresholds.
    #[must_use]
    pub fn with_config(
        blackboard: Arc<Blackboard>,
        validator: Arc<dyn ConstitutionalValidator>,
        config: &CoordinationConfig,
    ) -> Self {
        Self {
            agent_id: COORDINATOR_AGENT_ID.to_owned(),
            consensus: ConsensusEngine::with_defaults(
                Arc::clone(&blackboard),
                config.consensus_defaults.clone(),
            ),
            blackboard,
            validator,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The consensus engine this coordinator drives.
    #[must_use]
    pub const fn consensus(&self) -> &ConsensusEngine {
        &self.consensus
    }

    /// Register the coordinator on the blackboard.
    pub async fn initialize(&self) -> Result<()> {
        let capabilities = ["task_decomposition", "conflict_resolution", "integration_management"]
            .into_iter()
            .map(str::to_owned)
            .collect();
        self.blackboard
            .register_agent(&self.agent_id, "coordinator", &capabilities)
            .await
    }

    /// Accept a governance request: pre-check, decompose, create the task
    /// graph, and announce the workflow.
    ///
    /// A non-compliant pre-check returns a failed submission with no side
    /// effects; a dependency cycle is an [`Error::InvalidTransition`].
    pub async fn process_request(&self, request: GovernanceRequest) -> Result<RequestSubmission> {
        let compliance = self
            .validator
            .validate(
                &request.request_type.to_string(),
                &request.input_data,
                &request.constitutional_requirements,
            )
            .await?;

        if !compliance.compliant {
            tracing::warn!(
                request_id = %request.id,
                violations = ?compliance.violations,
                "Request rejected by constitutional pre-check"
            );
            return Ok(RequestSubmission {
                request_id: request.id,
                success: false,
                task_ids: Vec::new(),
                constitutional_compliance: compliance,
                error: Some("Constitutional compliance check failed".into()),
                constitutional_hash: CONSTITUTIONAL_HASH.to_owned(),
            });
        }

        // Materialize templates into tasks, resolving type-level
        // dependencies to concrete ids before anything is persisted.
        let templates = decompose::decompose(&request);
        let mut tasks = Vec::new();
        let mut ids_by_type: HashMap<String, String> = HashMap::new();
        for template in &templates {
            let mut requirements = template.requirements.clone();
            if let Some(map) = requirements.as_object_mut() {
                map.insert("governance_request_id".into(), json!(request.id));
                map.insert(
                    "constitutional_requirements".into(),
                    json!(request.constitutional_requirements),
                );
            }
            let mut task = TaskDefinition::new(
                template.task_type.clone(),
                requirements,
                template.input_data.clone(),
            )
            .with_priority(template.priority);
            if let Some(deadline) = request.deadline {
                task = task.with_deadline(deadline);
            }
            let dependencies = template
                .depends_on
                .iter()
                .filter_map(|dep_type| ids_by_type.get(dep_type).cloned())
                .collect();
            task = task.with_dependencies(dependencies);
            ids_by_type.insert(template.task_type.clone(), task.id.clone());
            tasks.push(task);
        }

        // Cycle diagnostic before creation, so a malformed request leaves
        // no tasks behind.
        let adjacency: BTreeMap<String, Vec<String>> = tasks
            .iter()
            .map(|t| (t.id.clone(), t.dependencies.clone()))
            .collect();
        let graph = DependencyGraph::build(adjacency)?;

        let mut task_ids = Vec::new();
        for task in &tasks {
            task_ids.push(self.blackboard.create_task(task).await?);
        }

        self.record_coordination_knowledge(&request, &task_ids, &graph).await?;
        self.record_compliance_knowledge(&request, &compliance).await?;

        self.blackboard.events().publish(
            EventChannel::GovernanceWorkflowStarted,
            json!({
                "request_id": request.id,
                "request_type": request.request_type,
                "task_count": task_ids.len(),
                "priority": request.priority,
                "deadline": request.deadline.map(|d| d.to_rfc3339()),
            }),
        );

        self.active.write().await.insert(
            request.id.clone(),
            ActiveRequest {
                request: request.clone(),
                task_ids: task_ids.clone(),
            },
        );

        tracing::info!(
            request_id = %request.id,
            task_count = task_ids.len(),
            "Governance request decomposed"
        );
        Ok(RequestSubmission {
            request_id: request.id,
            success: true,
            task_ids,
            constitutional_compliance: compliance,
            error: None,
            constitutional_hash: CONSTITUTIONAL_HASH.to_owned(),
        })
    }

    /// React to a task completion: when every task of the owning request is
    /// terminal, integrate and return the fused result.
    pub async fn handle_task_completed(&self, task_id: &str) -> Result<Option<IntegratedResult>> {
        let Some(task) = self.blackboard.get_task(task_id).await? else {
            return Ok(None);
        };
        let Some(request_id) =
            crate::payload::governance_request_id(&task.requirements).map(str::to_owned)
        else {
            return Ok(None);
        };

        let task_ids = {
            let active = self.active.read().await;
            match active.get(&request_id) {
                Some(entry) => entry.task_ids.clone(),
                None => return Ok(None),
            }
        };

        let checks = task_ids.iter().map(|id| self.blackboard.get_task(id));
        let tasks = futures::future::try_join_all(checks).await?;
        let all_terminal = tasks
            .iter()
            .all(|task| task.as_ref().is_some_and(|t| t.status.is_terminal()));
        if !all_terminal {
            return Ok(None);
        }

        self.integrate_results(&request_id).await.map(Some)
    }

    /// Fuse the completed outputs of a request into a decision, file any
    /// conflicts found, persist the result, and announce completion.
    ///
    /// Failed tasks do not fail the request: integration proceeds with
    /// whatever completed, and a failure during integration itself is
    /// recorded before propagating.
    pub async fn integrate_results(&self, request_id: &str) -> Result<IntegratedResult> {
        match self.try_integrate(request_id).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.active.write().await.remove(request_id);
                self.blackboard.events().publish(
                    EventChannel::GovernanceRequestCompleted,
                    json!({
                        "request_id": request_id,
                        "success": false,
                        "error": e.to_string(),
                        "error_kind": e.code(),
                        "constitutional_hash": CONSTITUTIONAL_HASH,
                    }),
                );
                Err(e)
            }
        }
    }

    async fn try_integrate(&self, request_id: &str) -> Result<IntegratedResult> {
        let entry = {
            let active = self.active.read().await;
            active
                .get(request_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("Request not tracked: {request_id}")))?
        };

        let mut task_results: BTreeMap<String, Value> = BTreeMap::new();
        for task_id in &entry.task_ids {
            if let Some(task) = self.blackboard.get_task(task_id).await? {
                if let Some(output) = task.output_data {
                    task_results.insert(task.task_type, output);
                }
            }
        }

        let compliance = self
            .validator
            .validate(
                &entry.request.request_type.to_string(),
                &json!(task_results),
                &entry.request.constitutional_requirements,
            )
            .await?;

        let result = integrate::integrate(&entry.request, &task_results, compliance);

        for finding in &result.conflicts {
            let conflict = ConflictItem::new(
                "decision_conflict",
                vec![self.agent_id.clone()],
                finding.description.clone(),
            )
            .with_severity(finding.severity)
            .with_tasks(finding.involved_tasks.clone());
            self.blackboard.report_conflict(&conflict).await?;
        }

        let knowledge = KnowledgeItem::new(
            Space::Governance,
            &self.agent_id,
            "governance_result",
            json!({
                "request_id": request_id,
                "task_results": task_results,
                "integrated_result": result,
                "completion_time": Utc::now().to_rfc3339(),
                "constitutional_compliance": result.constitutional_compliance,
                "constitutional_hash": CONSTITUTIONAL_HASH,
            }),
        )
        .with_tags(["governance", "result", "completed"]);
        self.blackboard.add_knowledge(&knowledge).await?;

        self.blackboard.events().publish(
            EventChannel::GovernanceRequestCompleted,
            json!({
                "request_id": request_id,
                "success": result.success,
                "constitutional_compliant": result.constitutional_compliance.compliant,
                "task_count": entry.task_ids.len(),
                "constitutional_hash": CONSTITUTIONAL_HASH,
            }),
        );

        self.active.write().await.remove(request_id);
        tracing::info!(
            request_id = %request_id,
            success = result.success,
            "Governance request integrated"
        );
        Ok(result)
    }

    /// One pass of the conflict-resolution routine: dispatch each open
    /// conflict to its strategy. Returns how many conflicts were acted on.
    pub async fn run_conflict_resolution_pass(&self) -> Result<usize> {
        let open = self.blackboard.get_open_conflicts(None, None, 10).await?;
        let mut handled = 0;
        for conflict in open {
            match conflict.conflict_type.as_str() {
                "decision_conflict" => self.open_consensus_for(&conflict).await?,
                "resource_conflict" => {
                    self.blackboard
                        .resolve_conflict(
                            &conflict.id,
                            "priority_based_allocation",
                            json!({
                                "allocation_decision": "highest_priority_wins",
                                "reasoning": "Resource allocated by task priority",
                            }),
                        )
                        .await?;
                }
                "policy_conflict" => {
                    self.blackboard
                        .resolve_conflict(
                            &conflict.id,
                            "constitutional_precedence",
                            json!({
                                "decision": "defer_to_constitutional_principles",
                                "reasoning": "Constitutional principles take precedence",
                            }),
                        )
                        .await?;
                }
                other => {
                    tracing::warn!(
                        conflict_id = %conflict.id,
                        conflict_type = %other,
                        "Unknown conflict type"
                    );
                    continue;
                }
            }
            handled += 1;
        }
        Ok(handled)
    }

    /// Open a consensus session for a decision conflict and park the
    /// conflict in resolution.
    async fn open_consensus_for(&self, conflict: &ConflictItem) -> Result<()> {
        let options = resolution_options(conflict);
        let mut participants = conflict.involved_agents.clone();
        if !participants.iter().any(|p| p == &self.agent_id) {
            participants.push(self.agent_id.clone());
        }

        let session_id = self
            .consensus
            .initiate_consensus(
                conflict,
                ConsensusAlgorithm::ConstitutionalPriority,
                participants,
                options,
                24.0,
                None,
            )
            .await?;

        self.blackboard
            .update_conflict_status(
                &conflict.id,
                ConflictStatus::InResolution,
                Some("consensus_session"),
                Some(json!({"session_id": session_id, "algorithm": "constitutional_priority"})),
            )
            .await?;
        Ok(())
    }

    /// Execute a conflict's consensus session and settle the conflict:
    /// resolved on success, escalated otherwise. Returns the final status.
    pub async fn finalize_consensus_resolution(
        &self,
        conflict_id: &str,
        session_id: &str,
    ) -> Result<ConflictStatus> {
        let outcome = self.consensus.execute_consensus(session_id).await?;
        let status = if outcome.success {
            self.blackboard
                .update_conflict_status(
                    conflict_id,
                    ConflictStatus::Resolved,
                    Some("constitutional_priority"),
                    Some(json!({
                        "session_id": session_id,
                        "winning_option": outcome.winning_option,
                        "confidence_score": outcome.confidence_score,
                    })),
                )
                .await?;
            ConflictStatus::Resolved
        } else {
            self.blackboard
                .update_conflict_status(
                    conflict_id,
                    ConflictStatus::Escalated,
                    Some("consensus_session"),
                    Some(json!({"session_id": session_id, "reason": outcome.reason})),
                )
                .await?;
            ConflictStatus::Escalated
        };
        Ok(status)
    }

    /// Spawn the coordinator's background loops: completion watcher,
    /// conflict resolution, heartbeat.
    #[must_use]
    pub fn start(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let watcher = {
            let coordinator = self.clone();
            let rx = shutdown.subscribe();
            tokio::spawn(async move { coordinator.run_completion_watcher(rx).await })
        };
        let resolver = {
            let coordinator = self.clone();
            let rx = shutdown.subscribe();
            tokio::spawn(async move {
                coordinator
                    .run_conflict_resolution_loop(StdDuration::from_secs(10), rx)
                    .await;
            })
        };
        let heartbeat = {
            let coordinator = self.clone();
            let rx = shutdown.subscribe();
            tokio::spawn(async move {
                coordinator.run_heartbeat_loop(StdDuration::from_secs(30), rx).await;
            })
        };
        vec![watcher, resolver, heartbeat]
    }

    /// Watch `task_completed` events and integrate finished requests.
    /// Events are hints: the store is re-queried for authoritative state.
    pub async fn run_completion_watcher(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut events = self.blackboard.events().subscribe(EventChannel::TaskCompleted);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Completion watcher shutting down");
                    break;
                }
                event = events.recv() => {
                    match event {
                        Ok(envelope) => {
                            let Some(task_id) = envelope.data["task_id"].as_str() else {
                                continue;
                            };
                            if let Err(e) = self.handle_task_completed(task_id).await {
                                tracing::error!(error = %e, task_id = %task_id, "Integration failed");
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "Completion watcher lagged; resyncing");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    /// Periodic conflict-resolution loop.
    pub async fn run_conflict_resolution_loop(
        &self,
        interval: StdDuration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Conflict resolution loop shutting down");
                    break;
                }
                () = tokio::time::sleep(interval) => {
                    if let Err(e) = self.run_conflict_resolution_pass().await {
                        tracing::error!(error = %e, "Conflict resolution pass failed");
                    }
                }
            }
        }
    }

    /// Periodic heartbeat loop.
    pub async fn run_heartbeat_loop(
        &self,
        interval: StdDuration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(interval) => {
                    if let Err(e) = self.blackboard.agent_heartbeat(&self.agent_id).await {
                        tracing::error!(error = %e, "Coordinator heartbeat failed");
                    }
                }
            }
        }
    }

    async fn record_coordination_knowledge(
        &self,
        request: &GovernanceRequest,
        task_ids: &[String],
        graph: &DependencyGraph,
    ) -> Result<()> {
        let context = KnowledgeItem::new(
            Space::Governance,
            &self.agent_id,
            "governance_context",
            json!({
                "request_id": request.id,
                "request_type": request.request_type,
                "task_ids": task_ids,
                "priority": request.priority,
                "complexity_score": request.complexity_score,
                "constitutional_requirements": request.constitutional_requirements,
                "coordination_strategy": "hybrid_hierarchical_blackboard",
            }),
        )
        .with_priority(request.priority)
        .with_tags([
            "governance".to_owned(),
            "coordination".to_owned(),
            request.request_type.to_string(),
        ]);
        self.blackboard.add_knowledge(&context).await?;

        let dependencies = KnowledgeItem::new(
            Space::Coordination,
            &self.agent_id,
            "task_dependencies",
            json!({
                "request_id": request.id,
                "task_dependency_graph": graph.adjacency,
                "critical_path": graph.critical_path,
                "parallel_execution_groups": graph.parallel_groups,
            }),
        )
        .with_priority(request.priority)
        .with_tags(["coordination", "dependencies", "workflow"]);
        self.blackboard.add_knowledge(&dependencies).await?;
        Ok(())
    }

    async fn record_compliance_knowledge(
        &self,
        request: &GovernanceRequest,
        compliance: &ValidationOutcome,
    ) -> Result<()> {
        let item = KnowledgeItem::new(
            Space::Governance,
            &self.agent_id,
            "constitutional_compliance",
            json!({
                "request_id": request.id,
                "request_type": request.request_type,
                "compliance_result": compliance,
                "constitutional_hash": CONSTITUTIONAL_HASH,
                "compliant": compliance.compliant,
                "violations": compliance.violations,
                "principle_adherence": compliance.principle_adherence,
            }),
        )
        .with_tags(["constitutional", "compliance", "validation"]);
        self.blackboard.add_knowledge(&item).await?;
        Ok(())
    }
}

/// Candidate resolutions for a decision conflict, scored by how closely
/// each hews to constitutional principles.
fn resolution_options(conflict: &ConflictItem) -> Vec<VoteOption> {
    if conflict.description.contains("risk assessments") {
        vec![
            VoteOption::new(
                "use_highest_risk",
                "Use the highest risk assessment for safety",
                "governance_coordinator",
            )
            .with_constitutional_score(0.9),
            VoteOption::new(
                "use_average_risk",
                "Use the average of all risk assessments",
                "governance_coordinator",
            )
            .with_constitutional_score(0.6),
            VoteOption::new(
                "require_consensus",
                "Require agents to re-assess and agree",
                "governance_coordinator",
            )
            .with_constitutional_score(0.7),
        ]
    } else if conflict.description.contains("approval decisions") {
        vec![
            VoteOption::new(
                "require_unanimous_approval",
                "Require all agents to approve",
                "governance_coordinator",
            )
            .with_constitutional_score(0.9),
            VoteOption::new(
                "majority_rule",
                "Use the majority decision",
                "governance_coordinator",
            )
            .with_constitutional_score(0.6),
            VoteOption::new(
                "constitutional_override",
                "Apply constitutional principles directly",
                "governance_coordinator",
            )
            .with_constitutional_score(0.8),
        ]
    } else {
        vec![
            VoteOption::new(
                "escalate_to_human",
                "Escalate to human oversight",
                "governance_coordinator",
            )
            .with_constitutional_score(0.8),
            VoteOption::new(
                "apply_constitutional_principles",
                "Apply the constitutional framework",
                "governance_coordinator",
            )
            .with_constitutional_score(0.75),
        ]
    }
}
