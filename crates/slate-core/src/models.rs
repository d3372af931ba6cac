//! Core data model: spaces, knowledge items, tasks, conflicts, agents.
//!
//! Records are immutable value types; lifecycle rules live in the store
//! (`crate::blackboard`), which is the only writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Logical partition of the blackboard. Items in different spaces never
/// collide.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Space {
    Governance,
    Compliance,
    Performance,
    Coordination,
    Tasks,
    Conflicts,
    Agents,
}

impl Space {
    /// All knowledge-bearing spaces, in metric-reporting order.
    pub const KNOWLEDGE_SPACES: [Self; 4] = [
        Self::Governance,
        Self::Compliance,
        Self::Performance,
        Self::Coordination,
    ];
}

/// An immutable-after-publish fact on the blackboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub space: Space,
    /// Author agent.
    pub agent_id: String,
    pub task_id: Option<String>,
    /// Free-form tag, e.g. `"ethical_analysis_result"`.
    pub knowledge_type: String,
    /// Opaque structured payload.
    pub content: Value,
    pub timestamp: DateTime<Utc>,
    /// 1 is highest, 5 lowest.
    pub priority: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub dependencies: Vec<String>,
    pub tags: BTreeSet<String>,
}

impl KnowledgeItem {
    /// Create a knowledge item with a fresh id and default priority 1.
    #[must_use]
    pub fn new(
        space: Space,
        agent_id: impl Into<String>,
        knowledge_type: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            space,
            agent_id: agent_id.into(),
            task_id: None,
            knowledge_type: knowledge_type.into(),
            content,
            timestamp: Utc::now(),
            priority: 1,
            expires_at: None,
            dependencies: Vec::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Set the priority (1 = highest, 5 = lowest).
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the expiry instant; after it the item is absent from all reads.
    #[must_use]
    pub const fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Attach the originating task.
    #[must_use]
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Add tags for query filtering.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Lifecycle state of a task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Check if this is an absorbing state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the public update path may move a task from `self` to `next`.
    ///
    /// Claiming is not covered here: `pending -> claimed` goes through the
    /// atomic claim operation only. Requeue moves (`claimed -> pending` on
    /// agent timeout, `failed -> pending` on retry) are store policy, not
    /// caller-driven updates.
    #[must_use]
    pub const fn can_progress_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Claimed, Self::InProgress)
                | (Self::Claimed | Self::InProgress, Self::Completed | Self::Failed)
        )
    }
}

/// A unit of work with an explicit state machine and ownership semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    pub task_type: String,
    pub status: TaskStatus,
    /// Claimant; `None` until claimed.
    pub agent_id: Option<String>,
    /// 1 is highest, 5 lowest.
    pub priority: i32,
    /// Opaque constraints.
    pub requirements: Value,
    pub input_data: Value,
    /// Set on completion.
    pub output_data: Option<Value>,
    /// Set on failure.
    pub error_details: Option<Value>,
    /// Task ids that must be `completed` before this may be claimed.
    pub dependencies: Vec<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retries: i32,
    pub max_retries: i32,
}

impl TaskDefinition {
    /// Default retry budget for failed tasks.
    pub const DEFAULT_MAX_RETRIES: i32 = 3;

    /// Create a pending task with a fresh id and default priority 1.
    #[must_use]
    pub fn new(task_type: impl Into<String>, requirements: Value, input_data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            status: TaskStatus::Pending,
            agent_id: None,
            priority: 1,
            requirements,
            input_data,
            output_data: None,
            error_details: None,
            dependencies: Vec::new(),
            deadline: None,
            created_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
            retries: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the priority (1 = highest, 5 = lowest).
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the task ids that gate claiming.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Set an execution deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Severity of a recorded disagreement, ordered critical-first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ConflictSeverity {
    /// Fixed ordinal used for conflict-queue ordering: critical=1 ... low=4.
    #[must_use]
    pub const fn rank(self) -> i32 {
        match self {
            Self::Critical => 1,
            Self::High => 2,
            Self::Medium => 3,
            Self::Low => 4,
        }
    }
}

/// Lifecycle state of a conflict.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConflictStatus {
    Open,
    InResolution,
    Resolved,
    Escalated,
}

impl ConflictStatus {
    /// Check if this is an absorbing state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Escalated)
    }
}

/// A recorded disagreement between agents or decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictItem {
    pub id: String,
    /// E.g. `decision_conflict`, `resource_conflict`, `policy_conflict`.
    pub conflict_type: String,
    pub involved_agents: Vec<String>,
    pub involved_tasks: Vec<String>,
    pub description: String,
    pub severity: ConflictSeverity,
    pub status: ConflictStatus,
    pub resolution_strategy: Option<String>,
    pub resolution_data: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConflictItem {
    /// Create an open conflict with a fresh id and medium severity.
    #[must_use]
    pub fn new(
        conflict_type: impl Into<String>,
        involved_agents: Vec<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conflict_type: conflict_type.into(),
            involved_agents,
            involved_tasks: Vec::new(),
            description: description.into(),
            severity: ConflictSeverity::Medium,
            status: ConflictStatus::Open,
            resolution_strategy: None,
            resolution_data: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Set the severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: ConflictSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the tasks this conflict spans.
    #[must_use]
    pub fn with_tasks(mut self, involved_tasks: Vec<String>) -> Self {
        self.involved_tasks = involved_tasks;
        self
    }
}

/// Registration state of an agent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
}

/// An agent known to the blackboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub agent_type: String,
    pub capabilities: BTreeSet<String>,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_space_round_trips_through_strings() {
        for space in [
            Space::Governance,
            Space::Compliance,
            Space::Performance,
            Space::Coordination,
            Space::Tasks,
            Space::Conflicts,
            Space::Agents,
        ] {
            let parsed: Space = space.to_string().parse().expect("round trip");
            assert_eq!(parsed, space);
        }
    }

    #[test]
    fn test_task_status_terminal_states_absorb() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Completed.can_progress_to(TaskStatus::Failed));
        assert!(!TaskStatus::Failed.can_progress_to(TaskStatus::Completed));
    }

    #[test]
    fn test_task_status_progress_rules() {
        assert!(TaskStatus::Claimed.can_progress_to(TaskStatus::InProgress));
        assert!(TaskStatus::Claimed.can_progress_to(TaskStatus::Completed));
        assert!(TaskStatus::InProgress.can_progress_to(TaskStatus::Failed));
        // Claiming is not a caller-driven update.
        assert!(!TaskStatus::Pending.can_progress_to(TaskStatus::Claimed));
        assert!(!TaskStatus::Pending.can_progress_to(TaskStatus::Completed));
    }

    #[test]
    fn test_severity_rank_orders_critical_first() {
        assert!(ConflictSeverity::Critical.rank() < ConflictSeverity::High.rank());
        assert!(ConflictSeverity::High.rank() < ConflictSeverity::Medium.rank());
        assert!(ConflictSeverity::Medium.rank() < ConflictSeverity::Low.rank());
    }

    #[test]
    fn test_knowledge_item_builder_defaults() {
        let item = KnowledgeItem::new(
            Space::Governance,
            "ethics_agent",
            "policy",
            json!({"rule": "transparency"}),
        )
        .with_priority(2)
        .with_tags(["governance", "policy"]);

        assert_eq!(item.priority, 2);
        assert!(item.tags.contains("governance"));
        assert!(item.expires_at.is_none());
        assert!(!item.id.is_empty());
    }

    #[test]
    fn test_task_ids_are_unique() {
        let a = TaskDefinition::new("ethical_analysis", json!({}), json!({}));
        let b = TaskDefinition::new("ethical_analysis", json!({}), json!({}));
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, TaskStatus::Pending);
        assert_eq!(a.max_retries, TaskDefinition::DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_conflict_serde_round_trip() {
        let conflict = ConflictItem::new(
            "decision_conflict",
            vec!["ethics_agent".into(), "legal_agent".into()],
            "Disagreement on policy interpretation",
        )
        .with_severity(ConflictSeverity::High);

        let encoded = serde_json::to_string(&conflict).expect("serialize");
        let decoded: ConflictItem = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded.severity, ConflictSeverity::High);
        assert_eq!(decoded.status, ConflictStatus::Open);
        assert_eq!(decoded.involved_agents.len(), 2);
    }
}
