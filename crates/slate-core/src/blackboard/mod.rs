//! The blackboard: shared, partitioned state store mediating all
//! cross-agent coordination.
//!
//! [`Blackboard`] is a facade over focused stores (knowledge, tasks,
//! conflicts, agents) sharing one `SqlitePool`, plus the [`EventBus`] it
//! publishes change notifications on. It is the system's only source of
//! cross-agent truth: events are hints and consumers re-query here.

mod agents;
mod conflicts;
mod knowledge;
mod rows;
mod tasks;

pub use agents::AgentRegistry;
pub use conflicts::ConflictStore;
pub use knowledge::KnowledgeStore;
pub use tasks::TaskStore;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::config::CoordinationConfig;
use crate::events::{EventBus, EventChannel};
use crate::models::{
    AgentRegistration, ConflictItem, ConflictSeverity, ConflictStatus, KnowledgeItem, Space,
    TaskDefinition, TaskStatus,
};
use crate::{Error, Result};

/// Cardinalities of the store's queues and indexes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlackboardMetrics {
    pub tasks: TaskCounts,
    pub conflicts: ConflictCounts,
    pub knowledge_items: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: i64,
    pub claimed: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConflictCounts {
    pub open: i64,
    pub resolved: i64,
}

/// Shared blackboard service.
#[derive(Debug, Clone)]
pub struct Blackboard {
    pool: SqlitePool,
    events: Arc<EventBus>,
    knowledge: KnowledgeStore,
    tasks: TaskStore,
    conflicts: ConflictStore,
    agents: AgentRegistry,
    ttl_cap: Duration,
}

impl Blackboard {
    /// Connect to the configured store and bootstrap the schema.
    pub async fn connect(config: &CoordinationConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.storage_url)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect to store: {e}")))?;
        let mut blackboard = Self::with_pool(pool).await?;
        blackboard.ttl_cap = config.ttl_cap;
        Ok(blackboard)
    }

    /// In-memory store for tests. A single connection keeps every handle on
    /// the same database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::Database(format!("Failed to open in-memory store: {e}")))?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, bootstrapping the schema.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        init_schema(&pool).await?;
        Ok(Self {
            knowledge: KnowledgeStore::new(pool.clone()),
            tasks: TaskStore::new(pool.clone()),
            conflicts: ConflictStore::new(pool.clone()),
            agents: AgentRegistry::new(pool.clone()),
            events: Arc::new(EventBus::new()),
            pool,
            ttl_cap: CoordinationConfig::default().ttl_cap,
        })
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The notification bus.
    #[must_use]
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    // ── Knowledge ──────────────────────────────────────────────────────

    /// Publish a knowledge item and notify `knowledge_added`. Expiries
    /// beyond the configured TTL cap are clamped to it.
    pub async fn add_knowledge(&self, item: &KnowledgeItem) -> Result<String> {
        let mut to_store = item.clone();
        if let Some(expires_at) = to_store.expires_at {
            let cap = Utc::now()
                + chrono::Duration::from_std(self.ttl_cap)
                    .map_err(|e| Error::InvalidConfig(format!("TTL cap out of range: {e}")))?;
            if expires_at > cap {
                to_store.expires_at = Some(cap);
            }
        }
        let item = &to_store;
        let id = self.knowledge.add(item).await?;
        self.events.publish(
            EventChannel::KnowledgeAdded,
            json!({
                "knowledge_id": id,
                "space": item.space,
                "agent_id": item.agent_id,
                "knowledge_type": item.knowledge_type,
            }),
        );
        Ok(id)
    }

    /// Retrieve a knowledge item; expired items are absent.
    pub async fn get_knowledge(&self, id: &str, space: Space) -> Result<Option<KnowledgeItem>> {
        self.knowledge.get(id, space).await
    }

    /// Query a space with filters; tags are subset-matched.
    pub async fn query_knowledge(
        &self,
        space: Space,
        knowledge_type: Option<&str>,
        agent_id: Option<&str>,
        tags: Option<&BTreeSet<String>>,
        limit: i64,
    ) -> Result<Vec<KnowledgeItem>> {
        self.knowledge.query(space, knowledge_type, agent_id, tags, limit).await
    }

    /// Remove a knowledge item.
    pub async fn remove_knowledge(&self, id: &str, space: Space) -> Result<bool> {
        self.knowledge.remove(id, space).await
    }

    /// Reclaim storage held by expired items.
    pub async fn purge_expired_knowledge(&self) -> Result<u64> {
        self.knowledge.purge_expired().await
    }

    // ── Tasks ──────────────────────────────────────────────────────────

    /// Create a task and notify `task_created`.
    pub async fn create_task(&self, task: &TaskDefinition) -> Result<String> {
        let id = self.tasks.create(task).await?;
        self.events.publish(
            EventChannel::TaskCreated,
            json!({
                "task_id": id,
                "task_type": task.task_type,
                "priority": task.priority,
            }),
        );
        Ok(id)
    }

    /// Retrieve a task.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<TaskDefinition>> {
        self.tasks.get(task_id).await
    }

    /// Atomically claim a pending task; notifies `task_claimed` on success.
    pub async fn claim_task(&self, task_id: &str, agent_id: &str) -> Result<bool> {
        let claimed = self.tasks.claim(task_id, agent_id).await?;
        if claimed {
            self.events.publish(
                EventChannel::TaskClaimed,
                json!({"task_id": task_id, "agent_id": agent_id}),
            );
        }
        Ok(claimed)
    }

    /// Progress a task; notifies `task_completed` (with output) or
    /// `task_failed` on terminal transitions.
    pub async fn update_task_status(
        &self,
        task_id: &str,
        agent_id: &str,
        status: TaskStatus,
        output_data: Option<Value>,
        error_details: Option<Value>,
    ) -> Result<()> {
        self.tasks
            .update_status(task_id, agent_id, status, output_data.clone(), error_details.clone())
            .await?;

        match status {
            TaskStatus::Completed => {
                self.events.publish(
                    EventChannel::TaskCompleted,
                    json!({
                        "task_id": task_id,
                        "agent_id": agent_id,
                        "success": true,
                        "output_data": output_data,
                    }),
                );
            }
            TaskStatus::Failed => {
                self.events.publish(
                    EventChannel::TaskFailed,
                    json!({
                        "task_id": task_id,
                        "agent_id": agent_id,
                        "success": false,
                        "error_details": error_details,
                    }),
                );
            }
            _ => {}
        }
        Ok(())
    }

    /// Claimable tasks: pending, type-matched, dependencies all completed.
    pub async fn get_available_tasks(
        &self,
        task_types: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<TaskDefinition>> {
        self.tasks.available(task_types, limit).await
    }

    /// Tasks held by an agent.
    pub async fn get_agent_tasks(
        &self,
        agent_id: &str,
        statuses: Option<&[TaskStatus]>,
    ) -> Result<Vec<TaskDefinition>> {
        self.tasks.agent_tasks(agent_id, statuses).await
    }

    /// Release a claim back to pending without consuming a retry.
    pub async fn release_claim(&self, task_id: &str, agent_id: &str) -> Result<bool> {
        self.tasks.release_claim(task_id, agent_id).await
    }

    // ── Conflicts ──────────────────────────────────────────────────────

    /// Record a conflict and notify `conflict_detected`.
    pub async fn report_conflict(&self, conflict: &ConflictItem) -> Result<String> {
        let id = self.conflicts.report(conflict).await?;
        self.events.publish(
            EventChannel::ConflictDetected,
            json!({
                "conflict_id": id,
                "conflict_type": conflict.conflict_type,
                "involved_agents": conflict.involved_agents,
                "severity": conflict.severity,
            }),
        );
        Ok(id)
    }

    /// Retrieve a conflict.
    pub async fn get_conflict(&self, conflict_id: &str) -> Result<Option<ConflictItem>> {
        self.conflicts.get(conflict_id).await
    }

    /// Resolve a conflict with a strategy tag and resolution data.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution_strategy: &str,
        resolution_data: Value,
    ) -> Result<()> {
        self.conflicts
            .update_status(
                conflict_id,
                ConflictStatus::Resolved,
                Some(resolution_strategy),
                Some(resolution_data),
            )
            .await
    }

    /// Move a conflict along its lifecycle.
    pub async fn update_conflict_status(
        &self,
        conflict_id: &str,
        status: ConflictStatus,
        resolution_strategy: Option<&str>,
        resolution_data: Option<Value>,
    ) -> Result<()> {
        self.conflicts
            .update_status(conflict_id, status, resolution_strategy, resolution_data)
            .await
    }

    /// Open conflicts, critical-first.
    pub async fn get_open_conflicts(
        &self,
        severity: Option<ConflictSeverity>,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ConflictItem>> {
        self.conflicts.open(severity, agent_id, limit).await
    }

    /// File a decision conflict if agent decisions on a task disagree.
    pub async fn detect_decision_conflict(
        &self,
        task_id: &str,
        agent_decisions: &BTreeMap<String, Value>,
    ) -> Result<Option<String>> {
        self.conflicts.detect_decision_conflict(task_id, agent_decisions).await
    }

    // ── Agents ─────────────────────────────────────────────────────────

    /// Register an agent and notify `agent_status`.
    pub async fn register_agent(
        &self,
        agent_id: &str,
        agent_type: &str,
        capabilities: &BTreeSet<String>,
    ) -> Result<()> {
        self.agents.register(agent_id, agent_type, capabilities).await?;
        self.events.publish(
            EventChannel::AgentStatus,
            json!({"agent_id": agent_id, "status": "active"}),
        );
        Ok(())
    }

    /// Refresh an agent's heartbeat.
    pub async fn agent_heartbeat(&self, agent_id: &str) -> Result<()> {
        self.agents.heartbeat(agent_id).await
    }

    /// Retrieve an agent's registration.
    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRegistration>> {
        self.agents.get(agent_id).await
    }

    /// Ids of all active agents.
    pub async fn get_active_agents(&self) -> Result<Vec<String>> {
        self.agents.active().await
    }

    /// Deactivate lapsed agents and recover their outstanding tasks:
    /// claimed work returns to `pending` with a retry consumed, or fails
    /// once the retry budget is spent. Returns the lapsed agent ids.
    pub async fn check_agent_timeouts(&self, timeout: Duration) -> Result<Vec<String>> {
        let timed_out = self.agents.check_timeouts(timeout).await?;
        for agent_id in &timed_out {
            let requeued = self.tasks.requeue_for_agent(agent_id).await?;
            self.events.publish(
                EventChannel::AgentStatus,
                json!({
                    "agent_id": agent_id,
                    "status": "inactive",
                    "requeued_tasks": requeued,
                }),
            );
        }
        Ok(timed_out)
    }

    // ── Metrics ────────────────────────────────────────────────────────

    /// Cardinalities of every queue and index.
    pub async fn get_metrics(&self) -> Result<BlackboardMetrics> {
        let tasks = TaskCounts {
            pending: self.tasks.count_by_status(TaskStatus::Pending).await?,
            claimed: self.tasks.count_by_status(TaskStatus::Claimed).await?,
            in_progress: self.tasks.count_by_status(TaskStatus::InProgress).await?,
            completed: self.tasks.count_by_status(TaskStatus::Completed).await?,
            failed: self.tasks.count_by_status(TaskStatus::Failed).await?,
        };
        let conflicts = ConflictCounts {
            open: self.conflicts.count_by_status(ConflictStatus::Open).await?,
            resolved: self.conflicts.count_by_status(ConflictStatus::Resolved).await?,
        };
        let mut knowledge_items = BTreeMap::new();
        for space in Space::KNOWLEDGE_SPACES {
            knowledge_items.insert(space.to_string(), self.knowledge.count(space).await?);
        }
        Ok(BlackboardMetrics {
            tasks,
            conflicts,
            knowledge_items,
        })
    }
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS knowledge (
            id TEXT PRIMARY KEY,
            space TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            task_id TEXT,
            knowledge_type TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 1,
            expires_at TEXT,
            dependencies TEXT NOT NULL DEFAULT '[]',
            tags TEXT NOT NULL DEFAULT '[]'
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to create knowledge table: {e}")))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_knowledge_space_priority
         ON knowledge(space, priority, timestamp)",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to index knowledge: {e}")))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            task_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            agent_id TEXT,
            priority INTEGER NOT NULL DEFAULT 1,
            requirements TEXT NOT NULL DEFAULT '{}',
            input_data TEXT NOT NULL DEFAULT '{}',
            output_data TEXT,
            error_details TEXT,
            dependencies TEXT NOT NULL DEFAULT '[]',
            deadline TEXT,
            created_at TEXT NOT NULL,
            claimed_at TEXT,
            completed_at TEXT,
            retries INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to create tasks table: {e}")))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_status_priority
         ON tasks(status, priority, created_at)",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to index tasks: {e}")))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_agent ON tasks(agent_id)")
        .execute(pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to index tasks by agent: {e}")))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS conflicts (
            id TEXT PRIMARY KEY,
            conflict_type TEXT NOT NULL,
            involved_agents TEXT NOT NULL DEFAULT '[]',
            involved_tasks TEXT NOT NULL DEFAULT '[]',
            description TEXT NOT NULL,
            severity TEXT NOT NULL DEFAULT 'medium',
            severity_rank INTEGER NOT NULL DEFAULT 3,
            status TEXT NOT NULL DEFAULT 'open',
            resolution_strategy TEXT,
            resolution_data TEXT,
            created_at TEXT NOT NULL,
            resolved_at TEXT
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to create conflicts table: {e}")))?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conflicts_status_severity
         ON conflicts(status, severity_rank, created_at)",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to index conflicts: {e}")))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS agents (
            agent_id TEXT PRIMARY KEY,
            agent_type TEXT NOT NULL,
            capabilities TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'active',
            registered_at TEXT NOT NULL,
            last_heartbeat TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Database(format!("Failed to create agents table: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_claim_publishes_event() -> Result<()> {
        let bb = Blackboard::in_memory().await?;
        let mut rx = bb.events().subscribe(EventChannel::TaskClaimed);

        let task = TaskDefinition::new("ethical_analysis", json!({}), json!({}));
        let id = bb.create_task(&task).await?;
        assert!(bb.claim_task(&id, "ethics-1").await?);

        let envelope = rx.recv().await.map_err(|e| Error::Database(e.to_string()))?;
        assert_eq!(envelope.data["task_id"], id.as_str());
        assert_eq!(envelope.data["agent_id"], "ethics-1");
        Ok(())
    }

    #[tokio::test]
    async fn test_completion_event_carries_output() -> Result<()> {
        let bb = Blackboard::in_memory().await?;
        let mut rx = bb.events().subscribe(EventChannel::TaskCompleted);

        let task = TaskDefinition::new("legal_compliance", json!({}), json!({}));
        let id = bb.create_task(&task).await?;
        bb.claim_task(&id, "legal-1").await?;
        bb.update_task_status(
            &id,
            "legal-1",
            TaskStatus::Completed,
            Some(json!({"approved": true})),
            None,
        )
        .await?;

        let envelope = rx.recv().await.map_err(|e| Error::Database(e.to_string()))?;
        assert_eq!(envelope.data["output_data"]["approved"], true);
        Ok(())
    }

    #[tokio::test]
    async fn test_metrics_count_queues() -> Result<()> {
        let bb = Blackboard::in_memory().await?;
        let task = TaskDefinition::new("ethical_analysis", json!({}), json!({}));
        let id = bb.create_task(&task).await?;
        bb.create_task(&TaskDefinition::new("legal_compliance", json!({}), json!({})))
            .await?;
        bb.claim_task(&id, "ethics-1").await?;

        let item = KnowledgeItem::new(Space::Governance, "ethics-1", "policy", json!({}));
        bb.add_knowledge(&item).await?;

        let metrics = bb.get_metrics().await?;
        assert_eq!(metrics.tasks.pending, 1);
        assert_eq!(metrics.tasks.claimed, 1);
        assert_eq!(metrics.knowledge_items.get("governance"), Some(&1));
        Ok(())
    }

    #[tokio::test]
    async fn test_far_future_expiry_is_clamped_to_cap() -> Result<()> {
        let mut bb = Blackboard::in_memory().await?;
        bb.ttl_cap = Duration::from_secs(60);

        let item = KnowledgeItem::new(Space::Governance, "agent", "policy", json!({}))
            .with_expiry(Utc::now() + chrono::Duration::days(365));
        let id = bb.add_knowledge(&item).await?;

        let stored = bb
            .get_knowledge(&id, Space::Governance)
            .await?
            .ok_or_else(|| Error::NotFound("item".into()))?;
        let upper_bound = Utc::now() + chrono::Duration::seconds(61);
        assert!(stored.expires_at.is_some_and(|e| e < upper_bound));
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_recovery_requeues_claimed_work() -> Result<()> {
        let bb = Blackboard::in_memory().await?;
        bb.register_agent("slow-1", "ops_agent", &BTreeSet::new()).await?;

        let task = TaskDefinition::new("operational_validation", json!({}), json!({}));
        let id = bb.create_task(&task).await?;
        bb.claim_task(&id, "slow-1").await?;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let timed_out = bb.check_agent_timeouts(Duration::from_millis(10)).await?;
        assert_eq!(timed_out, vec!["slow-1".to_owned()]);

        let recovered = bb.get_task(&id).await?.ok_or_else(|| Error::NotFound("task".into()))?;
        assert_eq!(recovered.status, TaskStatus::Pending);
        assert_eq!(recovered.retries, 1);
        Ok(())
    }
}
