//! Task storage and lifecycle: atomic claiming, validated transitions,
//! dependency-gated availability.

use chrono::Utc;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use super::rows::TaskRow;
use crate::models::{TaskDefinition, TaskStatus};
use crate::{Error, Result};

const TASK_COLUMNS: &str = "id, task_type, status, agent_id, priority, requirements, input_data,
    output_data, error_details, dependencies, deadline, created_at, claimed_at, completed_at,
    retries, max_retries";

/// Store for units of work.
#[derive(Debug, Clone)]
pub struct TaskStore {
    db: SqlitePool,
}

impl TaskStore {
    pub(crate) const fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Persist a new task in `pending` state.
    pub async fn create(&self, task: &TaskDefinition) -> Result<String> {
        sqlx::query(
            "INSERT INTO tasks (id, task_type, status, agent_id, priority, requirements,
                 input_data, output_data, error_details, dependencies, deadline, created_at,
                 claimed_at, completed_at, retries, max_retries)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(&task.task_type)
        .bind(task.status.to_string())
        .bind(&task.agent_id)
        .bind(task.priority)
        .bind(serde_json::to_string(&task.requirements)?)
        .bind(serde_json::to_string(&task.input_data)?)
        .bind(task.output_data.as_ref().map(serde_json::to_string).transpose()?)
        .bind(task.error_details.as_ref().map(serde_json::to_string).transpose()?)
        .bind(serde_json::to_string(&task.dependencies)?)
        .bind(task.deadline.map(|dt| dt.to_rfc3339()))
        .bind(task.created_at.to_rfc3339())
        .bind(task.claimed_at.map(|dt| dt.to_rfc3339()))
        .bind(task.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(task.retries)
        .bind(task.max_retries)
        .execute(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to create task: {e}")))?;

        tracing::debug!(task_id = %task.id, task_type = %task.task_type, "Created task");
        Ok(task.id.clone())
    }

    /// Retrieve a task by id.
    pub async fn get(&self, task_id: &str) -> Result<Option<TaskDefinition>> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
                .bind(task_id)
                .fetch_optional(&self.db)
                .await
                .map_err(|e| Error::Database(format!("Failed to get task: {e}")))?;
        row.map(TaskDefinition::try_from).transpose()
    }

    /// Atomically claim a pending task for an agent.
    ///
    /// The guarded update is a compare-and-swap on the status column: at
    /// most one concurrent caller observes `rows_affected == 1`. Returns
    /// `false` when the task is absent, not pending, or the race was lost.
    pub async fn claim(&self, task_id: &str, agent_id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE tasks SET status = 'claimed', agent_id = ?, claimed_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(agent_id)
        .bind(&now)
        .bind(task_id)
        .execute(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to claim task: {e}")))?;

        let claimed = result.rows_affected() == 1;
        if claimed {
            tracing::debug!(task_id = %task_id, agent_id = %agent_id, "Task claimed");
        }
        Ok(claimed)
    }

    /// Move a claimed or in-progress task along its state machine.
    ///
    /// Only the claimant may progress its own task; terminal moves stamp
    /// `completed_at`, and failures consume a retry.
    pub async fn update_status(
        &self,
        task_id: &str,
        agent_id: &str,
        new_status: TaskStatus,
        output_data: Option<Value>,
        error_details: Option<Value>,
    ) -> Result<()> {
        let task = self
            .get(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Task not found: {task_id}")))?;

        if !task.status.can_progress_to(new_status) {
            return Err(Error::InvalidTransition(format!(
                "Task {task_id} cannot move from {} to {new_status}",
                task.status
            )));
        }
        if task.agent_id.as_deref() != Some(agent_id) {
            return Err(Error::UnauthorizedActor(format!(
                "Task {task_id} is held by {}, not {agent_id}",
                task.agent_id.as_deref().unwrap_or("nobody")
            )));
        }

        let completed_at = new_status
            .is_terminal()
            .then(|| Utc::now().to_rfc3339());
        let retries = if new_status == TaskStatus::Failed {
            task.retries + 1
        } else {
            task.retries
        };

        // Guarded on the old status so a concurrent transition loses cleanly.
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, output_data = COALESCE(?, output_data),
                 error_details = COALESCE(?, error_details),
                 completed_at = COALESCE(?, completed_at), retries = ?
             WHERE id = ? AND status = ?",
        )
        .bind(new_status.to_string())
        .bind(output_data.as_ref().map(serde_json::to_string).transpose()?)
        .bind(error_details.as_ref().map(serde_json::to_string).transpose()?)
        .bind(completed_at)
        .bind(retries)
        .bind(task_id)
        .bind(task.status.to_string())
        .execute(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to update task status: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(Error::InvalidTransition(format!(
                "Task {task_id} transitioned concurrently"
            )));
        }

        tracing::debug!(task_id = %task_id, status = %new_status, "Task status updated");
        Ok(())
    }

    /// Highest-priority pending tasks whose dependencies are all completed.
    pub async fn available(
        &self,
        task_types: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<TaskDefinition>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 'pending'
             ORDER BY priority ASC, created_at ASC"
        ))
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to list pending tasks: {e}")))?;

        let mut available = Vec::new();
        for row in rows {
            if available.len() >= limit {
                break;
            }
            let task = TaskDefinition::try_from(row)?;
            if task_types.is_some_and(|types| !types.contains(&task.task_type)) {
                continue;
            }
            if self.dependencies_completed(&task).await? {
                available.push(task);
            }
        }
        Ok(available)
    }

    /// Whether every dependency of a task has reached `completed`.
    pub async fn dependencies_completed(&self, task: &TaskDefinition) -> Result<bool> {
        for dep_id in &task.dependencies {
            let dep = self.get(dep_id).await?;
            if dep.map_or(true, |d| d.status != TaskStatus::Completed) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Tasks held by an agent, optionally filtered to specific statuses.
    pub async fn agent_tasks(
        &self,
        agent_id: &str,
        statuses: Option<&[TaskStatus]>,
    ) -> Result<Vec<TaskDefinition>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE agent_id = ?
             ORDER BY priority ASC, created_at ASC"
        ))
        .bind(agent_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to list agent tasks: {e}")))?;

        let mut tasks = Vec::new();
        for row in rows {
            let task = TaskDefinition::try_from(row)?;
            if statuses.is_some_and(|wanted| !wanted.contains(&task.status)) {
                continue;
            }
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Recover the outstanding work of a lapsed agent.
    ///
    /// Each `claimed`/`in_progress` task returns to `pending` with a retry
    /// consumed; tasks out of retry budget fail with an `agent_timeout`
    /// error record. Returns the ids of every task touched.
    pub async fn requeue_for_agent(&self, agent_id: &str) -> Result<Vec<String>> {
        let held = self
            .agent_tasks(agent_id, Some(&[TaskStatus::Claimed, TaskStatus::InProgress]))
            .await?;

        let mut touched = Vec::new();
        for task in held {
            let retries = task.retries + 1;
            if retries > task.max_retries {
                let error = serde_json::to_string(&json!({"reason": "agent_timeout"}))?;
                let now = Utc::now().to_rfc3339();
                sqlx::query(
                    "UPDATE tasks SET status = 'failed', error_details = ?, completed_at = ?,
                         retries = ?
                     WHERE id = ? AND status = ?",
                )
                .bind(&error)
                .bind(&now)
                .bind(retries)
                .bind(&task.id)
                .bind(task.status.to_string())
                .execute(&self.db)
                .await
                .map_err(|e| Error::Database(format!("Failed to fail timed-out task: {e}")))?;
                tracing::warn!(task_id = %task.id, agent_id = %agent_id, "Task failed on agent timeout");
            } else {
                sqlx::query(
                    "UPDATE tasks SET status = 'pending', agent_id = NULL, claimed_at = NULL,
                         retries = ?
                     WHERE id = ? AND status = ?",
                )
                .bind(retries)
                .bind(&task.id)
                .bind(task.status.to_string())
                .execute(&self.db)
                .await
                .map_err(|e| Error::Database(format!("Failed to requeue task: {e}")))?;
                tracing::info!(task_id = %task.id, agent_id = %agent_id, "Task requeued on agent timeout");
            }
            touched.push(task.id);
        }
        Ok(touched)
    }

    /// Release a specific claim back to `pending` without consuming a retry.
    ///
    /// Used by graceful worker shutdown; no-op unless the agent still holds
    /// the task in a non-terminal state.
    pub async fn release_claim(&self, task_id: &str, agent_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'pending', agent_id = NULL, claimed_at = NULL
             WHERE id = ? AND agent_id = ? AND status IN ('claimed', 'in_progress')",
        )
        .bind(task_id)
        .bind(agent_id)
        .execute(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to release claim: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of tasks in a given status.
    pub async fn count_by_status(&self, status: TaskStatus) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE status = ?")
            .bind(status.to_string())
            .fetch_one(&self.db)
            .await
            .map_err(|e| Error::Database(format!("Failed to count tasks: {e}")))?;
        Ok(count)
    }
}
