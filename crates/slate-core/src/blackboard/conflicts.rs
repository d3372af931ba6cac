//! Conflict storage: severity-ordered tracking of recorded disagreements.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;

use super::rows::ConflictRow;
use crate::models::{ConflictItem, ConflictSeverity, ConflictStatus};
use crate::{Error, Result};

const CONFLICT_COLUMNS: &str = "id, conflict_type, involved_agents, involved_tasks, description,
    severity, status, resolution_strategy, resolution_data, created_at, resolved_at";

/// Store for disagreements between agents or decisions.
#[derive(Debug, Clone)]
pub struct ConflictStore {
    db: SqlitePool,
}

impl ConflictStore {
    pub(crate) const fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record a new conflict.
    pub async fn report(&self, conflict: &ConflictItem) -> Result<String> {
        sqlx::query(
            "INSERT INTO conflicts (id, conflict_type, involved_agents, involved_tasks,
                 description, severity, severity_rank, status, resolution_strategy,
                 resolution_data, created_at, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conflict.id)
        .bind(&conflict.conflict_type)
        .bind(serde_json::to_string(&conflict.involved_agents)?)
        .bind(serde_json::to_string(&conflict.involved_tasks)?)
        .bind(&conflict.description)
        .bind(conflict.severity.to_string())
        .bind(conflict.severity.rank())
        .bind(conflict.status.to_string())
        .bind(&conflict.resolution_strategy)
        .bind(conflict.resolution_data.as_ref().map(serde_json::to_string).transpose()?)
        .bind(conflict.created_at.to_rfc3339())
        .bind(conflict.resolved_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to report conflict: {e}")))?;

        tracing::warn!(
            conflict_id = %conflict.id,
            conflict_type = %conflict.conflict_type,
            severity = %conflict.severity,
            "Conflict reported"
        );
        Ok(conflict.id.clone())
    }

    /// Retrieve a conflict by id.
    pub async fn get(&self, conflict_id: &str) -> Result<Option<ConflictItem>> {
        let row: Option<ConflictRow> =
            sqlx::query_as(&format!("SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE id = ?"))
                .bind(conflict_id)
                .fetch_optional(&self.db)
                .await
                .map_err(|e| Error::Database(format!("Failed to get conflict: {e}")))?;
        row.map(ConflictItem::try_from).transpose()
    }

    /// Move a conflict along its lifecycle, attaching resolution metadata.
    ///
    /// Terminal transitions stamp `resolved_at`.
    pub async fn update_status(
        &self,
        conflict_id: &str,
        status: ConflictStatus,
        resolution_strategy: Option<&str>,
        resolution_data: Option<Value>,
    ) -> Result<()> {
        let conflict = self
            .get(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Conflict not found: {conflict_id}")))?;

        if conflict.status.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "Conflict {conflict_id} is already {}",
                conflict.status
            )));
        }

        let resolved_at = status.is_terminal().then(|| Utc::now().to_rfc3339());
        sqlx::query(
            "UPDATE conflicts SET status = ?,
                 resolution_strategy = COALESCE(?, resolution_strategy),
                 resolution_data = COALESCE(?, resolution_data),
                 resolved_at = COALESCE(?, resolved_at)
             WHERE id = ?",
        )
        .bind(status.to_string())
        .bind(resolution_strategy)
        .bind(resolution_data.as_ref().map(serde_json::to_string).transpose()?)
        .bind(resolved_at)
        .bind(conflict_id)
        .execute(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to update conflict: {e}")))?;

        tracing::info!(conflict_id = %conflict_id, status = %status, "Conflict status updated");
        Ok(())
    }

    /// Open conflicts ordered critical-first, optionally filtered by
    /// severity or involved agent.
    pub async fn open(
        &self,
        severity: Option<ConflictSeverity>,
        agent_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ConflictItem>> {
        let rows: Vec<ConflictRow> = sqlx::query_as(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE status = 'open'
             ORDER BY severity_rank ASC, created_at ASC"
        ))
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to list open conflicts: {e}")))?;

        let mut conflicts = Vec::new();
        for row in rows {
            if conflicts.len() >= limit {
                break;
            }
            let conflict = ConflictItem::try_from(row)?;
            if severity.is_some_and(|s| conflict.severity != s) {
                continue;
            }
            if agent_id.is_some_and(|a| !conflict.involved_agents.iter().any(|ia| ia == a)) {
                continue;
            }
            conflicts.push(conflict);
        }
        Ok(conflicts)
    }

    /// File a decision conflict when agents disagree on the same task.
    ///
    /// Returns the conflict id, or `None` when fewer than two agents voted
    /// or every decision is identical.
    pub async fn detect_decision_conflict(
        &self,
        task_id: &str,
        agent_decisions: &BTreeMap<String, Value>,
    ) -> Result<Option<String>> {
        if agent_decisions.len() < 2 {
            return Ok(None);
        }
        let mut decisions = agent_decisions.values();
        let first = decisions.next();
        if decisions.all(|d| Some(d) == first) {
            return Ok(None);
        }

        let conflict = ConflictItem::new(
            "decision_conflict",
            agent_decisions.keys().cloned().collect(),
            format!("Conflicting decisions on task {task_id}"),
        )
        .with_tasks(vec![task_id.to_owned()]);

        self.report(&conflict).await.map(Some)
    }

    /// Number of conflicts in a given status.
    pub async fn count_by_status(&self, status: ConflictStatus) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conflicts WHERE status = ?")
            .bind(status.to_string())
            .fetch_one(&self.db)
            .await
            .map_err(|e| Error::Database(format!("Failed to count conflicts: {e}")))?;
        Ok(count)
    }
}
