//! Agent registry with heartbeat tracking.
//!
//! Tracks active agents, using heartbeat timestamps to detect lapsed ones.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;

use super::rows::AgentRow;
use crate::models::AgentRegistration;
use crate::{Error, Result};

const AGENT_COLUMNS: &str =
    "agent_id, agent_type, capabilities, status, registered_at, last_heartbeat";

/// Registry of agents known to the blackboard.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    db: SqlitePool,
}

impl AgentRegistry {
    pub(crate) const fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Register an agent (insert or reactivate) with its capabilities.
    pub async fn register(
        &self,
        agent_id: &str,
        agent_type: &str,
        capabilities: &BTreeSet<String>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let caps: Vec<&str> = capabilities.iter().map(String::as_str).collect();
        sqlx::query(
            "INSERT INTO agents (agent_id, agent_type, capabilities, status, registered_at,
                 last_heartbeat)
             VALUES (?, ?, ?, 'active', ?, ?)
             ON CONFLICT(agent_id) DO UPDATE SET
                 agent_type = excluded.agent_type,
                 capabilities = excluded.capabilities,
                 status = 'active',
                 last_heartbeat = excluded.last_heartbeat",
        )
        .bind(agent_id)
        .bind(agent_type)
        .bind(serde_json::to_string(&caps)?)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to register agent: {e}")))?;

        tracing::info!(agent_id = %agent_id, agent_type = %agent_type, "Agent registered");
        Ok(())
    }

    /// Refresh an agent's heartbeat timestamp.
    pub async fn heartbeat(&self, agent_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE agents SET last_heartbeat = ? WHERE agent_id = ?")
            .bind(&now)
            .bind(agent_id)
            .execute(&self.db)
            .await
            .map_err(|e| Error::Database(format!("Failed to heartbeat agent: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Agent not found: {agent_id}")));
        }
        Ok(())
    }

    /// Retrieve an agent's registration record.
    pub async fn get(&self, agent_id: &str) -> Result<Option<AgentRegistration>> {
        let row: Option<AgentRow> =
            sqlx::query_as(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = ?"))
                .bind(agent_id)
                .fetch_optional(&self.db)
                .await
                .map_err(|e| Error::Database(format!("Failed to get agent: {e}")))?;
        row.map(AgentRegistration::try_from).transpose()
    }

    /// Ids of all currently active agents.
    pub async fn active(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT agent_id FROM agents WHERE status = 'active' ORDER BY agent_id")
                .fetch_all(&self.db)
                .await
                .map_err(|e| Error::Database(format!("Failed to list active agents: {e}")))?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Active agents whose capabilities cover a task type.
    pub async fn capable_of(&self, task_type: &str) -> Result<Vec<String>> {
        let rows: Vec<AgentRow> =
            sqlx::query_as(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE status = 'active'"))
                .fetch_all(&self.db)
                .await
                .map_err(|e| Error::Database(format!("Failed to list agents: {e}")))?;

        let mut capable = Vec::new();
        for row in rows {
            let agent = AgentRegistration::try_from(row)?;
            if agent.capabilities.contains(task_type) {
                capable.push(agent.agent_id);
            }
        }
        Ok(capable)
    }

    /// Deactivate agents whose heartbeat lapsed beyond `timeout` and return
    /// their ids. The caller owns recovery of their outstanding tasks.
    pub async fn check_timeouts(&self, timeout: Duration) -> Result<Vec<String>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout)
                .map_err(|e| Error::InvalidConfig(format!("Timeout out of range: {e}")))?;
        let cutoff_str = cutoff.to_rfc3339();

        let lapsed: Vec<(String,)> = sqlx::query_as(
            "SELECT agent_id FROM agents WHERE status = 'active' AND last_heartbeat < ?",
        )
        .bind(&cutoff_str)
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to scan agent timeouts: {e}")))?;

        let mut timed_out = Vec::new();
        for (agent_id,) in lapsed {
            sqlx::query("UPDATE agents SET status = 'inactive' WHERE agent_id = ?")
                .bind(&agent_id)
                .execute(&self.db)
                .await
                .map_err(|e| Error::Database(format!("Failed to deactivate agent: {e}")))?;
            tracing::warn!(agent_id = %agent_id, "Agent heartbeat lapsed, marked inactive");
            timed_out.push(agent_id);
        }
        Ok(timed_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;

    async fn registry() -> Result<AgentRegistry> {
        let bb = Blackboard::in_memory().await?;
        Ok(AgentRegistry::new(bb.pool().clone()))
    }

    fn caps(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| (*s).to_owned()).collect()
    }

    #[tokio::test]
    async fn test_register_creates_active_agent() -> Result<()> {
        let registry = registry().await?;
        registry
            .register("ethics-1", "ethics_agent", &caps(&["ethical_analysis"]))
            .await?;

        let active = registry.active().await?;
        assert_eq!(active, vec!["ethics-1".to_owned()]);

        let agent = registry
            .get("ethics-1")
            .await?
            .ok_or_else(|| Error::NotFound("agent".into()))?;
        assert_eq!(agent.status, AgentStatus::Active);
        assert!(agent.capabilities.contains("ethical_analysis"));
        Ok(())
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_agent_is_not_found() -> Result<()> {
        let registry = registry().await?;
        let result = registry.heartbeat("ghost").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_heartbeat_advances_last_seen() -> Result<()> {
        let registry = registry().await?;
        registry.register("a-1", "ethics_agent", &caps(&[])).await?;
        let before = registry
            .get("a-1")
            .await?
            .ok_or_else(|| Error::NotFound("agent".into()))?
            .last_heartbeat;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        registry.heartbeat("a-1").await?;

        let after = registry
            .get("a-1")
            .await?
            .ok_or_else(|| Error::NotFound("agent".into()))?
            .last_heartbeat;
        assert!(after > before);
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_scan_deactivates_lapsed_agents() -> Result<()> {
        let registry = registry().await?;
        registry.register("slow", "ops_agent", &caps(&[])).await?;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        registry.register("fresh", "ops_agent", &caps(&[])).await?;

        let timed_out = registry.check_timeouts(Duration::from_millis(15)).await?;
        assert_eq!(timed_out, vec!["slow".to_owned()]);
        assert_eq!(registry.active().await?, vec!["fresh".to_owned()]);

        // Re-registration reactivates.
        registry.register("slow", "ops_agent", &caps(&[])).await?;
        assert_eq!(registry.active().await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_capable_of_matches_capabilities() -> Result<()> {
        let registry = registry().await?;
        registry
            .register("legal-1", "legal_agent", &caps(&["legal_compliance", "policy_analysis"]))
            .await?;
        registry
            .register("ops-1", "operational_agent", &caps(&["operational_validation"]))
            .await?;

        assert_eq!(registry.capable_of("legal_compliance").await?, vec!["legal-1".to_owned()]);
        assert!(registry.capable_of("bias_assessment").await?.is_empty());
        Ok(())
    }
}
