//! Knowledge item storage: priority-ordered, tagged, TTL-honest.

use std::collections::BTreeSet;

use chrono::Utc;
use sqlx::SqlitePool;

use super::rows::KnowledgeRow;
use crate::models::{KnowledgeItem, Space};
use crate::{Error, Result};

/// Store for published facts, partitioned by [`Space`].
#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    db: SqlitePool,
}

impl KnowledgeStore {
    pub(crate) const fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Insert a knowledge item into its space.
    ///
    /// Items are immutable after publish; re-inserting an existing id is an
    /// error.
    pub async fn add(&self, item: &KnowledgeItem) -> Result<String> {
        let tags: Vec<&str> = item.tags.iter().map(String::as_str).collect();
        sqlx::query(
            "INSERT INTO knowledge (id, space, agent_id, task_id, knowledge_type, content,
                 timestamp, priority, expires_at, dependencies, tags)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id)
        .bind(item.space.to_string())
        .bind(&item.agent_id)
        .bind(&item.task_id)
        .bind(&item.knowledge_type)
        .bind(serde_json::to_string(&item.content)?)
        .bind(item.timestamp.to_rfc3339())
        .bind(item.priority)
        .bind(item.expires_at.map(|dt| dt.to_rfc3339()))
        .bind(serde_json::to_string(&item.dependencies)?)
        .bind(serde_json::to_string(&tags)?)
        .execute(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to add knowledge: {e}")))?;

        tracing::debug!(knowledge_id = %item.id, space = %item.space, "Added knowledge item");
        Ok(item.id.clone())
    }

    /// Retrieve a knowledge item by id within a space.
    ///
    /// Expired items are absent even before the purge sweep runs.
    pub async fn get(&self, knowledge_id: &str, space: Space) -> Result<Option<KnowledgeItem>> {
        let now = Utc::now().to_rfc3339();
        let row: Option<KnowledgeRow> = sqlx::query_as(
            "SELECT id, space, agent_id, task_id, knowledge_type, content, timestamp,
                    priority, expires_at, dependencies, tags
             FROM knowledge
             WHERE id = ? AND space = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(knowledge_id)
        .bind(space.to_string())
        .bind(&now)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to get knowledge: {e}")))?;

        row.map(KnowledgeItem::try_from).transpose()
    }

    /// Query a space's priority queue with filters.
    ///
    /// The first `limit` items are taken in priority order, then filtered:
    /// the result may be shorter than `limit` even when later items match.
    /// Tag filtering is subset match: every requested tag must be present.
    pub async fn query(
        &self,
        space: Space,
        knowledge_type: Option<&str>,
        agent_id: Option<&str>,
        tags: Option<&BTreeSet<String>>,
        limit: i64,
    ) -> Result<Vec<KnowledgeItem>> {
        let now = Utc::now().to_rfc3339();
        let rows: Vec<KnowledgeRow> = sqlx::query_as(
            "SELECT id, space, agent_id, task_id, knowledge_type, content, timestamp,
                    priority, expires_at, dependencies, tags
             FROM knowledge
             WHERE space = ? AND (expires_at IS NULL OR expires_at > ?)
             ORDER BY priority ASC, timestamp ASC
             LIMIT ?",
        )
        .bind(space.to_string())
        .bind(&now)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to query knowledge: {e}")))?;

        let mut results = Vec::new();
        for row in rows {
            let item = KnowledgeItem::try_from(row)?;
            if knowledge_type.is_some_and(|kt| item.knowledge_type != kt) {
                continue;
            }
            if agent_id.is_some_and(|aid| item.agent_id != aid) {
                continue;
            }
            if tags.is_some_and(|wanted| !wanted.iter().all(|t| item.tags.contains(t))) {
                continue;
            }
            results.push(item);
        }
        Ok(results)
    }

    /// Remove a knowledge item. Returns whether a row was deleted.
    pub async fn remove(&self, knowledge_id: &str, space: Space) -> Result<bool> {
        let result = sqlx::query("DELETE FROM knowledge WHERE id = ? AND space = ?")
            .bind(knowledge_id)
            .bind(space.to_string())
            .execute(&self.db)
            .await
            .map_err(|e| Error::Database(format!("Failed to remove knowledge: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete rows past their expiry. Best-effort; reads are already
    /// expiry-guarded, so this only reclaims storage.
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("DELETE FROM knowledge WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(&now)
            .execute(&self.db)
            .await
            .map_err(|e| Error::Database(format!("Failed to purge expired knowledge: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Number of live items in a space.
    pub async fn count(&self, space: Space) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM knowledge
             WHERE space = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(space.to_string())
        .bind(&now)
        .fetch_one(&self.db)
        .await
        .map_err(|e| Error::Database(format!("Failed to count knowledge: {e}")))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use chrono::Duration;
    use serde_json::json;

    async fn store() -> Result<KnowledgeStore> {
        let bb = Blackboard::in_memory().await?;
        Ok(KnowledgeStore::new(bb.pool().clone()))
    }

    #[tokio::test]
    async fn test_add_and_get_round_trip() -> Result<()> {
        let store = store().await?;
        let item = KnowledgeItem::new(
            Space::Governance,
            "ethics_agent",
            "policy",
            json!({"rule": "no_harm", "confidence": 0.95}),
        )
        .with_tags(["ethics"]);

        let id = store.add(&item).await?;
        let fetched = store
            .get(&id, Space::Governance)
            .await?
            .ok_or_else(|| Error::NotFound("item".into()))?;

        assert_eq!(fetched.agent_id, "ethics_agent");
        assert_eq!(fetched.content["rule"], "no_harm");
        assert!(fetched.tags.contains("ethics"));
        Ok(())
    }

    #[tokio::test]
    async fn test_get_wrong_space_is_absent() -> Result<()> {
        let store = store().await?;
        let item = KnowledgeItem::new(Space::Governance, "a", "policy", json!({}));
        let id = store.add(&item).await?;

        assert!(store.get(&id, Space::Compliance).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_item_is_absent_from_reads() -> Result<()> {
        let store = store().await?;
        let item = KnowledgeItem::new(Space::Performance, "monitor", "metric", json!({}))
            .with_expiry(Utc::now() - Duration::seconds(1));
        let id = store.add(&item).await?;

        assert!(store.get(&id, Space::Performance).await?.is_none());
        let results = store.query(Space::Performance, None, None, None, 100).await?;
        assert!(results.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_purge_expired_removes_rows() -> Result<()> {
        let store = store().await?;
        let expired = KnowledgeItem::new(Space::Performance, "monitor", "metric", json!({}))
            .with_expiry(Utc::now() - Duration::seconds(1));
        let live = KnowledgeItem::new(Space::Performance, "monitor", "metric", json!({}));
        store.add(&expired).await?;
        store.add(&live).await?;

        assert_eq!(store.purge_expired().await?, 1);
        assert_eq!(store.count(Space::Performance).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_query_orders_by_priority() -> Result<()> {
        let store = store().await?;
        for (priority, kind) in [(3, "low"), (1, "high"), (2, "mid")] {
            let item = KnowledgeItem::new(Space::Coordination, "agent", kind, json!({}))
                .with_priority(priority);
            store.add(&item).await?;
        }

        let results = store.query(Space::Coordination, None, None, None, 100).await?;
        let kinds: Vec<&str> = results.iter().map(|i| i.knowledge_type.as_str()).collect();
        assert_eq!(kinds, vec!["high", "mid", "low"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_query_tags_are_subset_match() -> Result<()> {
        let store = store().await?;
        let both = KnowledgeItem::new(Space::Governance, "agent", "analysis", json!({}))
            .with_tags(["ethics", "transparency"]);
        let one = KnowledgeItem::new(Space::Governance, "agent", "analysis", json!({}))
            .with_tags(["ethics"]);
        store.add(&both).await?;
        store.add(&one).await?;

        let wanted: BTreeSet<String> =
            ["ethics".to_owned(), "transparency".to_owned()].into_iter().collect();
        let results = store
            .query(Space::Governance, None, None, Some(&wanted), 100)
            .await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results.first().map(|i| i.id.as_str()), Some(both.id.as_str()));
        Ok(())
    }

    #[tokio::test]
    async fn test_query_filters_apply_after_limit() -> Result<()> {
        let store = store().await?;
        // Two high-priority items of the wrong type fill the window.
        for _ in 0..2 {
            let item = KnowledgeItem::new(Space::Governance, "agent", "other", json!({}))
                .with_priority(1);
            store.add(&item).await?;
        }
        let wanted = KnowledgeItem::new(Space::Governance, "agent", "target", json!({}))
            .with_priority(5);
        store.add(&wanted).await?;

        // Limit smaller than the queue: the low-priority match never enters
        // the window, so the filtered result is empty.
        let results = store.query(Space::Governance, Some("target"), None, None, 2).await?;
        assert!(results.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_reports_absence() -> Result<()> {
        let store = store().await?;
        let item = KnowledgeItem::new(Space::Governance, "agent", "policy", json!({}));
        let id = store.add(&item).await?;

        assert!(store.remove(&id, Space::Governance).await?);
        assert!(!store.remove(&id, Space::Governance).await?);
        Ok(())
    }
}
