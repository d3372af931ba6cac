//! `SQLx` row representations for blackboard tables.
//!
//! Infrastructure layer types (`sqlx::FromRow` structs) separated from the
//! domain model. Conversion into `crate::models` types owns all parsing.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{
    AgentRegistration, AgentStatus, ConflictItem, ConflictSeverity, ConflictStatus,
    KnowledgeItem, Space, TaskDefinition, TaskStatus,
};
use crate::{Error, Result};

/// Parse an RFC-3339 column value.
pub(crate) fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Parse(format!("Invalid timestamp '{raw}': {e}")))
}

fn parse_optional_datetime(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_datetime).transpose()
}

fn parse_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| Error::Parse(format!("Invalid JSON payload: {e}")))
}

fn parse_string_list(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| Error::Parse(format!("Invalid string list: {e}")))
}

/// A row in the `knowledge` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct KnowledgeRow {
    pub id: String,
    pub space: String,
    pub agent_id: String,
    pub task_id: Option<String>,
    pub knowledge_type: String,
    pub content: String,
    pub timestamp: String,
    pub priority: i32,
    pub expires_at: Option<String>,
    pub dependencies: String,
    pub tags: String,
}

impl TryFrom<KnowledgeRow> for KnowledgeItem {
    type Error = Error;

    fn try_from(row: KnowledgeRow) -> Result<Self> {
        let tags: Vec<String> = parse_string_list(&row.tags)?;
        Ok(Self {
            id: row.id,
            space: Space::from_str(&row.space)
                .map_err(|_| Error::Parse(format!("Unknown space: {}", row.space)))?,
            agent_id: row.agent_id,
            task_id: row.task_id,
            knowledge_type: row.knowledge_type,
            content: parse_json(&row.content)?,
            timestamp: parse_datetime(&row.timestamp)?,
            priority: row.priority,
            expires_at: parse_optional_datetime(row.expires_at.as_deref())?,
            dependencies: parse_string_list(&row.dependencies)?,
            tags: tags.into_iter().collect::<BTreeSet<_>>(),
        })
    }
}

/// A row in the `tasks` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct TaskRow {
    pub id: String,
    pub task_type: String,
    pub status: String,
    pub agent_id: Option<String>,
    pub priority: i32,
    pub requirements: String,
    pub input_data: String,
    pub output_data: Option<String>,
    pub error_details: Option<String>,
    pub dependencies: String,
    pub deadline: Option<String>,
    pub created_at: String,
    pub claimed_at: Option<String>,
    pub completed_at: Option<String>,
    pub retries: i32,
    pub max_retries: i32,
}

impl TryFrom<TaskRow> for TaskDefinition {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            task_type: row.task_type,
            status: TaskStatus::from_str(&row.status)
                .map_err(|_| Error::Parse(format!("Unknown task status: {}", row.status)))?,
            agent_id: row.agent_id,
            priority: row.priority,
            requirements: parse_json(&row.requirements)?,
            input_data: parse_json(&row.input_data)?,
            output_data: row.output_data.as_deref().map(parse_json).transpose()?,
            error_details: row.error_details.as_deref().map(parse_json).transpose()?,
            dependencies: parse_string_list(&row.dependencies)?,
            deadline: parse_optional_datetime(row.deadline.as_deref())?,
            created_at: parse_datetime(&row.created_at)?,
            claimed_at: parse_optional_datetime(row.claimed_at.as_deref())?,
            completed_at: parse_optional_datetime(row.completed_at.as_deref())?,
            retries: row.retries,
            max_retries: row.max_retries,
        })
    }
}

/// A row in the `conflicts` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ConflictRow {
    pub id: String,
    pub conflict_type: String,
    pub involved_agents: String,
    pub involved_tasks: String,
    pub description: String,
    pub severity: String,
    pub status: String,
    pub resolution_strategy: Option<String>,
    pub resolution_data: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

impl TryFrom<ConflictRow> for ConflictItem {
    type Error = Error;

    fn try_from(row: ConflictRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            conflict_type: row.conflict_type,
            involved_agents: parse_string_list(&row.involved_agents)?,
            involved_tasks: parse_string_list(&row.involved_tasks)?,
            description: row.description,
            severity: ConflictSeverity::from_str(&row.severity)
                .map_err(|_| Error::Parse(format!("Unknown severity: {}", row.severity)))?,
            status: ConflictStatus::from_str(&row.status)
                .map_err(|_| Error::Parse(format!("Unknown conflict status: {}", row.status)))?,
            resolution_strategy: row.resolution_strategy,
            resolution_data: row.resolution_data.as_deref().map(parse_json).transpose()?,
            created_at: parse_datetime(&row.created_at)?,
            resolved_at: parse_optional_datetime(row.resolved_at.as_deref())?,
        })
    }
}

/// A row in the `agents` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct AgentRow {
    pub agent_id: String,
    pub agent_type: String,
    pub capabilities: String,
    pub status: String,
    pub registered_at: String,
    pub last_heartbeat: String,
}

impl TryFrom<AgentRow> for AgentRegistration {
    type Error = Error;

    fn try_from(row: AgentRow) -> Result<Self> {
        let capabilities: Vec<String> = parse_string_list(&row.capabilities)?;
        Ok(Self {
            agent_id: row.agent_id,
            agent_type: row.agent_type,
            capabilities: capabilities.into_iter().collect(),
            status: AgentStatus::from_str(&row.status)
                .map_err(|_| Error::Parse(format!("Unknown agent status: {}", row.status)))?,
            registered_at: parse_datetime(&row.registered_at)?,
            last_heartbeat: parse_datetime(&row.last_heartbeat)?,
        })
    }
}
