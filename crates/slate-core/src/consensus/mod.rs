//! Consensus engine: operates sessions to a terminal state.
//!
//! Sessions live in process memory (the blackboard records their event
//! trail as knowledge); the engine owns the lifecycle, deadline sweeping,
//! escalation, and metrics.

mod algorithms;
mod session;

pub use session::{
    ConsensusAlgorithm, ConsensusOutcome, ConsensusSession, SessionConfig, SessionStatus, Vote,
    VoteOption, VoterType,
};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};

use crate::blackboard::Blackboard;
use crate::models::{ConflictItem, KnowledgeItem, Space};
use crate::{Error, Result};

/// Engine identity used when emitting session knowledge.
const ENGINE_AGENT_ID: &str = "consensus_engine";

/// Extension applied when a failed session asks for more time.
const DEADLINE_EXTENSION_HOURS: i64 = 24;

/// Aggregate session counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsensusMetrics {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub completed_sessions: usize,
    pub successful_sessions: usize,
    pub escalated_sessions: usize,
    pub success_rate: f64,
    pub algorithm_distribution: BTreeMap<String, usize>,
    pub average_resolution_time_hours: f64,
}

/// Condensed view of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub conflict_id: String,
    pub algorithm: ConsensusAlgorithm,
    pub status: SessionStatus,
    pub participants: Vec<String>,
    pub options_count: usize,
    pub votes_count: usize,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub result: Option<ConsensusOutcome>,
}

/// Coordinates consensus sessions over the blackboard.
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    blackboard: Arc<Blackboard>,
    sessions: Arc<RwLock<HashMap<String, ConsensusSession>>>,
    defaults: SessionConfig,
}

impl ConsensusEngine {
    /// Create an engine bound to a blackboard, with the stock thresholds.
    #[must_use]
    pub fn new(blackboard: Arc<Blackboard>) -> Self {
        Self::with_defaults(blackboard, SessionConfig::default())
    }

    /// Create an engine whose sessions fall back to the given thresholds
    /// when opened without explicit per-session configuration.
    #[must_use]
    pub fn with_defaults(blackboard: Arc<Blackboard>, defaults: SessionConfig) -> Self {
        Self {
            blackboard,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            defaults,
        }
    }

    /// Open a voting session for a conflict. Fractional `deadline_hours`
    /// are honored down to milliseconds.
    pub async fn initiate_consensus(
        &self,
        conflict: &ConflictItem,
        algorithm: ConsensusAlgorithm,
        participants: Vec<String>,
        options: Vec<VoteOption>,
        deadline_hours: f64,
        config: Option<SessionConfig>,
    ) -> Result<String> {
        let deadline = Utc::now() + Duration::milliseconds((deadline_hours * 3_600_000.0) as i64);
        let session = ConsensusSession::new(
            conflict.id.clone(),
            algorithm,
            participants,
            options,
            deadline,
            config.unwrap_or_else(|| self.defaults.clone()),
        );
        let session_id = session.id.clone();
        let snapshot = session.clone();
        self.sessions.write().await.insert(session_id.clone(), session);

        self.emit_session_event(&snapshot, "initiated", None).await?;
        tracing::info!(
            session_id = %session_id,
            conflict_id = %conflict.id,
            algorithm = %algorithm,
            "Consensus session initiated"
        );
        Ok(session_id)
    }

    /// Cast (or replace) a vote. Returns `false` when the session is not
    /// active, the voter is not a participant, or the option is unknown.
    pub async fn cast_vote(
        &self,
        session_id: &str,
        voter_id: &str,
        voter_type: VoterType,
        option_id: &str,
        confidence: f64,
        reasoning: Option<String>,
        weight: Option<f64>,
    ) -> Result<bool> {
        let snapshot = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(session_id) else {
                tracing::warn!(session_id = %session_id, "Vote on unknown session");
                return Ok(false);
            };
            if session.status != SessionStatus::Active {
                tracing::warn!(session_id = %session_id, status = %session.status, "Vote on inactive session");
                return Ok(false);
            }
            if !session.participants.iter().any(|p| p == voter_id) {
                tracing::warn!(session_id = %session_id, voter_id = %voter_id, "Vote from non-participant");
                return Ok(false);
            }
            if session.option(option_id).is_none() {
                tracing::warn!(session_id = %session_id, option_id = %option_id, "Vote for unknown option");
                return Ok(false);
            }

            // Re-casting replaces the prior vote; the latest cast wins.
            session.votes.retain(|v| v.voter_id != voter_id);
            session.votes.push(Vote {
                voter_id: voter_id.to_owned(),
                voter_type,
                option_id: option_id.to_owned(),
                confidence,
                reasoning: reasoning.unwrap_or_default(),
                cast_at: Utc::now(),
                weight: weight.unwrap_or(1.0),
            });
            session.clone()
        };

        self.emit_session_event(
            &snapshot,
            "vote_cast",
            Some(json!({"voter_id": voter_id, "option_id": option_id})),
        )
        .await?;
        tracing::debug!(session_id = %session_id, voter_id = %voter_id, "Vote cast");
        Ok(true)
    }

    /// Run the session's algorithm to a terminal state.
    ///
    /// Idempotent: a session that already reached a terminal state returns
    /// its stored result without further mutation.
    pub async fn execute_consensus(&self, session_id: &str) -> Result<ConsensusOutcome> {
        let (snapshot, outcome) = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| Error::NotFound(format!("Session not found: {session_id}")))?;

            if session.status.is_terminal() {
                let stored = session.result.clone().ok_or_else(|| {
                    Error::InvalidTransition(format!(
                        "Session {session_id} is terminal without a result"
                    ))
                })?;
                return Ok(stored);
            }

            let outcome = algorithms::execute(session);
            session.status = if outcome.success {
                SessionStatus::Completed
            } else {
                SessionStatus::Failed
            };
            session.completed_at = Some(Utc::now());
            session.result = Some(outcome.clone());
            (session.clone(), outcome)
        };

        self.emit_session_event(
            &snapshot,
            "completed",
            Some(json!({"success": outcome.success})),
        )
        .await?;
        if !outcome.success {
            self.handle_failed_session(session_id).await?;
        }
        tracing::info!(
            session_id = %session_id,
            success = outcome.success,
            "Consensus executed"
        );
        Ok(outcome)
    }

    /// Fail every active session past its deadline and run failure
    /// handling on each. Returns the expired session ids.
    pub async fn check_session_deadlines(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let mut expired = Vec::new();
        {
            let mut sessions = self.sessions.write().await;
            for session in sessions.values_mut() {
                if session.status == SessionStatus::Active && now > session.deadline {
                    let mut outcome = ConsensusOutcome::failure(
                        session.algorithm,
                        "Deadline expired",
                        Vec::new(),
                    );
                    outcome.details = json!({"deadline": session.deadline.to_rfc3339()});
                    session.status = SessionStatus::Failed;
                    session.completed_at = Some(now);
                    session.result = Some(outcome);
                    expired.push(session.clone());
                }
            }
        }

        let mut expired_ids = Vec::new();
        for snapshot in expired {
            self.emit_session_event(&snapshot, "expired", None).await?;
            self.handle_failed_session(&snapshot.id).await?;
            tracing::warn!(session_id = %snapshot.id, "Consensus session expired");
            expired_ids.push(snapshot.id);
        }
        Ok(expired_ids)
    }

    /// Mark a session escalated, attaching escalation metadata to its
    /// result. Returns `false` for unknown sessions.
    pub async fn escalate_session(
        &self,
        session_id: &str,
        escalation_type: &str,
        escalation_data: Option<Value>,
    ) -> Result<bool> {
        let escalation = json!({
            "escalation_type": escalation_type,
            "escalation_data": escalation_data.unwrap_or_else(|| json!({})),
            "escalated_at": Utc::now().to_rfc3339(),
        });

        let snapshot = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(session_id) else {
                return Ok(false);
            };
            session.status = SessionStatus::Escalated;
            if session.completed_at.is_none() {
                session.completed_at = Some(Utc::now());
            }
            match &mut session.result {
                Some(result) => result.escalation = Some(escalation.clone()),
                None => {
                    let mut outcome = ConsensusOutcome::failure(
                        session.algorithm,
                        "Escalated before execution",
                        Vec::new(),
                    );
                    outcome.escalation = Some(escalation.clone());
                    session.result = Some(outcome);
                }
            }
            session.clone()
        };

        self.emit_session_event(&snapshot, "escalated", Some(escalation)).await?;
        tracing::info!(session_id = %session_id, escalation_type = %escalation_type, "Session escalated");
        Ok(true)
    }

    /// Dispatch on a failed session's `next_steps` hints.
    async fn handle_failed_session(&self, session_id: &str) -> Result<()> {
        let next_steps = {
            let sessions = self.sessions.read().await;
            let Some(session) = sessions.get(session_id) else {
                return Ok(());
            };
            session.result.as_ref().map(|r| r.next_steps.clone())
        };

        let Some(next_steps) = next_steps else {
            return Ok(());
        };

        let wants = |step: &str| next_steps.iter().any(|s| s == step);
        if next_steps.is_empty() || wants("escalate") || wants("expert_review") {
            self.escalate_session(session_id, "human_review", None).await?;
        } else if wants("add_participants") {
            self.escalate_session(session_id, "expand_participants", None).await?;
        } else if wants("extend_deadline") {
            self.extend_deadline(session_id).await?;
        } else {
            self.escalate_session(session_id, "human_review", None).await?;
        }
        Ok(())
    }

    /// Push the deadline out and reactivate the session. The stored result
    /// is cleared: a live session carries none.
    async fn extend_deadline(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.deadline = session.deadline + Duration::hours(DEADLINE_EXTENSION_HOURS);
            session.status = SessionStatus::Active;
            session.completed_at = None;
            session.result = None;
            tracing::info!(session_id = %session_id, "Session deadline extended");
        }
        Ok(())
    }

    /// Condensed view of one session.
    pub async fn get_session_status(&self, session_id: &str) -> Option<SessionSummary> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(|session| SessionSummary {
            session_id: session.id.clone(),
            conflict_id: session.conflict_id.clone(),
            algorithm: session.algorithm,
            status: session.status,
            participants: session.participants.clone(),
            options_count: session.options.len(),
            votes_count: session.votes.len(),
            created_at: session.created_at,
            deadline: session.deadline,
            result: session.result.clone(),
        })
    }

    /// Full clone of a session, primarily for inspection in tests.
    pub async fn get_session(&self, session_id: &str) -> Option<ConsensusSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Aggregate counters and mean resolution time.
    pub async fn get_consensus_metrics(&self) -> ConsensusMetrics {
        let sessions = self.sessions.read().await;
        let total_sessions = sessions.len();
        if total_sessions == 0 {
            return ConsensusMetrics::default();
        }

        let mut metrics = ConsensusMetrics {
            total_sessions,
            ..ConsensusMetrics::default()
        };
        let mut resolution_hours = Vec::new();
        for session in sessions.values() {
            *metrics
                .algorithm_distribution
                .entry(session.algorithm.to_string())
                .or_insert(0) += 1;
            match session.status {
                SessionStatus::Active => metrics.active_sessions += 1,
                SessionStatus::Escalated => metrics.escalated_sessions += 1,
                SessionStatus::Completed => {
                    metrics.completed_sessions += 1;
                    if session.result.as_ref().is_some_and(|r| r.success) {
                        metrics.successful_sessions += 1;
                    }
                    if let Some(completed_at) = session.completed_at {
                        let elapsed = completed_at - session.created_at;
                        resolution_hours.push(elapsed.num_milliseconds() as f64 / 3_600_000.0);
                    }
                }
                SessionStatus::Failed => {}
            }
        }
        if metrics.completed_sessions > 0 {
            metrics.success_rate =
                metrics.successful_sessions as f64 / metrics.completed_sessions as f64;
        }
        if !resolution_hours.is_empty() {
            metrics.average_resolution_time_hours =
                resolution_hours.iter().sum::<f64>() / resolution_hours.len() as f64;
        }
        metrics
    }

    /// Drop terminal sessions older than the threshold. Returns how many
    /// were removed.
    pub async fn cleanup_old_sessions(&self, max_age_days: i64) -> usize {
        let cutoff = Utc::now() - Duration::days(max_age_days);
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !(s.status.is_terminal() && s.created_at < cutoff));
        before - sessions.len()
    }

    /// Deadline sweeper loop; runs until the shutdown signal arrives.
    pub async fn run_deadline_sweeper(
        &self,
        interval: StdDuration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Deadline sweeper shutting down");
                    break;
                }
                () = tokio::time::sleep(interval) => {
                    if let Err(e) = self.check_session_deadlines().await {
                        tracing::error!(error = %e, "Deadline sweep failed");
                    }
                }
            }
        }
    }

    /// Record a session transition in the coordination space. Datetimes in
    /// the payload are ISO-8601 strings.
    async fn emit_session_event(
        &self,
        session: &ConsensusSession,
        event_type: &str,
        event_data: Option<Value>,
    ) -> Result<()> {
        let item = KnowledgeItem::new(
            Space::Coordination,
            ENGINE_AGENT_ID,
            "consensus_session_event",
            json!({
                "session_id": session.id,
                "conflict_id": session.conflict_id,
                "event_type": event_type,
                "event_data": event_data.unwrap_or_else(|| json!({})),
                "session_status": session.status,
                "algorithm": session.algorithm,
                "participants_count": session.participants.len(),
                "votes_count": session.votes.len(),
                "timestamp": Utc::now().to_rfc3339(),
            }),
        )
        .with_priority(2)
        .with_tags(["consensus", "coordination", event_type]);

        self.blackboard.add_knowledge(&item).await?;
        Ok(())
    }
}
