//! Consensus session model: algorithms, options, votes, configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::CONSTITUTIONAL_HASH;

/// The seven interchangeable voting/arbitration algorithms.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConsensusAlgorithm {
    MajorityVote,
    WeightedVote,
    RankedChoice,
    ConsensusThreshold,
    HierarchicalOverride,
    ConstitutionalPriority,
    ExpertMediation,
}

/// Who cast a vote; drives the hierarchical-override authority scale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VoterType {
    Agent,
    Human,
    HumanExpert,
    Coordinator,
    SeniorAgent,
    AutomatedSystem,
}

impl VoterType {
    /// Fixed authority score for hierarchical override. Plain humans carry
    /// no override authority; they participate through expert mediation.
    #[must_use]
    pub const fn authority(self) -> f64 {
        match self {
            Self::Coordinator => 100.0,
            Self::HumanExpert => 80.0,
            Self::SeniorAgent => 60.0,
            Self::Agent => 40.0,
            Self::AutomatedSystem => 20.0,
            Self::Human => 0.0,
        }
    }

    /// Whether this voter counts as an expert for mediation.
    #[must_use]
    pub const fn is_expert(self) -> bool {
        matches!(self, Self::Human | Self::HumanExpert)
    }
}

/// A candidate outcome in a consensus session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteOption {
    pub id: String,
    pub name: String,
    pub description: String,
    pub proposed_by: String,
    pub supporting_data: Value,
    /// Constitutional compliance score in [0, 1].
    pub constitutional_score: f64,
    pub risk_assessment: Value,
}

impl VoteOption {
    /// Create an option with a fresh id and a neutral constitutional score.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        proposed_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            proposed_by: proposed_by.into(),
            supporting_data: Value::Null,
            constitutional_score: 0.5,
            risk_assessment: Value::Null,
        }
    }

    /// Set the constitutional compliance score.
    #[must_use]
    pub const fn with_constitutional_score(mut self, score: f64) -> Self {
        self.constitutional_score = score;
        self
    }
}

/// A single vote; at most one per voter is retained per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub voter_id: String,
    pub voter_type: VoterType,
    pub option_id: String,
    /// Voter confidence in [0, 1].
    pub confidence: f64,
    pub reasoning: String,
    pub cast_at: DateTime<Utc>,
    /// Non-negative vote weight.
    pub weight: f64,
}

/// Lifecycle state of a session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Escalated,
}

impl SessionStatus {
    /// Check if this is an absorbing state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// Algorithm thresholds; each algorithm reads only its own field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// `weighted_vote`: minimum winner share of total weighted score.
    pub weighted_threshold: f64,
    /// `ranked_choice`: minimum gap-derived confidence.
    pub min_confidence: f64,
    /// `consensus_threshold`: minimum weighted support per participant.
    pub consensus_threshold: f64,
    /// `hierarchical_override`: minimum authority to override.
    pub override_threshold: f64,
    /// `constitutional_priority`: minimum constitutional score to succeed.
    pub min_constitutional_score: f64,
    /// `expert_mediation`: minimum expert agreement share.
    pub expert_consensus_threshold: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            weighted_threshold: 0.5,
            min_confidence: 0.6,
            consensus_threshold: 0.8,
            override_threshold: 60.0,
            min_constitutional_score: 0.7,
            expert_consensus_threshold: 0.7,
        }
    }
}

/// Structured result of running a session's algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub success: bool,
    pub algorithm: ConsensusAlgorithm,
    pub winning_option: Option<VoteOption>,
    pub confidence_score: f64,
    pub reason: Option<String>,
    /// Hints the failure handler dispatches on (`escalate`,
    /// `extend_deadline`, ...).
    pub next_steps: Vec<String>,
    /// Algorithm-specific fields, passed through untyped.
    pub details: Value,
    /// Escalation metadata attached when the session is escalated.
    pub escalation: Option<Value>,
    pub constitutional_hash: String,
}

impl ConsensusOutcome {
    /// A failure outcome with a reason and follow-up hints.
    #[must_use]
    pub fn failure(
        algorithm: ConsensusAlgorithm,
        reason: impl Into<String>,
        next_steps: Vec<String>,
    ) -> Self {
        Self {
            success: false,
            algorithm,
            winning_option: None,
            confidence_score: 0.0,
            reason: Some(reason.into()),
            next_steps,
            details: Value::Null,
            escalation: None,
            constitutional_hash: CONSTITUTIONAL_HASH.to_owned(),
        }
    }
}

/// A scoped voting episode resolving one conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSession {
    pub id: String,
    pub conflict_id: String,
    pub algorithm: ConsensusAlgorithm,
    /// Allowed voter ids.
    pub participants: Vec<String>,
    pub options: Vec<VoteOption>,
    /// Arrival-ordered; at most one vote per voter.
    pub votes: Vec<Vote>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<ConsensusOutcome>,
    pub config: SessionConfig,
}

impl ConsensusSession {
    /// Create an active session for a conflict.
    #[must_use]
    pub fn new(
        conflict_id: impl Into<String>,
        algorithm: ConsensusAlgorithm,
        participants: Vec<String>,
        options: Vec<VoteOption>,
        deadline: DateTime<Utc>,
        config: SessionConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conflict_id: conflict_id.into(),
            algorithm,
            participants,
            options,
            votes: Vec::new(),
            status: SessionStatus::Active,
            created_at: Utc::now(),
            deadline,
            completed_at: None,
            result: None,
            config,
        }
    }

    /// Look up an option by id.
    #[must_use]
    pub fn option(&self, option_id: &str) -> Option<&VoteOption> {
        self.options.iter().find(|opt| opt.id == option_id)
    }
}
