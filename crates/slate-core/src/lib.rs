//! # Slate Core
//!
//! Blackboard coordination substrate for multi-agent governance workflows.
//!
//! A governance request is decomposed into dependent sub-tasks on a shared
//! [`blackboard::Blackboard`], claimed and executed by worker agents
//! through the [`worker::WorkerAgent`] harness, fused into a decision by
//! the [`coordinator::Coordinator`], with disagreements resolved through
//! the [`consensus::ConsensusEngine`]. The blackboard is the only source
//! of cross-agent truth; events are hints.
//!
//! ## Error Handling
//!
//! All fallible operations return `Result<T, Error>`. Use:
//! - `?` operator for propagation
//! - `map`, `and_then` combinators for transformation
//! - `match` / `map_or` / `unwrap_or_else` for defaults

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod blackboard;
pub mod config;
pub mod consensus;
pub mod coordinator;
mod error;
pub mod events;
pub mod models;
pub mod monitor;
pub mod payload;
pub mod validator;
pub mod worker;

pub use blackboard::{Blackboard, BlackboardMetrics};
pub use config::{CoordinationConfig, CoordinationConfigBuilder};
pub use consensus::{
    ConsensusAlgorithm, ConsensusEngine, ConsensusOutcome, ConsensusSession, SessionConfig,
    SessionStatus, Vote, VoteOption, VoterType,
};
pub use coordinator::{
    Coordinator, GovernanceRequest, IntegratedResult, RequestSubmission, RequestType,
};
pub use error::{Error, Result};
pub use events::{EventBus, EventChannel, EventEnvelope};
pub use models::{
    AgentRegistration, AgentStatus, ConflictItem, ConflictSeverity, ConflictStatus,
    KnowledgeItem, Space, TaskDefinition, TaskStatus,
};
pub use monitor::{MonitorSnapshot, PerformanceAlert, PerformanceMonitor};
pub use validator::{AbsentValidator, ConstitutionalValidator, ValidationOutcome};
pub use worker::{TaskHandler, WorkerAgent};

/// Constitutional compliance tag propagated into every produced result.
///
/// Fixed at build time; every result constructor copies it verbatim into
/// its output.
pub const CONSTITUTIONAL_HASH: &str = "cdd01ef066bc6cf2";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compliance_tag_is_fixed() {
        assert_eq!(CONSTITUTIONAL_HASH, "cdd01ef066bc6cf2");
        assert_eq!(CONSTITUTIONAL_HASH.len(), 16);
    }
}
