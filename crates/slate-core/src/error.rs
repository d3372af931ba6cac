//! Error types for slate-core

use thiserror::Error;

/// Result type alias for slate-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur across the coordination substrate.
///
/// Each variant is a semantic category, not a transport detail: callers
/// dispatch on the category to decide whether to retry, surface, or treat
/// the failure as a caller bug.
#[derive(Debug, Error)]
pub enum Error {
    /// Referenced entity is absent: expired, deleted, or never existed.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attempted lifecycle move violates a state machine. Caller bug.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Action originator does not own the entity it is mutating.
    #[error("Unauthorized actor: {0}")]
    UnauthorizedActor(String),

    /// Claim retry bound reached; equivalent to losing the race.
    #[error("Contention exhausted: {0}")]
    ContentionExhausted(String),

    /// Underlying store unavailable or timed out. Retriable with backoff.
    #[error("Database error: {0}")]
    Database(String),

    /// A domain handler raised while processing a task.
    #[error("Handler failure: {0}")]
    Handler(String),

    /// A consensus session ran past its deadline.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Stored data could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Stable machine-readable code for failure payloads.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::UnauthorizedActor(_) => "UNAUTHORIZED_ACTOR",
            Self::ContentionExhausted(_) => "CONTENTION_EXHAUSTED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Handler(_) => "HANDLER_FAILURE",
            Self::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            Self::Parse(_) => "PARSE_ERROR",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }

    /// Whether a caller tolerating duplicate idempotent attempts may retry.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
