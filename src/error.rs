//! Error types for the crew health service

use std::time::Duration;
use thiserror::Error;

/// Crate-level error
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Fixture error: {0}")]
    Fixture(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<::config::ConfigError> for HealthError {
    fn from(e: ::config::ConfigError) -> Self {
        HealthError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HealthError>;

/// Result of a crew store operation
pub type DataResult<T> = std::result::Result<T, DataError>;

/// Failures while talking to the identity provider or resolving a session
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Identity provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Sign-out failed: {0}")]
    SignOutFailed(String),

    #[error("Unknown crew member: {0}")]
    UnknownCrewMember(String),

    #[error("Session storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for AuthError {
    fn from(e: StorageError) -> Self {
        AuthError::Storage(e.to_string())
    }
}

/// Crew store operation failures. None of them leave partial writes behind.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataError {
    #[error("Crew member not found: {0}")]
    CrewNotFound(String),

    #[error("Task {task_id} not found for crew member {crew_id}")]
    TaskNotFound { crew_id: String, task_id: String },

    #[error("Task title cannot be empty")]
    EmptyTitle,

    #[error("Query message cannot be empty")]
    EmptyMessage,

    #[error("Chat message cannot be empty")]
    EmptyChatMessage,

    #[error("Unknown vital sign: {0}")]
    UnknownVital(String),

    #[error("Sender {0} is reserved for alerts")]
    ReservedSender(String),
}

impl DataError {
    /// Whether the failure is a missing entity rather than rejected input
    pub fn is_not_found(&self) -> bool {
        matches!(self, DataError::CrewNotFound(_) | DataError::TaskNotFound { .. })
    }
}

/// Key/value persistence failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
