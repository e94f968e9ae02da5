use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConductorError {
    #[error("Sequence not found: {0}")]
    SequenceNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    #[error("Resource rejected: {resource_id}: {reason}")]
    ResourceRejected { resource_id: String, reason: String },

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Sequence missing at drain: {0}")]
    MissingAtDrain(String),

    #[error("Preempted by higher priority")]
    Preempted,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ConductorError>;
