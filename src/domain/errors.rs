use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("stream already active: {0}")]
    AlreadyActive(String),
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("detector error: {0}")]
    Detector(String),
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;
