use thiserror::Error;

/// Failures reported by the collaborators the engine consumes.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("resource hierarchy error: {0}")]
    Hierarchy(String),

    #[error("identity error: {0}")]
    Identity(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("collaborator exceeded its time budget of {budget_ms}ms")]
    Timeout { budget_ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
