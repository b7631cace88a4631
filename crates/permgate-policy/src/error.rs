use permgate_core::{PermissionId, RecordVersion};
use std::fmt;
use thiserror::Error;

/// Single error enum for all permission store and engine operations.
///
/// `evaluate()` never returns this type: evaluation anomalies become a
/// Deny decision with a diagnostic detail instead. Audit sink failures are
/// logged and never surface as an error either.
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("validation error: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("permission not found: {0}")]
    NotFound(PermissionId),

    #[error("permission {id} was modified concurrently (expected {expected}, found {actual})")]
    Conflict {
        id: PermissionId,
        expected: RecordVersion,
        actual: RecordVersion,
    },

    #[error("constraint evaluation error: {0}")]
    ConstraintEvaluation(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl PermissionError {
    pub fn validation(message: impl Into<String>) -> Self {
        PermissionError::Validation(vec![message.into()])
    }

    pub fn kind(&self) -> PermissionErrorKind {
        match self {
            PermissionError::Validation(_) => PermissionErrorKind::Validation,
            PermissionError::NotFound(_) => PermissionErrorKind::NotFound,
            PermissionError::Conflict { .. } => PermissionErrorKind::Conflict,
            PermissionError::ConstraintEvaluation(_) => PermissionErrorKind::ConstraintEvaluation,
            PermissionError::InvalidRequest(_) => PermissionErrorKind::InvalidRequest,
            PermissionError::Storage(_) => PermissionErrorKind::Storage,
        }
    }
}

/// Discriminator for PermissionError variants, used in batch results and
/// by callers mapping errors onto their own transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionErrorKind {
    Validation,
    NotFound,
    Conflict,
    ConstraintEvaluation,
    InvalidRequest,
    Storage,
}

impl PermissionErrorKind {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            PermissionErrorKind::Validation => "VALIDATION_ERROR",
            PermissionErrorKind::NotFound => "NOT_FOUND",
            PermissionErrorKind::Conflict => "CONFLICT",
            PermissionErrorKind::ConstraintEvaluation => "CONSTRAINT_EVALUATION_ERROR",
            PermissionErrorKind::InvalidRequest => "INVALID_REQUEST",
            PermissionErrorKind::Storage => "STORAGE_ERROR",
        }
    }
}

impl fmt::Display for PermissionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

pub type PermissionResult<T> = Result<T, PermissionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display_joins_issues() {
        let err = PermissionError::Validation(vec![
            "priority must be at most 100".into(),
            "scope global requires no resource id".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "validation error: priority must be at most 100; scope global requires no resource id"
        );
    }

    #[test]
    fn test_conflict_display() {
        let err = PermissionError::Conflict {
            id: PermissionId::new("p1"),
            expected: RecordVersion(2),
            actual: RecordVersion(3),
        };
        assert_eq!(
            err.to_string(),
            "permission p1 was modified concurrently (expected v2, found v3)"
        );
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(
            PermissionError::NotFound(PermissionId::new("x")).kind().code(),
            "NOT_FOUND"
        );
        assert_eq!(
            PermissionError::validation("bad").kind().code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(PermissionErrorKind::Conflict.to_string(), "CONFLICT");
    }

    #[test]
    fn test_every_kind_has_a_distinct_code() {
        let kinds = [
            PermissionErrorKind::Validation,
            PermissionErrorKind::NotFound,
            PermissionErrorKind::Conflict,
            PermissionErrorKind::ConstraintEvaluation,
            PermissionErrorKind::InvalidRequest,
            PermissionErrorKind::Storage,
        ];
        let codes: std::collections::HashSet<_> = kinds.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), kinds.len());
        assert_eq!(
            PermissionError::Storage("lock poisoned".into()).kind().code(),
            "STORAGE_ERROR"
        );
    }
}
