//! permgate policy engine
//!
//! Decides whether a subject may perform an action on a resource, given
//! scoped grants stored in a [`PermissionStore`], the resource's ancestor
//! chain and the request context.
//!
//! Key features:
//! - Deny-overrides combining; among allows the most specific scope wins,
//!   then priority, then recency
//! - Inheritance down the Document < Folder < Project < Department <
//!   Organization < Global containment chain
//! - Typed conditions and constraints that fail closed on unknown fields
//! - Fail-closed collaborator handling: errors deny, and lookups that
//!   outlive their budget are abandoned and deny with a timeout
//! - Optimistically versioned store with batch administration

pub mod action;
pub mod bulk;
pub mod condition;
pub mod context;
pub mod deadline;
pub mod directory;
pub mod engine;
pub mod error;
pub mod rule;
pub mod scope;
pub mod store;
pub mod types;
pub mod validation;

// Re-export primary types for convenience
pub use action::{
    Action, DocumentAction, FolderAction, GlobalAction, ReportAction, SystemAction,
    WorkflowAction,
};
pub use condition::{evaluate_condition, evaluate_constraint, ConditionEvaluator};
pub use context::{ContextField, ContextView, FieldValue};
pub use deadline::call_with_deadline;
pub use directory::{HierarchyLink, InMemoryDirectory, InMemoryHierarchy, Membership};
pub use engine::{AuditSink, InMemoryAuditSink, PermissionEngine, TracingAuditSink};
pub use error::{PermissionError, PermissionErrorKind, PermissionResult};
pub use scope::{ChainError, ScopeChain, ScopeMatch, ScopeResolver};
pub use store::{Extension, PermissionStore};
pub use types::{
    BatchItemResult, BatchOperationResult, BulkOperation, BulkParams, Condition,
    ConditionOperator, Constraint, ConstraintType, CreatePermissionInput, Decision,
    DecisionReason, Effect, EngineConfig, EvaluationContext, InheritanceType, Permission,
    PermissionAuditEvent, PermissionAuditEventKind, PermissionMetadata, PermissionPatch,
    RoleDefault, TimeoutConfig, DEFAULT_PRIORITY, MAX_BATCH_SIZE, MAX_PRIORITY,
};
pub use validation::{validate_context, validate_permission};
