use permgate_core::{
    PermissionId, RecordVersion, ResourceId, ResourceType, Scope, SubjectId, SubjectRef, Timestamp,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::action::Action;

pub const DEFAULT_PRIORITY: u8 = 50;
pub const MAX_PRIORITY: u8 = 100;

// ---------------------------------------------------------------------------
// Effect / InheritanceType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

/// How far below its anchor node a permission reaches.
///
/// Hops count containment steps from the evaluated resource: the resource
/// itself is 0, its immediate container 1, the container's parent 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritanceType {
    /// The anchor node itself and its direct members (hops <= 1).
    #[default]
    None,
    /// One level further down (hops <= 2).
    Partial,
    /// The whole subtree.
    Full,
}

impl InheritanceType {
    pub fn max_hops(&self) -> usize {
        match self {
            InheritanceType::None => 1,
            InheritanceType::Partial => 2,
            InheritanceType::Full => usize::MAX,
        }
    }
}

// ---------------------------------------------------------------------------
// Conditions and constraints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Contains,
    Regex,
}

/// A single field/operator/value comparison against the evaluation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: serde_json::Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            case_sensitive: false,
        }
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintType {
    Time,
    Ip,
    Location,
    Device,
    Custom,
}

impl fmt::Display for ConstraintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConstraintType::Time => "time",
            ConstraintType::Ip => "ip",
            ConstraintType::Location => "location",
            ConstraintType::Device => "device",
            ConstraintType::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// A typed bundle of conditions; all must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(rename = "type")]
    pub constraint_type: ConstraintType,
    pub conditions: Vec<Condition>,
}

impl Constraint {
    pub fn new(constraint_type: ConstraintType, conditions: Vec<Condition>) -> Self {
        Self {
            constraint_type,
            conditions,
        }
    }
}

// ---------------------------------------------------------------------------
// Permission
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub approved_by: Option<SubjectId>,
    #[serde(default)]
    pub created_by: Option<SubjectId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub revoked_at: Option<Timestamp>,
}

/// A stored, validated permission record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: PermissionId,
    pub name: Option<String>,
    pub description: Option<String>,
    /// The action tag, e.g. `document:read`.
    #[serde(rename = "type")]
    pub action: Action,
    pub effect: Effect,
    pub scope: Scope,
    pub subject: SubjectRef,
    pub resource_type: ResourceType,
    pub resource_id: Option<ResourceId>,
    pub inheritance: InheritanceType,
    pub constraints: Vec<Constraint>,
    pub conditions: Vec<Condition>,
    pub valid_from: Option<Timestamp>,
    pub valid_until: Option<Timestamp>,
    pub is_active: bool,
    pub priority: u8,
    pub metadata: PermissionMetadata,
    pub version: RecordVersion,
}

impl Permission {
    /// Materialise a record from grant input, applying defaults.
    /// The result still has to pass `validation::validate_permission`.
    pub fn from_input(input: CreatePermissionInput, id: PermissionId, now: Timestamp) -> Self {
        Self {
            id,
            name: input.name,
            description: input.description,
            action: input.action,
            effect: input.effect,
            scope: input.scope,
            subject: input.subject,
            resource_type: input.resource_type.unwrap_or_else(|| input.action.resource_type()),
            resource_id: input.resource_id,
            inheritance: input.inheritance.unwrap_or_default(),
            constraints: input.constraints,
            conditions: input.conditions,
            valid_from: input.valid_from,
            valid_until: input.valid_until,
            is_active: input.is_active.unwrap_or(true),
            priority: input.priority.unwrap_or(DEFAULT_PRIORITY),
            metadata: PermissionMetadata {
                tags: input.tags,
                category: input.category,
                reason: input.reason,
                approved_by: input.approved_by,
                created_by: input.created_by,
                created_at: now,
                updated_at: now,
                revoked_at: None,
            },
            version: RecordVersion::initial(),
        }
    }

    /// Whether `at` falls inside the validity window (bounds inclusive).
    pub fn is_within_validity(&self, at: Timestamp) -> bool {
        if let Some(from) = self.valid_from {
            if at < from {
                return false;
            }
        }
        if let Some(until) = self.valid_until {
            if at > until {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// CreatePermissionInput: admin grant request
// ---------------------------------------------------------------------------

/// Grant request as received at the system boundary.
///
/// `resource_type` may be omitted; it then defaults to the action's
/// namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePermissionInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub action: Action,
    pub effect: Effect,
    pub scope: Scope,
    pub subject: SubjectRef,
    #[serde(default)]
    pub resource_type: Option<ResourceType>,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
    #[serde(default)]
    pub inheritance: Option<InheritanceType>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub valid_from: Option<Timestamp>,
    #[serde(default)]
    pub valid_until: Option<Timestamp>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub approved_by: Option<SubjectId>,
    #[serde(default)]
    pub created_by: Option<SubjectId>,
}

impl CreatePermissionInput {
    pub fn new(subject: SubjectRef, action: Action, effect: Effect, scope: Scope) -> Self {
        Self {
            name: None,
            description: None,
            action,
            effect,
            scope,
            subject,
            resource_type: None,
            resource_id: None,
            inheritance: None,
            constraints: Vec::new(),
            conditions: Vec::new(),
            valid_from: None,
            valid_until: None,
            is_active: None,
            priority: None,
            tags: Vec::new(),
            category: None,
            reason: None,
            approved_by: None,
            created_by: None,
        }
    }

    pub fn allow(subject: SubjectRef, action: Action, scope: Scope) -> Self {
        Self::new(subject, action, Effect::Allow, scope)
    }

    pub fn deny(subject: SubjectRef, action: Action, scope: Scope) -> Self {
        Self::new(subject, action, Effect::Deny, scope)
    }

    pub fn on(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(ResourceId::new(resource_id));
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(resource_type);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_inheritance(mut self, inheritance: InheritanceType) -> Self {
        self.inheritance = Some(inheritance);
        self
    }

    pub fn valid_between(mut self, from: Option<Timestamp>, until: Option<Timestamp>) -> Self {
        self.valid_from = from;
        self.valid_until = until;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = Some(false);
        self
    }
}

// ---------------------------------------------------------------------------
// PermissionPatch: partial update
// ---------------------------------------------------------------------------

/// Partial update. For the nullable fields, an absent key leaves the value
/// untouched while an explicit `null` clears it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionPatch {
    #[serde(default, deserialize_with = "double_option")]
    pub name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub effect: Option<Effect>,
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default, deserialize_with = "double_option")]
    pub resource_id: Option<Option<ResourceId>>,
    #[serde(default)]
    pub inheritance: Option<InheritanceType>,
    #[serde(default)]
    pub constraints: Option<Vec<Constraint>>,
    #[serde(default)]
    pub conditions: Option<Vec<Condition>>,
    #[serde(default, deserialize_with = "double_option")]
    pub valid_from: Option<Option<Timestamp>>,
    #[serde(default, deserialize_with = "double_option")]
    pub valid_until: Option<Option<Timestamp>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub category: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub reason: Option<Option<String>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl PermissionPatch {
    pub fn apply(self, permission: &mut Permission) {
        if let Some(name) = self.name {
            permission.name = name;
        }
        if let Some(description) = self.description {
            permission.description = description;
        }
        if let Some(effect) = self.effect {
            permission.effect = effect;
        }
        if let Some(scope) = self.scope {
            permission.scope = scope;
        }
        if let Some(resource_id) = self.resource_id {
            permission.resource_id = resource_id;
        }
        if let Some(inheritance) = self.inheritance {
            permission.inheritance = inheritance;
        }
        if let Some(constraints) = self.constraints {
            permission.constraints = constraints;
        }
        if let Some(conditions) = self.conditions {
            permission.conditions = conditions;
        }
        if let Some(valid_from) = self.valid_from {
            permission.valid_from = valid_from;
        }
        if let Some(valid_until) = self.valid_until {
            permission.valid_until = valid_until;
        }
        if let Some(is_active) = self.is_active {
            permission.is_active = is_active;
        }
        if let Some(priority) = self.priority {
            permission.priority = priority;
        }
        if let Some(tags) = self.tags {
            permission.metadata.tags = tags;
        }
        if let Some(category) = self.category {
            permission.metadata.category = category;
        }
        if let Some(reason) = self.reason {
            permission.metadata.reason = reason;
        }
    }
}

// ---------------------------------------------------------------------------
// EvaluationContext: the runtime request being authorised
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    pub subject_id: SubjectId,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
    pub action: Action,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub custom_context: BTreeMap<String, serde_json::Value>,
}

impl EvaluationContext {
    /// Context for `action` on a resource of the action's own type.
    pub fn new(
        subject_id: impl Into<String>,
        action: Action,
        resource_id: Option<&str>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            subject_id: SubjectId::new(subject_id),
            resource_type: action.resource_type(),
            resource_id: resource_id.map(ResourceId::new),
            action,
            timestamp,
            ip_address: None,
            user_agent: None,
            location: None,
            device: None,
            custom_context: BTreeMap::new(),
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.custom_context.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    ExplicitAllow,
    RoleDefault,
    ExplicitDeny,
    NoApplicablePermission,
    InvalidContext,
    InvalidHierarchy,
    CollaboratorUnavailable,
    Timeout,
    Internal,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionReason::ExplicitAllow => "explicit_allow",
            DecisionReason::RoleDefault => "role_default",
            DecisionReason::ExplicitDeny => "explicit_deny",
            DecisionReason::NoApplicablePermission => "no_applicable_permission",
            DecisionReason::InvalidContext => "invalid_context",
            DecisionReason::InvalidHierarchy => "invalid_hierarchy",
            DecisionReason::CollaboratorUnavailable => "collaborator_unavailable",
            DecisionReason::Timeout => "timeout",
            DecisionReason::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Outcome of `PermissionEngine::evaluate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allow: bool,
    pub matched_permission_id: Option<PermissionId>,
    pub reason: DecisionReason,
    pub detail: String,
    pub evaluated_at: Timestamp,
}

impl Decision {
    pub fn allow(
        matched_permission_id: Option<PermissionId>,
        reason: DecisionReason,
        detail: impl Into<String>,
        evaluated_at: Timestamp,
    ) -> Self {
        Self {
            allow: true,
            matched_permission_id,
            reason,
            detail: detail.into(),
            evaluated_at,
        }
    }

    pub fn deny(
        matched_permission_id: Option<PermissionId>,
        reason: DecisionReason,
        detail: impl Into<String>,
        evaluated_at: Timestamp,
    ) -> Self {
        Self {
            allow: false,
            matched_permission_id,
            reason,
            detail: detail.into(),
            evaluated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Bulk operations
// ---------------------------------------------------------------------------

pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperation {
    Activate,
    Deactivate,
    Delete,
    Extend,
    Revoke,
    Copy,
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BulkOperation::Activate => "activate",
            BulkOperation::Deactivate => "deactivate",
            BulkOperation::Delete => "delete",
            BulkOperation::Extend => "extend",
            BulkOperation::Revoke => "revoke",
            BulkOperation::Copy => "copy",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for BulkOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "activate" => Ok(BulkOperation::Activate),
            "deactivate" => Ok(BulkOperation::Deactivate),
            "delete" => Ok(BulkOperation::Delete),
            "extend" => Ok(BulkOperation::Extend),
            "revoke" => Ok(BulkOperation::Revoke),
            "copy" => Ok(BulkOperation::Copy),
            other => Err(format!("unknown bulk operation '{}'", other)),
        }
    }
}

/// Operation-specific parameters. `extend` needs `valid_until` or
/// `extend_by_secs`; `copy` needs `target_subject`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkParams {
    #[serde(default)]
    pub valid_until: Option<Timestamp>,
    #[serde(default)]
    pub extend_by_secs: Option<u64>,
    #[serde(default)]
    pub target_subject: Option<SubjectRef>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub id: PermissionId,
    pub success: bool,
    /// Stable error code (`NOT_FOUND`, `VALIDATION_ERROR`, ...).
    pub error: Option<String>,
    pub detail: Option<String>,
    /// Id of the record created by `copy`.
    pub new_id: Option<PermissionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOperationResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchItemResult>,
}

// ---------------------------------------------------------------------------
// Audit types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionAuditEventKind {
    DecisionRendered,
    PermissionGranted,
    PermissionUpdated,
    PermissionRevoked,
    PermissionDeleted,
    BulkOperationCompleted,
    ConstraintEvaluationFailed,
}

/// A structured audit event handed to the audit sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionAuditEvent {
    pub event_kind: PermissionAuditEventKind,
    pub timestamp: Timestamp,
    pub subject_id: Option<SubjectId>,
    pub permission_id: Option<PermissionId>,
    pub action: Option<Action>,
    pub resource: Option<String>,
    pub summary: Option<String>,
}

impl PermissionAuditEvent {
    pub fn new(event_kind: PermissionAuditEventKind, timestamp: Timestamp) -> Self {
        Self {
            event_kind,
            timestamp,
            subject_id: None,
            permission_id: None,
            action: None,
            resource: None,
            summary: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine configuration
// ---------------------------------------------------------------------------

/// Fail-closed time budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Maximum time in milliseconds for a complete evaluation.
    pub evaluation_timeout_ms: u64,
    /// Maximum time in milliseconds for one hierarchy lookup.
    pub hierarchy_timeout_ms: u64,
    /// Maximum time in milliseconds for one identity lookup.
    pub identity_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            evaluation_timeout_ms: 5000,
            hierarchy_timeout_ms: 2000,
            identity_timeout_ms: 2000,
        }
    }
}

/// Baseline actions a role may perform when no stored permission applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefault {
    pub role: SubjectId,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub role_defaults: Vec<RoleDefault>,
}
