use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use permgate_core::{
    CoreError, IdentityResolver, PermissionId, RecordVersion, ResourceHierarchy, SubjectRef,
    Timestamp,
};

use crate::bulk::execute_bulk;
use crate::condition::ConditionEvaluator;
use crate::context::ContextView;
use crate::deadline::call_with_deadline;
use crate::error::PermissionResult;
use crate::rule::{applicable_grant, combine_deny_overrides, role_default_for, RuleOutcome};
use crate::scope::{ChainError, ScopeResolver};
use crate::store::PermissionStore;
use crate::types::{
    BatchOperationResult, BulkOperation, BulkParams, CreatePermissionInput, Decision,
    DecisionReason, EngineConfig, EvaluationContext, Permission, PermissionAuditEvent,
    PermissionAuditEventKind, PermissionPatch,
};
use crate::validation::validate_context;

// ---------------------------------------------------------------------------
// AuditSink trait: permission audit event emission
// ---------------------------------------------------------------------------

/// Receives audit events. Emission is fire-and-forget from the engine's
/// point of view: a failing sink is logged and never changes an outcome.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &PermissionAuditEvent) -> Result<(), String>;
}

/// In-memory audit sink for testing.
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<PermissionAuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<PermissionAuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: &PermissionAuditEvent) -> Result<(), String> {
        self.events
            .lock()
            .map_err(|_| "audit sink lock poisoned".to_string())?
            .push(event.clone());
        Ok(())
    }
}

/// Writes every event to the `permgate::audit` tracing target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: &PermissionAuditEvent) -> Result<(), String> {
        let payload = serde_json::to_string(event).map_err(|e| e.to_string())?;
        tracing::info!(target: "permgate::audit", kind = ?event.event_kind, "{}", payload);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PermissionEngine
// ---------------------------------------------------------------------------

/// Decides whether a subject may perform an action on a resource, and
/// fronts the administrative operations on the store.
///
/// `evaluate` only takes read locks; any number of evaluations may run in
/// parallel against one engine. Collaborators are shared handles because
/// each lookup runs on a worker thread the engine can walk away from.
pub struct PermissionEngine<'a> {
    store: &'a PermissionStore,
    hierarchy: Arc<dyn ResourceHierarchy>,
    identity: Arc<dyn IdentityResolver>,
    audit_sink: &'a dyn AuditSink,
    config: EngineConfig,
}

impl<'a> PermissionEngine<'a> {
    pub fn new(
        store: &'a PermissionStore,
        hierarchy: Arc<dyn ResourceHierarchy>,
        identity: Arc<dyn IdentityResolver>,
        audit_sink: &'a dyn AuditSink,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            hierarchy,
            identity,
            audit_sink,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &PermissionStore {
        self.store
    }

    /// Render a decision for `context`.
    ///
    /// Never fails: every anomaly (bad input, collaborator failure, elapsed
    /// budget) becomes a Deny carrying a diagnostic. The decision time is
    /// `context.timestamp`; the wall clock is only used for budgets.
    pub fn evaluate(&self, context: &EvaluationContext) -> Decision {
        let decision = self.decide(context);
        tracing::debug!(
            subject = %context.subject_id,
            action = %context.action,
            resource = ?context.resource_id,
            allow = decision.allow,
            reason = %decision.reason,
            "decision rendered"
        );

        let mut event =
            PermissionAuditEvent::new(PermissionAuditEventKind::DecisionRendered, context.timestamp);
        event.subject_id = Some(context.subject_id.clone());
        event.permission_id = decision.matched_permission_id.clone();
        event.action = Some(context.action);
        event.resource = Some(resource_label(context));
        event.summary = Some(format!(
            "{} ({}): {}",
            if decision.allow { "allow" } else { "deny" },
            decision.reason,
            decision.detail
        ));
        self.emit(&event);

        decision
    }

    fn decide(&self, context: &EvaluationContext) -> Decision {
        let start = Instant::now();
        let now = context.timestamp;
        let timeouts = self.config.timeouts;
        let evaluation_budget = Duration::from_millis(timeouts.evaluation_timeout_ms);
        let over_budget = || start.elapsed() >= evaluation_budget;
        // a collaborator never gets more than what is left of the evaluation
        let lookup_budget = |ms: u64| {
            Duration::from_millis(ms).min(evaluation_budget.saturating_sub(start.elapsed()))
        };
        let timed_out = |stage: &str| {
            Decision::deny(
                None,
                DecisionReason::Timeout,
                format!(
                    "evaluation budget of {}ms exceeded during {}",
                    timeouts.evaluation_timeout_ms, stage
                ),
                now,
            )
        };

        if let Err(errors) = validate_context(context) {
            return Decision::deny(None, DecisionReason::InvalidContext, errors.join("; "), now);
        }

        let identity_budget = lookup_budget(timeouts.identity_timeout_ms);
        let subjects = match self.resolve_subjects(context, identity_budget) {
            Ok(subjects) => subjects,
            Err(decision) => return decision,
        };
        if over_budget() {
            return timed_out("identity resolution");
        }

        let chain = match ScopeResolver::new(Arc::clone(&self.hierarchy)).ancestor_chain(
            context.resource_type,
            context.resource_id.as_ref(),
            lookup_budget(timeouts.hierarchy_timeout_ms),
        ) {
            Ok(chain) => chain,
            Err(ChainError::Malformed(detail)) => {
                tracing::warn!(%detail, "rejecting malformed hierarchy");
                return Decision::deny(None, DecisionReason::InvalidHierarchy, detail, now);
            }
            Err(ChainError::Collaborator(e)) => return collaborator_failure("hierarchy", e, now),
        };
        if over_budget() {
            return timed_out("scope resolution");
        }

        let candidates = match self.store.find_candidates(&subjects, context.action) {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "candidate lookup failed");
                return Decision::deny(None, DecisionReason::Internal, e.to_string(), now);
            }
        };

        let view = ContextView::new(context);
        let mut evaluator = ConditionEvaluator::new();
        let mut grants = Vec::with_capacity(candidates.len());
        for permission in &candidates {
            if let Some(grant) = applicable_grant(permission, &chain, &view, now, &mut evaluator) {
                grants.push(grant);
            }
            if over_budget() {
                return timed_out("candidate evaluation");
            }
        }

        for failure in evaluator.take_failures() {
            let mut event = PermissionAuditEvent::new(
                PermissionAuditEventKind::ConstraintEvaluationFailed,
                now,
            );
            event.subject_id = Some(context.subject_id.clone());
            event.action = Some(context.action);
            event.resource = Some(resource_label(context));
            event.summary = Some(failure.to_string());
            self.emit(&event);
        }

        match combine_deny_overrides(&grants) {
            RuleOutcome::Deny {
                permission_id,
                matched,
            } => {
                let detail = format!(
                    "denied by {} at {} scope ({} hops)",
                    permission_id, matched.scope, matched.hops
                );
                Decision::deny(Some(permission_id), DecisionReason::ExplicitDeny, detail, now)
            }
            RuleOutcome::Allow {
                permission_id,
                matched,
            } => {
                let detail = format!(
                    "allowed by {} at {} scope ({} hops)",
                    permission_id, matched.scope, matched.hops
                );
                Decision::allow(Some(permission_id), DecisionReason::ExplicitAllow, detail, now)
            }
            RuleOutcome::NotApplicable => {
                match role_default_for(&self.config.role_defaults, &subjects, context.action) {
                    Some(default) => Decision::allow(
                        None,
                        DecisionReason::RoleDefault,
                        format!("role '{}' allows {} by default", default.role, context.action),
                        now,
                    ),
                    None => Decision::deny(
                        None,
                        DecisionReason::NoApplicablePermission,
                        format!(
                            "no applicable permission among {} candidates on {}",
                            candidates.len(),
                            chain.describe()
                        ),
                        now,
                    ),
                }
            }
        }
    }

    /// The requesting user plus every group and role it belongs to.
    fn resolve_subjects(
        &self,
        context: &EvaluationContext,
        budget: Duration,
    ) -> Result<Vec<SubjectRef>, Decision> {
        let identity = Arc::clone(&self.identity);
        let subject_id = context.subject_id.clone();
        let extra = call_with_deadline(budget, move || {
            identity.groups_and_roles(&subject_id, budget)
        })
        .map_err(|e| collaborator_failure("identity", e, context.timestamp))?;

        let mut subjects = vec![SubjectRef::user(context.subject_id.as_str())];
        for subject in extra {
            if !subjects.contains(&subject) {
                subjects.push(subject);
            }
        }
        Ok(subjects)
    }

    // -----------------------------------------------------------------------
    // Administrative operations
    // -----------------------------------------------------------------------

    pub fn grant(&self, input: CreatePermissionInput, now: Timestamp) -> PermissionResult<Permission> {
        let permission = self.store.create(input, now)?;
        tracing::info!(
            id = %permission.id,
            subject = %permission.subject,
            action = %permission.action,
            effect = ?permission.effect,
            scope = %permission.scope,
            "permission granted"
        );
        self.emit_change(PermissionAuditEventKind::PermissionGranted, &permission, now, None);
        Ok(permission)
    }

    pub fn update(
        &self,
        id: &PermissionId,
        patch: PermissionPatch,
        expected_version: RecordVersion,
        now: Timestamp,
    ) -> PermissionResult<Permission> {
        let permission = self.store.update(id, patch, expected_version, now)?;
        tracing::info!(id = %permission.id, version = %permission.version, "permission updated");
        self.emit_change(PermissionAuditEventKind::PermissionUpdated, &permission, now, None);
        Ok(permission)
    }

    pub fn revoke(
        &self,
        id: &PermissionId,
        reason: Option<String>,
        now: Timestamp,
    ) -> PermissionResult<()> {
        let permission = self.store.revoke(id, reason, now)?;
        tracing::info!(id = %permission.id, "permission revoked");
        let summary = permission.metadata.reason.clone();
        self.emit_change(PermissionAuditEventKind::PermissionRevoked, &permission, now, summary);
        Ok(())
    }

    pub fn delete(&self, id: &PermissionId, now: Timestamp) -> PermissionResult<()> {
        let permission = self.store.delete(id)?;
        tracing::info!(id = %permission.id, "permission deleted");
        self.emit_change(PermissionAuditEventKind::PermissionDeleted, &permission, now, None);
        Ok(())
    }

    /// Run a batch operation. Only a malformed request fails as a whole;
    /// item failures are reported inside the result.
    pub fn bulk_operate(
        &self,
        ids: &[PermissionId],
        operation: BulkOperation,
        params: &BulkParams,
        now: Timestamp,
    ) -> PermissionResult<BatchOperationResult> {
        let result = execute_bulk(self.store, ids, operation, params, now)?;
        tracing::info!(
            %operation,
            total = result.total,
            successful = result.successful,
            failed = result.failed,
            "bulk operation completed"
        );

        let mut event =
            PermissionAuditEvent::new(PermissionAuditEventKind::BulkOperationCompleted, now);
        event.summary = Some(format!(
            "{}: {} of {} succeeded",
            operation, result.successful, result.total
        ));
        self.emit(&event);
        Ok(result)
    }

    fn emit_change(
        &self,
        kind: PermissionAuditEventKind,
        permission: &Permission,
        now: Timestamp,
        summary: Option<String>,
    ) {
        let mut event = PermissionAuditEvent::new(kind, now);
        event.subject_id = Some(permission.subject.id.clone());
        event.permission_id = Some(permission.id.clone());
        event.action = Some(permission.action);
        event.resource = Some(match &permission.resource_id {
            Some(id) => format!("{}/{}", permission.scope, id),
            None => permission.scope.to_string(),
        });
        event.summary = summary;
        self.emit(&event);
    }

    fn emit(&self, event: &PermissionAuditEvent) {
        if let Err(e) = self.audit_sink.emit(event) {
            tracing::warn!(kind = ?event.event_kind, error = %e, "audit sink rejected event");
        }
    }
}

fn collaborator_failure(which: &str, error: CoreError, now: Timestamp) -> Decision {
    tracing::warn!(collaborator = which, error = %error, "failing closed");
    let reason = match error {
        CoreError::Timeout { .. } => DecisionReason::Timeout,
        _ => DecisionReason::CollaboratorUnavailable,
    };
    Decision::deny(None, reason, format!("{} lookup failed: {}", which, error), now)
}

fn resource_label(context: &EvaluationContext) -> String {
    match &context.resource_id {
        Some(id) => format!("{}/{}", context.resource_type, id),
        None => context.resource_type.to_string(),
    }
}
