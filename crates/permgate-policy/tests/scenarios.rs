//! End-to-end decision scenarios against the in-memory collaborators.
//!
//! Layout used throughout:
//!   acme (organization) > eng (department) > apollo (project)
//!     > root (folder) > folderA (folder) > doc1, doc2 (documents)
//!   apollo also holds report q4.

use permgate_core::{
    CoreError, CoreResult, IdentityResolver, PermissionId, ResourceHierarchy, ResourceId,
    ResourceType, Scope, ScopeNode, SubjectId, SubjectRef, Timestamp,
};
use permgate_policy::{
    Action, BulkOperation, BulkParams, Condition, ConditionOperator, Constraint, ConstraintType,
    CreatePermissionInput, DecisionReason, DocumentAction, EngineConfig, EvaluationContext,
    InMemoryAuditSink, InMemoryDirectory, InMemoryHierarchy, InheritanceType, PermissionAuditEventKind,
    PermissionEngine, PermissionError, PermissionPatch, PermissionStore, ReportAction,
    TimeoutConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

const NOW: u64 = 1_700_000_000; // 2023-11-14T22:13:20Z, Tuesday

fn t(secs: u64) -> Timestamp {
    Timestamp::from_seconds(secs)
}

fn read() -> Action {
    Action::Document(DocumentAction::Read)
}

fn hierarchy() -> InMemoryHierarchy {
    let h = InMemoryHierarchy::new();
    for doc in ["doc1", "doc2"] {
        h.place_resource(
            ResourceType::Document,
            doc,
            ScopeNode::new(Scope::Folder, "folderA"),
        )
        .unwrap();
    }
    h.place_resource(
        ResourceType::Report,
        "q4",
        ScopeNode::new(Scope::Project, "apollo"),
    )
    .unwrap();
    let links = [
        (ScopeNode::new(Scope::Folder, "folderA"), ScopeNode::new(Scope::Folder, "root")),
        (ScopeNode::new(Scope::Folder, "root"), ScopeNode::new(Scope::Project, "apollo")),
        (ScopeNode::new(Scope::Project, "apollo"), ScopeNode::new(Scope::Department, "eng")),
        (ScopeNode::new(Scope::Department, "eng"), ScopeNode::new(Scope::Organization, "acme")),
    ];
    for (child, parent) in links {
        h.nest(child, parent).unwrap();
    }
    h
}

struct Fixture {
    store: PermissionStore,
    hierarchy: Arc<InMemoryHierarchy>,
    directory: Arc<InMemoryDirectory>,
    sink: InMemoryAuditSink,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: PermissionStore::new(),
            hierarchy: Arc::new(hierarchy()),
            directory: Arc::new(InMemoryDirectory::new()),
            sink: InMemoryAuditSink::new(),
        }
    }

    fn engine(&self) -> PermissionEngine<'_> {
        PermissionEngine::new(
            &self.store,
            self.hierarchy.clone(),
            self.directory.clone(),
            &self.sink,
            EngineConfig::default(),
        )
    }

    fn seed(&self, id: &str, input: CreatePermissionInput) -> PermissionId {
        self.store
            .create_with_id(input, PermissionId::new(id), t(NOW - 86_400))
            .unwrap()
            .id
    }
}

fn doc_request(doc: &str) -> EvaluationContext {
    EvaluationContext::new("user123", read(), Some(doc), t(NOW))
}

// ============================================================================
// Named scenarios
// ============================================================================

#[test]
fn test_scenario_a_folder_allow_reaches_document() {
    let fx = Fixture::new();
    fx.seed(
        "P1",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Folder)
            .on("folderA"),
    );

    let decision = fx.engine().evaluate(&doc_request("doc1"));
    assert!(decision.allow);
    assert_eq!(decision.matched_permission_id, Some(PermissionId::new("P1")));
    assert_eq!(decision.reason, DecisionReason::ExplicitAllow);
    assert_eq!(decision.evaluated_at, t(NOW));
}

#[test]
fn test_scenario_b_document_deny_overrides_folder_allow() {
    let fx = Fixture::new();
    fx.seed(
        "P1",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Folder)
            .on("folderA"),
    );
    fx.seed(
        "P2",
        CreatePermissionInput::deny(SubjectRef::user("user123"), read(), Scope::Document)
            .on("doc1"),
    );

    let decision = fx.engine().evaluate(&doc_request("doc1"));
    assert!(!decision.allow);
    assert_eq!(decision.reason, DecisionReason::ExplicitDeny);
    assert_eq!(decision.matched_permission_id, Some(PermissionId::new("P2")));

    // the sibling document is unaffected
    assert!(fx.engine().evaluate(&doc_request("doc2")).allow);
}

#[test]
fn test_scenario_c_bulk_deactivate_with_missing_id() {
    let fx = Fixture::new();
    for id in ["id1", "id3"] {
        fx.seed(
            id,
            CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Folder)
                .on("folderA"),
        );
    }

    let ids: Vec<PermissionId> = ["id1", "id2", "id3"].iter().map(|s| PermissionId::new(*s)).collect();
    let result = fx
        .engine()
        .bulk_operate(&ids, BulkOperation::Deactivate, &BulkParams::default(), t(NOW))
        .unwrap();
    assert_eq!(result.total, 3);
    assert_eq!(result.successful, 2);
    assert_eq!(result.failed, 1);
    let missing = result.results.iter().find(|r| r.id.as_str() == "id2").unwrap();
    assert!(!missing.success);
    assert_eq!(missing.error.as_deref(), Some("NOT_FOUND"));

    // both deactivated grants stop contributing
    let decision = fx.engine().evaluate(&doc_request("doc1"));
    assert_eq!(decision.reason, DecisionReason::NoApplicablePermission);

    let last = fx.sink.events().pop().unwrap();
    assert_eq!(last.event_kind, PermissionAuditEventKind::DecisionRendered);
    assert!(fx
        .sink
        .events()
        .iter()
        .any(|e| e.event_kind == PermissionAuditEventKind::BulkOperationCompleted));
}

// ============================================================================
// Precedence
// ============================================================================

#[test]
fn test_folder_deny_beats_organization_allow() {
    let fx = Fixture::new();
    fx.seed(
        "allow-org",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Organization)
            .on("acme")
            .with_inheritance(InheritanceType::Full),
    );
    fx.seed(
        "deny-folder",
        CreatePermissionInput::deny(SubjectRef::user("user123"), read(), Scope::Folder)
            .on("folderA"),
    );

    let decision = fx.engine().evaluate(&doc_request("doc1"));
    assert!(!decision.allow);
    assert_eq!(decision.matched_permission_id, Some(PermissionId::new("deny-folder")));
}

#[test]
fn test_specific_scope_wins_over_priority() {
    let fx = Fixture::new();
    fx.seed(
        "folder-p50",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Folder)
            .on("folderA"),
    );
    fx.seed(
        "dept-p90",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Department)
            .on("eng")
            .with_inheritance(InheritanceType::Full)
            .with_priority(90),
    );

    let decision = fx.engine().evaluate(&doc_request("doc1"));
    assert!(decision.allow);
    assert_eq!(decision.matched_permission_id, Some(PermissionId::new("folder-p50")));
}

#[test]
fn test_priority_decides_between_nested_folders() {
    let fx = Fixture::new();
    fx.seed(
        "near-p10",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Folder)
            .on("folderA")
            .with_inheritance(InheritanceType::Full)
            .with_priority(10),
    );
    fx.seed(
        "far-p90",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Folder)
            .on("root")
            .with_inheritance(InheritanceType::Full)
            .with_priority(90),
    );

    // both sit at folder scope, so distance does not matter
    let decision = fx.engine().evaluate(&doc_request("doc1"));
    assert!(decision.allow);
    assert_eq!(decision.matched_permission_id, Some(PermissionId::new("far-p90")));
}

#[test]
fn test_global_grant_applies_everywhere() {
    let fx = Fixture::new();
    fx.seed(
        "everyone-reads",
        CreatePermissionInput::allow(SubjectRef::role("auditor"), read(), Scope::Global),
    );
    fx.directory
        .add_membership("user123", SubjectRef::role("auditor"))
        .unwrap();

    let decision = fx.engine().evaluate(&doc_request("doc2"));
    assert!(decision.allow);
    assert_eq!(decision.matched_permission_id, Some(PermissionId::new("everyone-reads")));
}

#[test]
fn test_inheritance_limits_reach() {
    let fx = Fixture::new();
    // apollo is three hops above doc1
    fx.seed(
        "project-partial",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Project)
            .on("apollo")
            .with_inheritance(InheritanceType::Partial),
    );
    assert!(!fx.engine().evaluate(&doc_request("doc1")).allow);

    fx.seed(
        "project-full",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Project)
            .on("apollo")
            .with_inheritance(InheritanceType::Full),
    );
    let decision = fx.engine().evaluate(&doc_request("doc1"));
    assert!(decision.allow);
    assert_eq!(decision.matched_permission_id, Some(PermissionId::new("project-full")));
}

#[test]
fn test_report_in_project() {
    let fx = Fixture::new();
    let view = Action::Report(ReportAction::View);
    fx.seed(
        "reports",
        CreatePermissionInput::allow(SubjectRef::user("user123"), view, Scope::Project).on("apollo"),
    );

    let decision = fx
        .engine()
        .evaluate(&EvaluationContext::new("user123", view, Some("q4"), t(NOW)));
    assert!(decision.allow);
    let export = fx.engine().evaluate(&EvaluationContext::new(
        "user123",
        Action::Report(ReportAction::Export),
        Some("q4"),
        t(NOW),
    ));
    assert!(!export.allow);
}

// ============================================================================
// Default deny, temporal validity, conditions
// ============================================================================

#[test]
fn test_default_deny() {
    let fx = Fixture::new();
    let decision = fx.engine().evaluate(&doc_request("doc1"));
    assert!(!decision.allow);
    assert_eq!(decision.reason, DecisionReason::NoApplicablePermission);
    assert_eq!(decision.matched_permission_id, None);
}

#[test]
fn test_expired_and_future_permissions_never_contribute() {
    let fx = Fixture::new();
    fx.seed(
        "expired",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Document)
            .on("doc1")
            .valid_between(None, Some(t(NOW - 1))),
    );
    fx.seed(
        "not-yet",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Document)
            .on("doc1")
            .valid_between(Some(t(NOW + 1)), None),
    );
    assert!(!fx.engine().evaluate(&doc_request("doc1")).allow);

    // still stored
    assert_eq!(fx.store.len(), 2);
}

#[test]
fn test_expired_deny_does_not_block() {
    let fx = Fixture::new();
    fx.seed(
        "allow",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Document).on("doc1"),
    );
    fx.seed(
        "old-deny",
        CreatePermissionInput::deny(SubjectRef::user("user123"), read(), Scope::Document)
            .on("doc1")
            .valid_between(Some(t(NOW - 1_000)), Some(t(NOW - 10))),
    );
    assert!(fx.engine().evaluate(&doc_request("doc1")).allow);
}

#[test]
fn test_conditions_and_constraints_gate_grants() {
    let fx = Fixture::new();
    fx.seed(
        "office-hours",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Folder)
            .on("folderA")
            .with_constraint(Constraint::new(
                ConstraintType::Time,
                vec![
                    Condition::new("hour", ConditionOperator::Gte, json!(9)),
                    Condition::new("hour", ConditionOperator::Lt, json!(18)),
                ],
            )),
    );
    fx.seed(
        "vpn-only",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Folder)
            .on("folderA")
            .with_constraint(Constraint::new(
                ConstraintType::Ip,
                vec![Condition::new("ipAddress", ConditionOperator::Regex, json!(r"^10\."))],
            ))
            .with_condition(Condition::new("department", ConditionOperator::Eq, json!("finance"))),
    );

    // 22:13 UTC, no ip, no department
    assert!(!fx.engine().evaluate(&doc_request("doc1")).allow);

    let from_vpn = doc_request("doc1")
        .with_ip("10.1.2.3")
        .with_custom("department", json!("Finance"));
    let decision = fx.engine().evaluate(&from_vpn);
    assert!(decision.allow);
    assert_eq!(decision.matched_permission_id, Some(PermissionId::new("vpn-only")));
}

// ============================================================================
// Determinism and grant round trip
// ============================================================================

#[test]
fn test_evaluate_is_idempotent() {
    let fx = Fixture::new();
    fx.seed(
        "P1",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Folder)
            .on("folderA"),
    );
    let engine = fx.engine();
    let ctx = doc_request("doc1");
    let first = engine.evaluate(&ctx);
    for _ in 0..5 {
        assert_eq!(engine.evaluate(&ctx), first);
    }
}

#[test]
fn test_grant_round_trip_defaults() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let created = engine
        .grant(
            CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Document)
                .on("doc1"),
            t(NOW),
        )
        .unwrap();
    let stored = fx.store.get(&created.id).unwrap();
    assert_eq!(stored, created);
    assert_eq!(stored.priority, 50);
    assert!(stored.is_active);
    assert_eq!(stored.inheritance, InheritanceType::None);

    let json = serde_json::to_string(&stored).unwrap();
    let back: permgate_policy::Permission = serde_json::from_str(&json).unwrap();
    assert_eq!(back, stored);
}

#[test]
fn test_grant_rejects_incompatible_scope() {
    let fx = Fixture::new();
    let err = fx
        .engine()
        .grant(
            CreatePermissionInput::allow(
                SubjectRef::user("user123"),
                Action::Report(ReportAction::View),
                Scope::Folder,
            )
            .on("folderA"),
            t(NOW),
        )
        .unwrap_err();
    match err {
        PermissionError::Validation(issues) => {
            assert!(issues.iter().any(|i| i.contains("not compatible")))
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_concurrent_update_conflicts() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let p = engine
        .grant(
            CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Document)
                .on("doc1"),
            t(NOW),
        )
        .unwrap();

    let raise = PermissionPatch {
        priority: Some(80),
        ..Default::default()
    };
    engine.update(&p.id, raise.clone(), p.version, t(NOW + 1)).unwrap();
    let err = engine.update(&p.id, raise, p.version, t(NOW + 2)).unwrap_err();
    assert!(matches!(err, PermissionError::Conflict { .. }));
}

#[test]
fn test_revoked_permission_stops_matching() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let p = engine
        .grant(
            CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Document)
                .on("doc1"),
            t(NOW - 10),
        )
        .unwrap();
    assert!(engine.evaluate(&doc_request("doc1")).allow);
    engine.revoke(&p.id, None, t(NOW - 5)).unwrap();
    assert!(!engine.evaluate(&doc_request("doc1")).allow);
}

#[test]
fn test_engine_is_shareable_across_threads() {
    let fx = Fixture::new();
    fx.seed(
        "P1",
        CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Folder)
            .on("folderA"),
    );
    let engine = fx.engine();
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..25 {
                    assert!(engine.evaluate(&doc_request("doc1")).allow);
                }
            });
        }
    });
}

// ============================================================================
// Fail-closed collaborators
// ============================================================================

struct SlowHierarchy {
    inner: InMemoryHierarchy,
    delay: Duration,
}

impl ResourceHierarchy for SlowHierarchy {
    fn ancestors(
        &self,
        resource_type: ResourceType,
        resource_id: &ResourceId,
        budget: Duration,
    ) -> CoreResult<Vec<ScopeNode>> {
        std::thread::sleep(self.delay);
        self.inner.ancestors(resource_type, resource_id, budget)
    }
}

struct TimingOutDirectory;

impl IdentityResolver for TimingOutDirectory {
    fn groups_and_roles(&self, _: &SubjectId, budget: Duration) -> CoreResult<Vec<SubjectRef>> {
        Err(CoreError::Timeout {
            budget_ms: budget.as_millis() as u64,
        })
    }
}

struct DownDirectory;

impl IdentityResolver for DownDirectory {
    fn groups_and_roles(&self, _: &SubjectId, _: Duration) -> CoreResult<Vec<SubjectRef>> {
        Err(CoreError::Identity("directory unreachable".into()))
    }
}

fn allow_everything(store: &PermissionStore) {
    store
        .create_with_id(
            CreatePermissionInput::allow(SubjectRef::user("user123"), read(), Scope::Global),
            PermissionId::new("global-allow"),
            t(1),
        )
        .unwrap();
}

#[test]
fn test_slow_hierarchy_denies_with_timeout() {
    let store = PermissionStore::new();
    allow_everything(&store);
    let slow = SlowHierarchy {
        inner: hierarchy(),
        delay: Duration::from_millis(30),
    };
    let sink = InMemoryAuditSink::new();
    let config = EngineConfig {
        timeouts: TimeoutConfig {
            hierarchy_timeout_ms: 5,
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = PermissionEngine::new(
        &store,
        Arc::new(slow),
        Arc::new(InMemoryDirectory::new()),
        &sink,
        config,
    );

    let decision = engine.evaluate(&doc_request("doc1"));
    assert!(!decision.allow);
    assert_eq!(decision.reason, DecisionReason::Timeout);
}

#[test]
fn test_hung_hierarchy_does_not_hold_the_caller() {
    let store = PermissionStore::new();
    allow_everything(&store);
    let slow = SlowHierarchy {
        inner: hierarchy(),
        delay: Duration::from_millis(1500),
    };
    let sink = InMemoryAuditSink::new();
    let config = EngineConfig {
        timeouts: TimeoutConfig {
            evaluation_timeout_ms: 50,
            hierarchy_timeout_ms: 20,
            identity_timeout_ms: 20,
        },
        ..Default::default()
    };
    let engine = PermissionEngine::new(
        &store,
        Arc::new(slow),
        Arc::new(InMemoryDirectory::new()),
        &sink,
        config,
    );

    let start = Instant::now();
    let decision = engine.evaluate(&doc_request("doc1"));
    let elapsed = start.elapsed();
    assert!(!decision.allow);
    assert_eq!(decision.reason, DecisionReason::Timeout);
    assert!(elapsed < Duration::from_millis(500), "caller waited {:?}", elapsed);
}

#[test]
fn test_identity_timeout_and_outage_fail_closed() {
    let store = PermissionStore::new();
    allow_everything(&store);
    let h = Arc::new(hierarchy());
    let sink = InMemoryAuditSink::new();

    let engine = PermissionEngine::new(
        &store,
        h.clone(),
        Arc::new(TimingOutDirectory),
        &sink,
        EngineConfig::default(),
    );
    let decision = engine.evaluate(&doc_request("doc1"));
    assert!(!decision.allow);
    assert_eq!(decision.reason, DecisionReason::Timeout);

    let engine = PermissionEngine::new(
        &store,
        h,
        Arc::new(DownDirectory),
        &sink,
        EngineConfig::default(),
    );
    let decision = engine.evaluate(&doc_request("doc1"));
    assert!(!decision.allow);
    assert_eq!(decision.reason, DecisionReason::CollaboratorUnavailable);
}

#[test]
fn test_malformed_hierarchy_denied() {
    let store = PermissionStore::new();
    allow_everything(&store);
    let h = InMemoryHierarchy::new();
    h.place_resource(
        ResourceType::Document,
        "doc1",
        ScopeNode::new(Scope::Project, "apollo"),
    )
    .unwrap();
    h.nest(
        ScopeNode::new(Scope::Project, "apollo"),
        ScopeNode::new(Scope::Folder, "inside-out"),
    )
    .unwrap();
    let sink = InMemoryAuditSink::new();
    let engine = PermissionEngine::new(
        &store,
        Arc::new(h),
        Arc::new(InMemoryDirectory::new()),
        &sink,
        EngineConfig::default(),
    );

    let decision = engine.evaluate(&doc_request("doc1"));
    assert!(!decision.allow);
    assert_eq!(decision.reason, DecisionReason::InvalidHierarchy);
}
