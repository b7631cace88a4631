use permgate_core::{PermissionId, Scope, SubjectKind, SubjectRef, Timestamp};
use std::cmp::Reverse;

use crate::action::Action;
use crate::condition::ConditionEvaluator;
use crate::context::ContextView;
use crate::scope::{ScopeChain, ScopeMatch};
use crate::types::{Effect, Permission, RoleDefault};

/// A candidate that survived every filter for this request.
#[derive(Debug, Clone, Copy)]
pub struct ApplicableGrant<'p> {
    pub permission: &'p Permission,
    pub matched: ScopeMatch,
}

impl ApplicableGrant<'_> {
    /// Sort key: most specific scope, then highest priority, then newest.
    /// Hops and id only separate otherwise equal grants.
    fn precedence(&self) -> (Scope, Reverse<u8>, Reverse<Timestamp>, usize, &PermissionId) {
        (
            self.matched.scope,
            Reverse(self.permission.priority),
            Reverse(self.permission.metadata.created_at),
            self.matched.hops,
            &self.permission.id,
        )
    }
}

/// Result of combining the applicable grants of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Deny {
        permission_id: PermissionId,
        matched: ScopeMatch,
    },
    Allow {
        permission_id: PermissionId,
        matched: ScopeMatch,
    },
    NotApplicable,
}

/// Whether `permission` contributes to the request described by `view`.
///
/// Checks activity, the validity window at `now`, reach over `chain`, then
/// every condition and constraint.
pub fn applicable_grant<'p>(
    permission: &'p Permission,
    chain: &ScopeChain,
    view: &ContextView<'_>,
    now: Timestamp,
    evaluator: &mut ConditionEvaluator,
) -> Option<ApplicableGrant<'p>> {
    if !permission.is_active || !permission.is_within_validity(now) {
        return None;
    }
    let matched = chain.applicability(permission)?;

    if !permission
        .conditions
        .iter()
        .all(|c| evaluator.condition(c, view))
    {
        return None;
    }
    if !permission
        .constraints
        .iter()
        .all(|c| evaluator.constraint(c, view))
    {
        return None;
    }
    Some(ApplicableGrant {
        permission,
        matched,
    })
}

/// Deny-overrides: any applicable deny wins and the most specific one is
/// cited; otherwise the best-ranked allow is chosen.
pub fn combine_deny_overrides(grants: &[ApplicableGrant<'_>]) -> RuleOutcome {
    let best = |effect: Effect| {
        grants
            .iter()
            .filter(|g| g.permission.effect == effect)
            .min_by(|a, b| a.precedence().cmp(&b.precedence()))
    };

    if let Some(deny) = best(Effect::Deny) {
        return RuleOutcome::Deny {
            permission_id: deny.permission.id.clone(),
            matched: deny.matched,
        };
    }
    if let Some(allow) = best(Effect::Allow) {
        return RuleOutcome::Allow {
            permission_id: allow.permission.id.clone(),
            matched: allow.matched,
        };
    }
    RuleOutcome::NotApplicable
}

/// The first configured role default granting `action` to one of the
/// subject's roles.
pub fn role_default_for<'c>(
    defaults: &'c [RoleDefault],
    subjects: &[SubjectRef],
    action: Action,
) -> Option<&'c RoleDefault> {
    defaults.iter().find(|d| {
        d.actions.contains(&action)
            && subjects
                .iter()
                .any(|s| s.kind == SubjectKind::Role && s.id == d.role)
    })
}
