use std::time::Duration;

use crate::error::CoreResult;
use crate::types::{ResourceId, ResourceType, ScopeNode, SubjectId, SubjectRef};

// ---------------------------------------------------------------------------
// ResourceHierarchy: containment lookups owned by the resource service
//
// Returns the containers of a resource ordered from the nearest to the
// broadest (e.g. folder, project, department, organization). The resource
// itself is not included. Implementations backed by a remote service should
// give up once `budget` has elapsed and return `CoreError::Timeout`; the
// engine stops waiting at that point either way.
// ---------------------------------------------------------------------------

pub trait ResourceHierarchy: Send + Sync {
    fn ancestors(
        &self,
        resource_type: ResourceType,
        resource_id: &ResourceId,
        budget: Duration,
    ) -> CoreResult<Vec<ScopeNode>>;
}

// ---------------------------------------------------------------------------
// IdentityResolver: group and role memberships of a subject
//
// The literal user reference is added by the caller; implementations only
// report the additional group/role references. Same budget contract as
// ResourceHierarchy.
// ---------------------------------------------------------------------------

pub trait IdentityResolver: Send + Sync {
    fn groups_and_roles(&self, subject_id: &SubjectId, budget: Duration)
        -> CoreResult<Vec<SubjectRef>>;
}
