//! Ancestor chains and permission applicability.

use permgate_core::{CoreError, ResourceHierarchy, ResourceId, ResourceType, Scope, ScopeNode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::deadline::call_with_deadline;
use crate::types::Permission;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Collaborator(#[from] CoreError),

    #[error("malformed hierarchy: {0}")]
    Malformed(String),
}

/// Where on the chain a permission matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeMatch {
    pub scope: Scope,
    pub hops: usize,
}

/// A resource's containment path, most specific node first, always ending
/// with the Global node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeChain {
    pub resource_type: ResourceType,
    pub nodes: Vec<ScopeNode>,
    /// Whether `nodes[0]` is the resource itself (documents, folders and
    /// the global resource) or its immediate container.
    pub self_included: bool,
}

impl ScopeChain {
    fn hops_at(&self, index: usize) -> usize {
        if self.self_included {
            index
        } else {
            index + 1
        }
    }

    /// Whether `permission` reaches the resource, and at what distance.
    /// Subject, action and validity are not considered here.
    pub fn applicability(&self, permission: &Permission) -> Option<ScopeMatch> {
        let (index, node) = self.nodes.iter().enumerate().find(|(_, node)| {
            node.scope == permission.scope
                && match &permission.resource_id {
                    Some(id) => node.id.as_ref() == Some(id),
                    None => true,
                }
        })?;
        let hops = self.hops_at(index);

        if node.scope != Scope::Global && hops > permission.inheritance.max_hops() {
            return None;
        }
        Some(ScopeMatch {
            scope: node.scope,
            hops,
        })
    }

    pub fn describe(&self) -> String {
        self.nodes
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(" > ")
    }

    fn check(&self) -> Result<(), ChainError> {
        let last = self.nodes.len() - 1;
        for (i, node) in self.nodes.iter().enumerate() {
            if node.scope == Scope::Global && i != last {
                return Err(ChainError::Malformed(format!(
                    "global node at position {} of {}",
                    i,
                    self.describe()
                )));
            }
            if node.scope != Scope::Global && node.id.is_none() {
                return Err(ChainError::Malformed(format!(
                    "{} node without an id",
                    node.scope
                )));
            }
            if node.scope == Scope::Document && !(i == 0 && self.self_included) {
                return Err(ChainError::Malformed(format!(
                    "document node '{}' used as a container",
                    node
                )));
            }
            if i > 0 && node.scope < self.nodes[i - 1].scope {
                return Err(ChainError::Malformed(format!(
                    "{} is broader than {}",
                    self.nodes[i - 1],
                    node
                )));
            }
        }
        Ok(())
    }
}

/// Builds scope chains from the resource hierarchy collaborator.
pub struct ScopeResolver {
    hierarchy: Arc<dyn ResourceHierarchy>,
}

impl ScopeResolver {
    pub fn new(hierarchy: Arc<dyn ResourceHierarchy>) -> Self {
        Self { hierarchy }
    }

    /// Resolve the chain for a resource. `resource_id` may only be absent
    /// for the global resource. The hierarchy lookup is abandoned once
    /// `budget` has passed.
    pub fn ancestor_chain(
        &self,
        resource_type: ResourceType,
        resource_id: Option<&ResourceId>,
        budget: Duration,
    ) -> Result<ScopeChain, ChainError> {
        if resource_type == ResourceType::Global {
            return Ok(ScopeChain {
                resource_type,
                nodes: vec![ScopeNode::global()],
                self_included: true,
            });
        }
        let resource_id = resource_id.ok_or_else(|| {
            ChainError::Malformed(format!("{} resource without an id", resource_type))
        })?;

        let mut nodes = Vec::new();
        let self_included = match resource_type.own_scope() {
            Some(scope) => {
                nodes.push(ScopeNode {
                    scope,
                    id: Some(resource_id.clone()),
                });
                true
            }
            None => false,
        };

        let hierarchy = Arc::clone(&self.hierarchy);
        let id = resource_id.clone();
        let ancestors = call_with_deadline(budget, move || {
            hierarchy.ancestors(resource_type, &id, budget)
        })?;
        nodes.extend(ancestors);

        if nodes.last().map(|n| n.scope) != Some(Scope::Global) {
            nodes.push(ScopeNode::global());
        }

        let chain = ScopeChain {
            resource_type,
            nodes,
            self_included,
        };
        chain.check()?;
        Ok(chain)
    }
}
