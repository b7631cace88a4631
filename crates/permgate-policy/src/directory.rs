//! In-memory collaborators: a containment tree and a membership directory.

use permgate_core::{
    CoreError, CoreResult, IdentityResolver, ResourceHierarchy, ResourceId, ResourceType, Scope,
    ScopeNode, SubjectId, SubjectRef,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Bound on chain length; anything longer is treated as a cycle.
const MAX_DEPTH: usize = 64;

/// One parent link as it appears in a hierarchy seed file.
///
/// `kind` names either a resource type (`"report"`) or a scope level
/// (`"project"`); documents and folders are both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyLink {
    pub kind: String,
    pub id: ResourceId,
    pub parent: ScopeNode,
}

/// Group and role memberships of one user, as they appear in a directory
/// seed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub subject_id: SubjectId,
    pub member_of: Vec<SubjectRef>,
}

type NodeKey = (String, ResourceId);

fn read_lock<T>(lock: &RwLock<T>) -> CoreResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|e| CoreError::Internal(format!("lock poisoned: {}", e)))
}

fn write_lock<T>(lock: &RwLock<T>) -> CoreResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|e| CoreError::Internal(format!("lock poisoned: {}", e)))
}

/// Parent links held in memory.
#[derive(Debug, Default)]
pub struct InMemoryHierarchy {
    parents: RwLock<HashMap<NodeKey, ScopeNode>>,
}

impl InMemoryHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_links(links: Vec<HierarchyLink>) -> CoreResult<Self> {
        let hierarchy = Self::new();
        {
            let mut parents = write_lock(&hierarchy.parents)?;
            for link in links {
                let kind = link.kind.to_ascii_lowercase();
                if kind.parse::<ResourceType>().is_err() && kind.parse::<Scope>().is_err() {
                    return Err(CoreError::Hierarchy(format!(
                        "unknown node kind '{}' for '{}'",
                        link.kind, link.id
                    )));
                }
                parents.insert((kind, link.id), link.parent);
            }
        }
        Ok(hierarchy)
    }

    /// Place a resource directly inside a scope node.
    pub fn place_resource(
        &self,
        resource_type: ResourceType,
        id: impl Into<String>,
        parent: ScopeNode,
    ) -> CoreResult<()> {
        write_lock(&self.parents)?.insert(
            (resource_type.as_str().to_string(), ResourceId::new(id)),
            parent,
        );
        Ok(())
    }

    /// Nest one scope node inside another.
    pub fn nest(&self, child: ScopeNode, parent: ScopeNode) -> CoreResult<()> {
        let id = child
            .id
            .ok_or_else(|| CoreError::Hierarchy("the global node has no parent".into()))?;
        write_lock(&self.parents)?.insert((child.scope.as_str().to_string(), id), parent);
        Ok(())
    }

    pub fn len(&self) -> usize {
        read_lock(&self.parents).map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceHierarchy for InMemoryHierarchy {
    fn ancestors(
        &self,
        resource_type: ResourceType,
        resource_id: &ResourceId,
        _budget: Duration,
    ) -> CoreResult<Vec<ScopeNode>> {
        let parents = read_lock(&self.parents)?;
        let mut key = (resource_type.as_str().to_string(), resource_id.clone());
        if !parents.contains_key(&key) {
            return Err(CoreError::NotFound(format!("{}/{}", resource_type, resource_id)));
        }

        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        while let Some(parent) = parents.get(&key) {
            if !seen.insert(key.clone()) || chain.len() >= MAX_DEPTH {
                return Err(CoreError::Hierarchy(format!(
                    "cycle above {}/{}",
                    resource_type, resource_id
                )));
            }
            chain.push(parent.clone());
            match &parent.id {
                Some(id) if parent.scope != Scope::Global => {
                    key = (parent.scope.as_str().to_string(), id.clone());
                }
                _ => break,
            }
        }
        Ok(chain)
    }
}

/// Group and role memberships held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    memberships: RwLock<HashMap<SubjectId, Vec<SubjectRef>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_memberships(memberships: Vec<Membership>) -> CoreResult<Self> {
        let directory = Self::new();
        for m in memberships {
            for subject in m.member_of {
                directory.add_membership(m.subject_id.as_str(), subject)?;
            }
        }
        Ok(directory)
    }

    pub fn add_membership(&self, user: &str, member_of: SubjectRef) -> CoreResult<()> {
        let mut map = write_lock(&self.memberships)?;
        let entry = map.entry(SubjectId::new(user)).or_default();
        if !entry.contains(&member_of) {
            entry.push(member_of);
        }
        Ok(())
    }
}

impl IdentityResolver for InMemoryDirectory {
    fn groups_and_roles(
        &self,
        subject_id: &SubjectId,
        _budget: Duration,
    ) -> CoreResult<Vec<SubjectRef>> {
        let map = read_lock(&self.memberships)?;
        Ok(map.get(subject_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> Duration {
        Duration::from_millis(100)
    }

    fn sample() -> InMemoryHierarchy {
        let h = InMemoryHierarchy::new();
        h.place_resource(
            ResourceType::Document,
            "doc1",
            ScopeNode::new(Scope::Folder, "folderA"),
        )
        .unwrap();
        h.nest(
            ScopeNode::new(Scope::Folder, "folderA"),
            ScopeNode::new(Scope::Project, "apollo"),
        )
        .unwrap();
        h.nest(
            ScopeNode::new(Scope::Project, "apollo"),
            ScopeNode::new(Scope::Organization, "acme"),
        )
        .unwrap();
        h
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let chain = sample()
            .ancestors(ResourceType::Document, &ResourceId::new("doc1"), budget())
            .unwrap();
        assert_eq!(
            chain,
            vec![
                ScopeNode::new(Scope::Folder, "folderA"),
                ScopeNode::new(Scope::Project, "apollo"),
                ScopeNode::new(Scope::Organization, "acme"),
            ]
        );
    }

    #[test]
    fn test_folder_resource_shares_scope_links() {
        let chain = sample()
            .ancestors(ResourceType::Folder, &ResourceId::new("folderA"), budget())
            .unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_unknown_resource_not_found() {
        let err = sample()
            .ancestors(ResourceType::Document, &ResourceId::new("nope"), budget())
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn test_cycle_detected() {
        let h = InMemoryHierarchy::new();
        h.nest(
            ScopeNode::new(Scope::Folder, "a"),
            ScopeNode::new(Scope::Folder, "b"),
        )
        .unwrap();
        h.nest(
            ScopeNode::new(Scope::Folder, "b"),
            ScopeNode::new(Scope::Folder, "a"),
        )
        .unwrap();
        let err = h
            .ancestors(ResourceType::Folder, &ResourceId::new("a"), budget())
            .unwrap_err();
        assert!(matches!(err, CoreError::Hierarchy(_)));
    }

    #[test]
    fn test_from_links_json() {
        let links: Vec<HierarchyLink> = serde_json::from_str(
            r#"[
                {"kind": "report", "id": "q4", "parent": {"scope": "project", "id": "apollo"}},
                {"kind": "project", "id": "apollo", "parent": {"scope": "global"}}
            ]"#,
        )
        .unwrap();
        let h = InMemoryHierarchy::from_links(links).unwrap();
        assert_eq!(h.len(), 2);
        let chain = h
            .ancestors(ResourceType::Report, &ResourceId::new("q4"), budget())
            .unwrap();
        assert_eq!(chain.last(), Some(&ScopeNode::global()));

        let bad = vec![HierarchyLink {
            kind: "planet".into(),
            id: ResourceId::new("x"),
            parent: ScopeNode::global(),
        }];
        assert!(InMemoryHierarchy::from_links(bad).is_err());
    }

    #[test]
    fn test_directory_memberships() {
        let dir = InMemoryDirectory::new();
        dir.add_membership("user123", SubjectRef::group("finance")).unwrap();
        dir.add_membership("user123", SubjectRef::role("editor")).unwrap();
        dir.add_membership("user123", SubjectRef::role("editor")).unwrap();
        let refs = dir
            .groups_and_roles(&SubjectId::new("user123"), budget())
            .unwrap();
        assert_eq!(refs, vec![SubjectRef::group("finance"), SubjectRef::role("editor")]);
        assert!(dir
            .groups_and_roles(&SubjectId::new("stranger"), budget())
            .unwrap()
            .is_empty());
    }
}
