//! Permgate Root Library
//!
//! Configuration, seed loading and the orchestration layer behind the
//! `permgate` binary. The root binary is a thin shell: it loads the TOML
//! configuration, fills the in-memory store, hierarchy and directory from
//! JSON seed files, and hands requests to the policy engine.
//!
//! Seed file formats:
//!
//! - permissions: array of grant requests, each with an optional `id`.
//! - hierarchy: array of `{ "kind", "id", "parent": { "scope", "id" } }`.
//! - directory: array of `{ "subjectId", "memberOf": [{ "kind", "id" }] }`.

pub mod config;
pub mod error;

pub use config::{DataConfig, EngineSection, RootConfig};
pub use error::{RootError, RootResult};

use permgate_core::{PermissionId, Timestamp};
use permgate_policy::{
    validate_permission, CreatePermissionInput, EvaluationContext, HierarchyLink,
    InMemoryDirectory, InMemoryHierarchy, Membership, Permission, PermissionEngine,
    PermissionStore, TracingAuditSink,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Seed records
// ---------------------------------------------------------------------------

/// One entry of a permissions seed file. Without an `id`, a fresh one is
/// generated at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionSeed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PermissionId>,
    #[serde(flatten)]
    pub input: CreatePermissionInput,
}

/// Outcome of checking a permissions seed file without loading it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub total: usize,
    pub valid: usize,
    /// `(index, id-or-placeholder, errors)` for every rejected entry.
    pub invalid: Vec<(usize, String, Vec<String>)>,
}

impl SeedReport {
    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty()
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> RootResult<T> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| {
        RootError::Serialization(format!("{}: {}", path.display(), e))
    })
}

pub fn read_permission_seeds(path: &Path) -> RootResult<Vec<PermissionSeed>> {
    read_json(path)
}

/// Validate every seed the way the store would, without storing anything.
pub fn validate_seeds(seeds: &[PermissionSeed], now: Timestamp) -> SeedReport {
    let mut report = SeedReport {
        total: seeds.len(),
        ..SeedReport::default()
    };
    for (index, seed) in seeds.iter().enumerate() {
        let id = seed
            .id
            .clone()
            .unwrap_or_else(|| PermissionId::new(format!("#{}", index)));
        let permission = Permission::from_input(seed.input.clone(), id.clone(), now);
        match validate_permission(&permission) {
            Ok(()) => report.valid += 1,
            Err(errors) => report.invalid.push((index, id.to_string(), errors)),
        }
    }
    report
}

/// Load seeds into `store`. Stops at the first rejected entry.
pub fn load_permissions(
    store: &PermissionStore,
    seeds: Vec<PermissionSeed>,
    now: Timestamp,
) -> RootResult<usize> {
    let count = seeds.len();
    for seed in seeds {
        let id = seed.id.unwrap_or_else(PermissionId::generate);
        store.create_with_id(seed.input, id, now)?;
    }
    Ok(count)
}

pub fn load_hierarchy(path: &Path) -> RootResult<InMemoryHierarchy> {
    let links: Vec<HierarchyLink> = read_json(path)?;
    Ok(InMemoryHierarchy::from_links(links)?)
}

pub fn load_directory(path: &Path) -> RootResult<InMemoryDirectory> {
    let memberships: Vec<Membership> = read_json(path)?;
    Ok(InMemoryDirectory::from_memberships(memberships)?)
}

/// Read an evaluation context from a JSON file.
///
/// `at` overrides the file's `timestamp`. When neither is present the
/// wall clock is used.
pub fn read_context(path: &Path, at: Option<Timestamp>) -> RootResult<EvaluationContext> {
    let mut value: serde_json::Value = read_json(path)?;
    let object = value.as_object_mut().ok_or_else(|| {
        RootError::InvalidArgument(format!("{}: context must be a JSON object", path.display()))
    })?;
    if at.is_some() || !object.contains_key("timestamp") {
        let timestamp = at.unwrap_or_else(Timestamp::now);
        object.insert("timestamp".into(), serde_json::to_value(timestamp)?);
    }
    Ok(serde_json::from_value(value)?)
}

// ---------------------------------------------------------------------------
// Root state
// ---------------------------------------------------------------------------

/// All initialized subsystems. The engine borrows the store and audit
/// sink from here and shares the collaborators.
pub struct RootState {
    pub config: RootConfig,
    pub store: PermissionStore,
    pub hierarchy: Arc<InMemoryHierarchy>,
    pub directory: Arc<InMemoryDirectory>,
    pub audit: TracingAuditSink,
}

impl RootState {
    pub fn engine(&self) -> PermissionEngine<'_> {
        PermissionEngine::new(
            &self.store,
            self.hierarchy.clone(),
            self.directory.clone(),
            &self.audit,
            self.config.engine_config(),
        )
    }
}

/// Initialize the root state from configuration: validate it, then load
/// whatever seed files it names.
pub fn initialize_root(config: RootConfig) -> RootResult<RootState> {
    config.validate()?;
    let now = Timestamp::now();

    let store = PermissionStore::new();
    if let Some(path) = &config.data.permissions_path {
        let seeds = read_permission_seeds(path)?;
        let count = load_permissions(&store, seeds, now)?;
        info!(count, path = %path.display(), "permissions loaded");
    }

    let hierarchy = match &config.data.hierarchy_path {
        Some(path) => {
            let hierarchy = load_hierarchy(path)?;
            info!(links = hierarchy.len(), path = %path.display(), "hierarchy loaded");
            hierarchy
        }
        None => InMemoryHierarchy::new(),
    };

    let directory = match &config.data.directory_path {
        Some(path) => {
            let directory = load_directory(path)?;
            info!(path = %path.display(), "directory loaded");
            directory
        }
        None => InMemoryDirectory::new(),
    };

    debug!(
        defaults = config.defaults.len(),
        evaluation_timeout_ms = config.engine.evaluation_timeout_ms,
        "root state initialized"
    );

    Ok(RootState {
        config,
        store,
        hierarchy: Arc::new(hierarchy),
        directory: Arc::new(directory),
        audit: TracingAuditSink,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use permgate_core::{Scope, SubjectRef};
    use permgate_policy::{Action, DocumentAction};

    fn read() -> Action {
        Action::Document(DocumentAction::Read)
    }

    #[test]
    fn test_permission_seed_parses_flattened_input() {
        let json = r#"{
            "id": "p1",
            "type": "document:read",
            "effect": "allow",
            "scope": "document",
            "resourceId": "doc1",
            "subject": { "kind": "user", "id": "u1" },
            "priority": 10
        }"#;
        let seed: PermissionSeed = serde_json::from_str(json).unwrap();
        assert_eq!(seed.id, Some(PermissionId::new("p1")));
        assert_eq!(seed.input.action, read());
        assert_eq!(seed.input.priority, Some(10));
        assert_eq!(seed.input.subject, SubjectRef::user("u1"));
    }

    #[test]
    fn test_validate_seeds_reports_bad_entries() {
        let good = PermissionSeed {
            id: Some(PermissionId::new("ok")),
            input: CreatePermissionInput::allow(SubjectRef::user("u1"), read(), Scope::Document)
                .on("doc1"),
        };
        let missing_resource = PermissionSeed {
            id: None,
            input: CreatePermissionInput::allow(SubjectRef::user("u1"), read(), Scope::Folder),
        };
        let report = validate_seeds(&[good, missing_resource], Timestamp::from_seconds(1_000));
        assert_eq!(report.total, 2);
        assert_eq!(report.valid, 1);
        assert!(!report.is_clean());
        assert_eq!(report.invalid[0].0, 1);
        assert_eq!(report.invalid[0].1, "#1");
    }

    #[test]
    fn test_load_permissions_keeps_seed_ids() {
        let store = PermissionStore::new();
        let seeds = vec![PermissionSeed {
            id: Some(PermissionId::new("seeded")),
            input: CreatePermissionInput::allow(SubjectRef::user("u1"), read(), Scope::Global),
        }];
        let count = load_permissions(&store, seeds, Timestamp::from_seconds(1_000)).unwrap();
        assert_eq!(count, 1);
        assert!(store.get(&PermissionId::new("seeded")).is_ok());
    }

    #[test]
    fn test_initialize_root_without_seed_files() {
        let state = initialize_root(RootConfig::default()).unwrap();
        assert!(state.store.is_empty());
        assert!(state.hierarchy.is_empty());
        assert_eq!(state.engine().config().timeouts.evaluation_timeout_ms, 5000);
    }

    #[test]
    fn test_initialize_root_invalid_config() {
        let mut config = RootConfig::default();
        config.engine.evaluation_timeout_ms = 0;
        assert!(matches!(initialize_root(config), Err(RootError::Config(_))));
    }

    #[test]
    fn test_initialize_root_missing_seed_file() {
        let mut config = RootConfig::default();
        config.data.permissions_path = Some("/nonexistent/permissions.json".into());
        assert!(matches!(initialize_root(config), Err(RootError::Io(_))));
    }
}
