use permgate_core::{PermissionId, RecordVersion, SubjectRef, Timestamp};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::action::Action;
use crate::error::{PermissionError, PermissionResult};
use crate::types::{CreatePermissionInput, Permission, PermissionPatch};
use crate::validation::validate_permission;

type Records = HashMap<PermissionId, Permission>;

/// How far [`PermissionStore::extend`] moves a permission's expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    /// Set `valid_until` to this instant, which must be later than the
    /// current expiry.
    Until(Timestamp),
    /// Add seconds to the current expiry, or to `now` when the permission
    /// has none or has already lapsed.
    By(u64),
}

/// Owns permission records.
///
/// Reads share a read lock so concurrent evaluations never wait on each
/// other. Every mutation takes the write lock, re-validates the record and
/// bumps its version.
#[derive(Debug, Default)]
pub struct PermissionStore {
    records: RwLock<Records>,
}

impl PermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> PermissionResult<RwLockReadGuard<'_, Records>> {
        self.records
            .read()
            .map_err(|e| PermissionError::Storage(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> PermissionResult<RwLockWriteGuard<'_, Records>> {
        self.records
            .write()
            .map_err(|e| PermissionError::Storage(format!("lock poisoned: {}", e)))
    }

    /// Validate and store a new grant under a generated id.
    pub fn create(&self, input: CreatePermissionInput, now: Timestamp) -> PermissionResult<Permission> {
        self.create_with_id(input, PermissionId::generate(), now)
    }

    /// Validate and store a new grant under a caller-chosen id.
    pub fn create_with_id(
        &self,
        input: CreatePermissionInput,
        id: PermissionId,
        now: Timestamp,
    ) -> PermissionResult<Permission> {
        let permission = Permission::from_input(input, id, now);
        validate_permission(&permission).map_err(PermissionError::Validation)?;

        let mut records = self.write()?;
        if records.contains_key(&permission.id) {
            return Err(PermissionError::validation(format!(
                "permission id '{}' already exists",
                permission.id
            )));
        }
        records.insert(permission.id.clone(), permission.clone());
        Ok(permission)
    }

    pub fn get(&self, id: &PermissionId) -> PermissionResult<Permission> {
        self.read()?
            .get(id)
            .cloned()
            .ok_or_else(|| PermissionError::NotFound(id.clone()))
    }

    /// All records, ordered by id.
    pub fn list(&self) -> PermissionResult<Vec<Permission>> {
        let mut all: Vec<Permission> = self.read()?.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    pub fn len(&self) -> usize {
        self.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Active permissions for `action` granted to any of `subjects`,
    /// ordered by id. Scope, validity and conditions are left to the engine.
    pub fn find_candidates(
        &self,
        subjects: &[SubjectRef],
        action: Action,
    ) -> PermissionResult<Vec<Permission>> {
        let mut found: Vec<Permission> = self
            .read()?
            .values()
            .filter(|p| p.is_active && p.action == action && subjects.contains(&p.subject))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    /// Apply a partial update if the stored version still equals
    /// `expected_version`.
    pub fn update(
        &self,
        id: &PermissionId,
        patch: PermissionPatch,
        expected_version: RecordVersion,
        now: Timestamp,
    ) -> PermissionResult<Permission> {
        self.mutate(id, Some(expected_version), now, |p| {
            patch.apply(p);
            Ok(())
        })
    }

    pub fn delete(&self, id: &PermissionId) -> PermissionResult<Permission> {
        self.write()?
            .remove(id)
            .ok_or_else(|| PermissionError::NotFound(id.clone()))
    }

    /// Soft removal: the record stays for audit but never matches again
    /// until reactivated.
    pub fn revoke(
        &self,
        id: &PermissionId,
        reason: Option<String>,
        now: Timestamp,
    ) -> PermissionResult<Permission> {
        self.mutate(id, None, now, |p| {
            p.is_active = false;
            p.metadata.revoked_at = Some(now);
            if reason.is_some() {
                p.metadata.reason = reason;
            }
            Ok(())
        })
    }

    pub fn set_active(
        &self,
        id: &PermissionId,
        active: bool,
        now: Timestamp,
    ) -> PermissionResult<Permission> {
        self.mutate(id, None, now, |p| {
            p.is_active = active;
            if active {
                p.metadata.revoked_at = None;
            }
            Ok(())
        })
    }

    /// Move `valid_until` later. Shortening is rejected. The new expiry is
    /// computed from the record as it is under the write lock, so
    /// concurrent relative extensions add up.
    pub fn extend(
        &self,
        id: &PermissionId,
        extension: Extension,
        now: Timestamp,
    ) -> PermissionResult<Permission> {
        self.mutate(id, None, now, |p| {
            let valid_until = match extension {
                Extension::Until(until) => {
                    if let Some(current) = p.valid_until {
                        if until <= current {
                            return Err(PermissionError::validation(format!(
                                "new validUntil {} is not after the current {}",
                                until, current
                            )));
                        }
                    }
                    until
                }
                Extension::By(secs) => p.valid_until.unwrap_or(now).max(now).plus_seconds(secs),
            };
            p.valid_until = Some(valid_until);
            Ok(())
        })
    }

    /// Duplicate a permission for another subject under a fresh id.
    pub fn copy_to(
        &self,
        id: &PermissionId,
        target: SubjectRef,
        now: Timestamp,
    ) -> PermissionResult<Permission> {
        let mut records = self.write()?;
        let source = records
            .get(id)
            .ok_or_else(|| PermissionError::NotFound(id.clone()))?;

        let mut copy = source.clone();
        copy.id = PermissionId::generate();
        copy.subject = target;
        copy.version = RecordVersion::initial();
        copy.metadata.created_at = now;
        copy.metadata.updated_at = now;
        copy.metadata.revoked_at = None;
        validate_permission(&copy).map_err(PermissionError::Validation)?;

        records.insert(copy.id.clone(), copy.clone());
        Ok(copy)
    }

    #[cfg(test)]
    pub(crate) fn insert_unchecked(&self, permission: Permission) {
        if let Ok(mut records) = self.write() {
            records.insert(permission.id.clone(), permission);
        }
    }

    fn mutate<F>(
        &self,
        id: &PermissionId,
        expected_version: Option<RecordVersion>,
        now: Timestamp,
        change: F,
    ) -> PermissionResult<Permission>
    where
        F: FnOnce(&mut Permission) -> PermissionResult<()>,
    {
        let mut records = self.write()?;
        let current = records
            .get(id)
            .ok_or_else(|| PermissionError::NotFound(id.clone()))?;

        if let Some(expected) = expected_version {
            if current.version != expected {
                return Err(PermissionError::Conflict {
                    id: id.clone(),
                    expected,
                    actual: current.version,
                });
            }
        }

        let mut next = current.clone();
        change(&mut next)?;
        next.id = id.clone();
        next.version = current.version.next();
        next.metadata.updated_at = now;
        validate_permission(&next).map_err(PermissionError::Validation)?;

        records.insert(id.clone(), next.clone());
        Ok(next)
    }
}
