//! Administrative batch operations with per-item outcomes.

use permgate_core::{PermissionId, Timestamp};

use crate::error::{PermissionError, PermissionResult};
use crate::store::{Extension, PermissionStore};
use crate::types::{
    BatchItemResult, BatchOperationResult, BulkOperation, BulkParams, MAX_BATCH_SIZE,
};

/// Reject requests that cannot run at all: an empty or oversized batch, or
/// an operation missing its parameters.
pub fn validate_bulk_request(
    ids: &[PermissionId],
    operation: BulkOperation,
    params: &BulkParams,
) -> PermissionResult<()> {
    if ids.is_empty() || ids.len() > MAX_BATCH_SIZE {
        return Err(PermissionError::InvalidRequest(format!(
            "batch must contain between 1 and {} ids, got {}",
            MAX_BATCH_SIZE,
            ids.len()
        )));
    }
    match operation {
        BulkOperation::Extend if params.valid_until.is_none() && params.extend_by_secs.is_none() => {
            Err(PermissionError::InvalidRequest(
                "extend requires validUntil or extendBySecs".to_string(),
            ))
        }
        BulkOperation::Extend if params.extend_by_secs == Some(0) => Err(
            PermissionError::InvalidRequest("extendBySecs must be positive".to_string()),
        ),
        BulkOperation::Copy if params.target_subject.is_none() => Err(
            PermissionError::InvalidRequest("copy requires targetSubject".to_string()),
        ),
        _ => Ok(()),
    }
}

/// Apply `operation` to each id in order. Items never abort the batch.
pub fn execute_bulk(
    store: &PermissionStore,
    ids: &[PermissionId],
    operation: BulkOperation,
    params: &BulkParams,
    now: Timestamp,
) -> PermissionResult<BatchOperationResult> {
    validate_bulk_request(ids, operation, params)?;

    let mut results = Vec::with_capacity(ids.len());
    for id in ids {
        let outcome = apply_one(store, id, operation, params, now);
        let item = match outcome {
            Ok(new_id) => BatchItemResult {
                id: id.clone(),
                success: true,
                error: None,
                detail: None,
                new_id,
            },
            Err(e) => {
                tracing::debug!(%id, %operation, error = %e, "bulk item failed");
                BatchItemResult {
                    id: id.clone(),
                    success: false,
                    error: Some(e.kind().code().to_string()),
                    detail: Some(e.to_string()),
                    new_id: None,
                }
            }
        };
        results.push(item);
    }

    let successful = results.iter().filter(|r| r.success).count();
    Ok(BatchOperationResult {
        total: results.len(),
        successful,
        failed: results.len() - successful,
        results,
    })
}

/// Returns the id of a newly created record, if the operation made one.
fn apply_one(
    store: &PermissionStore,
    id: &PermissionId,
    operation: BulkOperation,
    params: &BulkParams,
    now: Timestamp,
) -> PermissionResult<Option<PermissionId>> {
    match operation {
        BulkOperation::Activate => store.set_active(id, true, now).map(|_| None),
        BulkOperation::Deactivate => store.set_active(id, false, now).map(|_| None),
        BulkOperation::Delete => store.delete(id).map(|_| None),
        BulkOperation::Revoke => store.revoke(id, params.reason.clone(), now).map(|_| None),
        BulkOperation::Extend => {
            let extension = match (params.valid_until, params.extend_by_secs) {
                (Some(until), _) => Extension::Until(until),
                (None, Some(secs)) => Extension::By(secs),
                (None, None) => {
                    return Err(PermissionError::InvalidRequest(
                        "extend requires validUntil or extendBySecs".to_string(),
                    ))
                }
            };
            store.extend(id, extension, now).map(|_| None)
        }
        BulkOperation::Copy => {
            let target = params.target_subject.clone().ok_or_else(|| {
                PermissionError::InvalidRequest("copy requires targetSubject".to_string())
            })?;
            store.copy_to(id, target, now).map(|copy| Some(copy.id))
        }
    }
}
