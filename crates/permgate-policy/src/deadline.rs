//! Bounded collaborator calls.
//!
//! Collaborators receive their budget but are not trusted to honor it.
//! Each lookup runs on its own thread and the caller stops waiting once
//! the budget is spent; a lookup that finishes late is discarded.

use permgate_core::{CoreError, CoreResult};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Run `lookup` and wait at most `budget` for its result.
///
/// Returns [`CoreError::Timeout`] when the budget passes first. The worker
/// thread is left to finish on its own.
pub fn call_with_deadline<T, F>(budget: Duration, lookup: F) -> CoreResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> CoreResult<T> + Send + 'static,
{
    let budget_ms = budget.as_millis() as u64;
    if budget.is_zero() {
        return Err(CoreError::Timeout { budget_ms });
    }

    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("permgate-lookup".into())
        .spawn(move || {
            // receiver is gone once the caller stopped waiting
            let _ = tx.send(lookup());
        })
        .map_err(|e| CoreError::Internal(format!("cannot start lookup thread: {}", e)))?;

    match rx.recv_timeout(budget) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(CoreError::Timeout { budget_ms }),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(CoreError::Internal("lookup thread exited without a result".into()))
        }
    }
}
