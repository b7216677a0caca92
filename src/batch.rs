//! Partitions record sequences into batches and selects the execution path.

use crate::error::Error;
use crate::record::Record;

/// How a run's records reach the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    /// Per-record REST calls, batched and retried locally.
    Sync,
    /// One asynchronous Bulk API v2 job carrying the whole sequence.
    Bulk,
}

impl ExecutionPath {
    /// Chooses the path from the caller's request. The choice is explicit
    /// and never inferred from record count.
    pub fn select(use_bulk_api: bool) -> ExecutionPath {
        if use_bulk_api {
            ExecutionPath::Bulk
        } else {
            ExecutionPath::Sync
        }
    }
}

/// Splits records into contiguous, order-preserving batches of at most
/// `batch_size`. The final batch may be shorter; no batch is empty.
pub fn plan(records: &[Record], batch_size: usize) -> Result<Vec<&[Record]>, Error> {
    if batch_size == 0 {
        return Err(Error::Config(
            "batch size must be at least 1".to_string(),
        ));
    }
    Ok(records.chunks(batch_size).collect())
}
