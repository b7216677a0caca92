//! Aggregates per-record outcomes into run reports and recent history.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::Record;

/// Outcome of one record's operation, success or failure.
#[derive(Debug, Clone)]
pub struct OperationResult {
    /// The record as it was submitted.
    pub record: Record,
    pub succeeded: bool,
    /// Failure message, verbatim from the last error.
    pub error: Option<String>,
    /// Remote identifier, when the operation yields one.
    pub remote_id: Option<String>,
}

impl OperationResult {
    pub fn success(record: Record, remote_id: Option<String>) -> Self {
        Self {
            record,
            succeeded: true,
            error: None,
            remote_id,
        }
    }

    pub fn failure(record: Record, error: impl Into<String>) -> Self {
        Self {
            record,
            succeeded: false,
            error: Some(error.into()),
            remote_id: None,
        }
    }
}

/// A record that failed, with the error and when it was recorded.
#[derive(Debug, Clone, Serialize)]
pub struct FailedRecord {
    pub record: Record,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Summary of one run. Produced for every run, halted or not.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Records considered, including those never attempted after a halt.
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failures in submission order.
    pub failed_records: Vec<FailedRecord>,
    /// True when the run stopped early on a run-level error.
    pub halted: bool,
    pub timestamp: DateTime<Utc>,
}

/// One successfully processed record, tagged with its operation.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub record: Record,
    /// Operation tag, e.g. `insert` or `retrieve`.
    pub operation: String,
    pub timestamp: DateTime<Utc>,
}

/// Fixed-capacity buffer of recently processed records. Oldest entries are
/// evicted on overflow. Shared across runs of one engine.
#[derive(Debug)]
pub struct RecentHistory {
    capacity: usize,
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl RecentHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Appends an entry, evicting the oldest when at capacity.
    pub fn push(&self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Copies out the entries, oldest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct Counts {
    total: usize,
    succeeded: usize,
    failed_records: Vec<FailedRecord>,
}

/// Collects [`OperationResult`]s for one run.
#[derive(Debug)]
pub struct OutcomeTracker {
    history: Arc<RecentHistory>,
    counts: Mutex<Counts>,
    halted: AtomicBool,
}

impl OutcomeTracker {
    pub fn new(history: Arc<RecentHistory>) -> Self {
        Self {
            history,
            counts: Mutex::new(Counts::default()),
            halted: AtomicBool::new(false),
        }
    }

    /// Records one outcome. Successes are also appended to the shared
    /// recent history under the given operation tag.
    pub fn record(&self, operation: &str, result: &OperationResult) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.total += 1;
        if result.succeeded {
            counts.succeeded += 1;
            self.history.push(HistoryEntry {
                record: result.record.clone(),
                operation: operation.to_string(),
                timestamp: Utc::now(),
            });
        } else {
            counts.failed_records.push(FailedRecord {
                record: result.record.clone(),
                error: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
                timestamp: Utc::now(),
            });
        }
    }

    /// Marks records that were never attempted (run halted) as failures.
    pub fn record_not_attempted<'a>(
        &self,
        records: impl IntoIterator<Item = &'a Record>,
        message: &str,
    ) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        for record in records {
            counts.total += 1;
            counts.failed_records.push(FailedRecord {
                record: record.clone(),
                error: message.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    /// Marks the run as having stopped early.
    pub fn mark_halted(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    /// Produces the report for everything recorded so far.
    pub fn report(&self) -> RunReport {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        RunReport {
            total: counts.total,
            succeeded: counts.succeeded,
            failed: counts.failed_records.len(),
            failed_records: counts.failed_records.clone(),
            halted: self.halted.load(Ordering::SeqCst),
            timestamp: Utc::now(),
        }
    }
}
