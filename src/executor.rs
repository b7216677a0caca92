//! Bounded retries with classified backoff for single-record operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{classify, Error, RetryDecision};
use crate::record::Record;
use crate::rest::{Operation, RecordApi, SaveResult};
use crate::tracker::OperationResult;
use crate::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_SECS};

/// Applies one operation to one record with bounded, classified retries.
///
/// The executor never aborts a batch itself; a fatal error sets the shared
/// halt flag and the engine stops dispatching. Every call returns an
/// [`OperationResult`], never an error.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    max_attempts: u32,
    base_delay: Duration,
    halt: Arc<AtomicBool>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        )
    }
}

impl RetryExecutor {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            halt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The flag a fatal error raises. The engine checks it before each
    /// dispatch; clones of the executor share it.
    pub fn halt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halt)
    }

    pub fn is_halted(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    /// Applies `operation` to `record`, retrying transient failures with
    /// linearly growing delays up to the attempt bound.
    pub async fn execute(
        &self,
        api: &dyn RecordApi,
        object: &str,
        operation: Operation,
        record: &Record,
        external_id_field: Option<&str>,
    ) -> OperationResult {
        // Structural checks first: a record that cannot be addressed fails
        // locally with zero remote calls.
        if let Err(message) = validate_shape(operation, record, external_id_field) {
            return OperationResult::failure(record.clone(), message);
        }

        let mut attempt = 1u32;
        loop {
            match self
                .attempt(api, object, operation, record, external_id_field)
                .await
            {
                Ok(remote_id) => return OperationResult::success(record.clone(), remote_id),
                Err(error) => {
                    match classify(&error, attempt, self.base_delay) {
                        RetryDecision::Fatal => {
                            self.halt.store(true, Ordering::SeqCst);
                            warn!(%error, "fatal error, halting run");
                            return OperationResult::failure(record.clone(), error.to_string());
                        }
                        RetryDecision::NoRetry => {
                            return OperationResult::failure(record.clone(), error.to_string());
                        }
                        RetryDecision::RetryAfter(delay) => {
                            if attempt >= self.max_attempts {
                                return OperationResult::failure(
                                    record.clone(),
                                    error.to_string(),
                                );
                            }
                            warn!(%error, attempt, ?delay, "transient failure, retrying");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        api: &dyn RecordApi,
        object: &str,
        operation: Operation,
        record: &Record,
        external_id_field: Option<&str>,
    ) -> Result<Option<String>, Error> {
        match operation {
            Operation::Insert => {
                let SaveResult { id, .. } = api.create(object, record).await?;
                Ok(id)
            }
            Operation::Update => {
                // Presence checked in validate_shape.
                let id = record.id().unwrap_or_default();
                api.update(object, id, record).await?;
                Ok(Some(id.to_string()))
            }
            Operation::Delete => {
                let id = record.id().unwrap_or_default();
                api.delete(object, id).await?;
                Ok(Some(id.to_string()))
            }
            Operation::Upsert => {
                let field = external_id_field.unwrap_or_default();
                let value = record.field_str(field).unwrap_or_default();
                let SaveResult { id, .. } = api.upsert(object, field, value, record).await?;
                Ok(id)
            }
        }
    }
}

/// Checks that the record carries what the operation needs to address it.
fn validate_shape(
    operation: Operation,
    record: &Record,
    external_id_field: Option<&str>,
) -> Result<(), String> {
    match operation {
        Operation::Insert => Ok(()),
        Operation::Update | Operation::Delete => match record.id() {
            Some(id) if !id.is_empty() => Ok(()),
            _ => Err(format!("record has no Id field, cannot {operation}")),
        },
        Operation::Upsert => {
            let field = external_id_field
                .ok_or_else(|| "upsert requires an external id field".to_string())?;
            match record.field_str(field) {
                Some(value) if !value.is_empty() => Ok(()),
                _ => Err(format!("record has no value for external id field {field}")),
            }
        }
    }
}
