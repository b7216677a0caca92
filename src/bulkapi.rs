//! Bulk API v2 for ingesting and querying large data sets asynchronously.
//!
//! An ingest job is created, fed a CSV payload, closed, and then polled
//! until the service finishes processing it server-side; results come back
//! as three CSV sets (successful, failed, unprocessed). Query jobs follow
//! the same lifecycle with a single result set.
//!
//! [`JobApi`] is the HTTP seam; [`ingest::IngestClient`] and
//! [`query::QueryClient`] orchestrate the lifecycle on top of it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sforce_sync::client::{self, Credentials};
//! use sforce_sync::bulkapi::{ingest::IngestClient, HttpJobApi};
//! use sforce_sync::rest::Operation;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let auth = Arc::new(
//!     client::Builder::new()
//!         .credentials(Credentials {
//!             client_id: "...".to_string(),
//!             client_secret: "...".to_string(),
//!             username: "user@example.com".to_string(),
//!             password: "...".to_string(),
//!             token_url: "https://login.salesforce.com/services/oauth2/token".to_string(),
//!         })
//!         .build()?,
//! );
//!
//! let ingest = IngestClient::new(Arc::new(HttpJobApi::new(auth)?));
//! let job = ingest.submit("Account", Operation::Insert, &[], None).await?;
//! println!("submitted job {}", job.job_id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;
use crate::{POLL_INITIAL_INTERVAL_SECS, POLL_INTERVAL_STEP_SECS, POLL_MAX_INTERVAL_SECS};

mod client;
pub mod ingest;
pub mod query;

pub use client::HttpJobApi;

/// Wire states of a bulk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Created and accepting data.
    Open,
    /// Data uploaded; queued for processing.
    UploadComplete,
    /// Being processed server-side.
    InProgress,
    /// Processed; results are available.
    JobComplete,
    /// Processing failed.
    Failed,
    /// Aborted by the caller.
    Aborted,
}

impl JobState {
    /// Terminal states end the poll loop.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::JobComplete | JobState::Failed | JobState::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Open => "Open",
            JobState::UploadComplete => "UploadComplete",
            JobState::InProgress => "InProgress",
            JobState::JobComplete => "JobComplete",
            JobState::Failed => "Failed",
            JobState::Aborted => "Aborted",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query job flavors. `QueryAll` includes deleted and archived rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperation {
    Query,
    QueryAll,
}

impl QueryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOperation::Query => "query",
            QueryOperation::QueryAll => "queryAll",
        }
    }
}

/// Request body for creating an ingest job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub object: String,
    /// One of `insert`, `update`, `upsert`, `delete`.
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id_field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_ending: Option<String>,
}

/// Request body for creating a query job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQueryJobRequest {
    /// `query` or `queryAll`.
    pub operation: String,
    pub query: String,
}

/// Job information as the service reports it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: String,
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    pub state: JobState,
    #[serde(default)]
    pub number_records_processed: Option<u64>,
    #[serde(default)]
    pub number_records_failed: Option<u64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub content_url: Option<String>,
}

/// Handle to a submitted job.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub job_id: String,
    pub object: String,
    /// Operation tag, e.g. `insert` or `query`.
    pub operation: String,
    /// State at the time the descriptor was produced.
    pub state: JobState,
    pub created_at: DateTime<Utc>,
}

/// The three CSV result sets of a finished ingest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSet {
    Successful,
    Failed,
    Unprocessed,
}

impl ResultSet {
    /// URL path segment for the result set.
    pub(crate) fn path(&self) -> &'static str {
        match self {
            ResultSet::Successful => "successfulResults",
            ResultSet::Failed => "failedResults",
            ResultSet::Unprocessed => "unprocessedrecords",
        }
    }
}

/// Raw bulk job endpoints.
///
/// The ingest and query clients depend on this trait rather than on
/// [`HttpJobApi`] directly, so tests substitute in-memory fakes.
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn create_ingest_job(&self, request: &CreateJobRequest) -> Result<JobInfo, Error>;
    async fn upload_ingest_data(&self, job_id: &str, csv: &[u8]) -> Result<(), Error>;
    async fn set_ingest_state(&self, job_id: &str, state: JobState) -> Result<JobInfo, Error>;
    async fn get_ingest_job(&self, job_id: &str) -> Result<JobInfo, Error>;
    async fn get_ingest_results(&self, job_id: &str, set: ResultSet) -> Result<Vec<u8>, Error>;

    async fn create_query_job(&self, request: &CreateQueryJobRequest) -> Result<JobInfo, Error>;
    async fn set_query_state(&self, job_id: &str, state: JobState) -> Result<JobInfo, Error>;
    async fn get_query_job(&self, job_id: &str) -> Result<JobInfo, Error>;
    async fn get_query_results(&self, job_id: &str) -> Result<Vec<u8>, Error>;
}

/// Polls `poll` until the job reaches a terminal state or `cancel` fires.
///
/// The interval between polls grows linearly from the initial value up to
/// the cap, so short jobs finish quickly and long jobs are not hammered.
pub(crate) async fn wait_for_terminal<F, Fut>(
    poll: F,
    cancel: &CancellationToken,
) -> Result<JobState, Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<JobInfo, Error>>,
{
    let mut interval = std::time::Duration::from_secs(POLL_INITIAL_INTERVAL_SECS);
    let cap = std::time::Duration::from_secs(POLL_MAX_INTERVAL_SECS);
    loop {
        let info = poll().await?;
        if info.state.is_terminal() {
            debug!(job_id = %info.id, state = %info.state, "job reached terminal state");
            return Ok(info.state);
        }
        debug!(job_id = %info.id, state = %info.state, ?interval, "job still running");
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
        interval = (interval + std::time::Duration::from_secs(POLL_INTERVAL_STEP_SECS)).min(cap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(JobState::JobComplete.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Aborted.is_terminal());
        assert!(!JobState::Open.is_terminal());
        assert!(!JobState::UploadComplete.is_terminal());
        assert!(!JobState::InProgress.is_terminal());
    }

    #[test]
    fn test_job_state_wire_names() {
        assert_eq!(
            serde_json::to_string(&JobState::UploadComplete).unwrap(),
            "\"UploadComplete\""
        );
        let state: JobState = serde_json::from_str("\"JobComplete\"").unwrap();
        assert_eq!(state, JobState::JobComplete);
    }

    #[test]
    fn test_create_job_request_omits_absent_fields() {
        let request = CreateJobRequest {
            object: "Account".to_string(),
            operation: "insert".to_string(),
            content_type: Some("CSV".to_string()),
            external_id_field_name: None,
            line_ending: Some("LF".to_string()),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"contentType\":\"CSV\""));
        assert!(json.contains("\"lineEnding\":\"LF\""));
        assert!(!json.contains("externalIdFieldName"));
    }

    #[test]
    fn test_job_info_parses_camel_case() {
        let json = r#"{
            "id": "750xx0000000001",
            "object": "Account",
            "operation": "insert",
            "state": "InProgress",
            "numberRecordsProcessed": 120,
            "numberRecordsFailed": 3,
            "contentUrl": "services/data/v62.0/jobs/ingest/750xx0000000001/batches"
        }"#;
        let info: JobInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.id, "750xx0000000001");
        assert_eq!(info.state, JobState::InProgress);
        assert_eq!(info.number_records_processed, Some(120));
        assert_eq!(info.number_records_failed, Some(3));
        assert!(info.error_message.is_none());
    }

    #[test]
    fn test_result_set_paths() {
        assert_eq!(ResultSet::Successful.path(), "successfulResults");
        assert_eq!(ResultSet::Failed.path(), "failedResults");
        assert_eq!(ResultSet::Unprocessed.path(), "unprocessedrecords");
    }
}
