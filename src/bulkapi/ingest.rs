//! Ingest job orchestration: submit, poll, wait, fetch results, abort.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{
    wait_for_terminal, CreateJobRequest, JobApi, JobDescriptor, JobState, ResultSet,
};
use crate::codec::{self, Format};
use crate::error::Error;
use crate::record::Record;
use crate::rest::Operation;

/// Result columns the service prepends to each row.
const SF_ID: &str = "sf__Id";
const SF_CREATED: &str = "sf__Created";
const SF_ERROR: &str = "sf__Error";

/// Decoded result sets of a finished ingest job.
#[derive(Debug, Default)]
pub struct IngestResults {
    /// Records the service applied, with their assigned `Id`.
    pub succeeded: Vec<Record>,
    /// Records the service rejected, with the error text per record.
    pub failed: Vec<(Record, String)>,
    /// Records the service never processed (for example after a mid-job
    /// failure).
    pub unprocessed: Vec<Record>,
}

/// Drives the ingest job lifecycle over a [`JobApi`].
#[derive(Clone)]
pub struct IngestClient {
    api: Arc<dyn JobApi>,
}

impl IngestClient {
    pub fn new(api: Arc<dyn JobApi>) -> Self {
        Self { api }
    }

    /// Submits one job carrying the whole record sequence: create the job,
    /// upload the CSV payload, and close it for processing.
    ///
    /// If the upload or close fails after the job was created, the job is
    /// aborted best-effort before the error is returned, so the org is not
    /// left with a dangling open job.
    pub async fn submit(
        &self,
        object: &str,
        operation: Operation,
        records: &[Record],
        external_id_field: Option<&str>,
    ) -> Result<JobDescriptor, Error> {
        if records.is_empty() {
            return Err(Error::Submission {
                message: "no records to submit".to_string(),
            });
        }
        if operation == Operation::Upsert && external_id_field.is_none() {
            return Err(Error::Submission {
                message: "upsert requires an external id field".to_string(),
            });
        }

        let csv = codec::encode_ingest_csv(records)?;
        let job = self
            .api
            .create_ingest_job(&CreateJobRequest {
                object: object.to_string(),
                operation: operation.as_str().to_string(),
                content_type: Some("CSV".to_string()),
                external_id_field_name: external_id_field.map(str::to_string),
                line_ending: Some("LF".to_string()),
            })
            .await?;
        info!(job_id = %job.id, %object, operation = %operation, records = records.len(), "created ingest job");

        if let Err(error) = self.upload_and_close(&job.id, &csv).await {
            warn!(job_id = %job.id, %error, "submission failed, aborting job");
            if let Err(abort_error) = self.api.set_ingest_state(&job.id, JobState::Aborted).await {
                warn!(job_id = %job.id, %abort_error, "abort failed");
            }
            return Err(error);
        }

        Ok(JobDescriptor {
            job_id: job.id,
            object: object.to_string(),
            operation: operation.as_str().to_string(),
            state: JobState::UploadComplete,
            created_at: chrono::Utc::now(),
        })
    }

    async fn upload_and_close(&self, job_id: &str, csv: &[u8]) -> Result<(), Error> {
        self.api.upload_ingest_data(job_id, csv).await?;
        self.api
            .set_ingest_state(job_id, JobState::UploadComplete)
            .await?;
        Ok(())
    }

    /// One non-blocking state check.
    pub async fn poll(&self, job_id: &str) -> Result<JobState, Error> {
        Ok(self.api.get_ingest_job(job_id).await?.state)
    }

    /// Polls until the job reaches a terminal state. There is no implicit
    /// timeout; cancel via the token to stop waiting.
    pub async fn wait(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<JobState, Error> {
        wait_for_terminal(|| self.api.get_ingest_job(job_id), cancel).await
    }

    /// Fetches and decodes the three result sets of a completed job.
    ///
    /// # Errors
    ///
    /// [`Error::JobFailed`] when the job ended `Failed` or `Aborted` (the
    /// service's error message is carried through) or has not finished.
    pub async fn fetch_results(&self, job_id: &str) -> Result<IngestResults, Error> {
        let job = self.api.get_ingest_job(job_id).await?;
        match job.state {
            JobState::JobComplete => {}
            JobState::Failed | JobState::Aborted => {
                return Err(Error::JobFailed {
                    job_id: job_id.to_string(),
                    state: job.state.to_string(),
                    message: job
                        .error_message
                        .unwrap_or_else(|| "no error detail reported".to_string()),
                });
            }
            other => {
                return Err(Error::JobFailed {
                    job_id: job_id.to_string(),
                    state: other.to_string(),
                    message: "job has not finished processing".to_string(),
                });
            }
        }

        let succeeded = self.result_set(job_id, ResultSet::Successful).await?;
        let failed = self.result_set(job_id, ResultSet::Failed).await?;
        let unprocessed = self.result_set(job_id, ResultSet::Unprocessed).await?;

        Ok(IngestResults {
            succeeded: succeeded.into_iter().map(split_success).collect(),
            failed: failed.into_iter().map(split_failure).collect(),
            unprocessed: unprocessed.into_iter().map(strip_result_columns).collect(),
        })
    }

    /// Best-effort result retrieval for a job that ended `Failed` or
    /// `Aborted`: whatever sets the service still exposes, with any set
    /// that cannot be fetched left empty, plus the job's error message.
    pub async fn partial_results(&self, job_id: &str) -> (IngestResults, Option<String>) {
        let error_message = self
            .api
            .get_ingest_job(job_id)
            .await
            .ok()
            .and_then(|job| job.error_message);
        let mut results = IngestResults::default();
        if let Ok(records) = self.result_set(job_id, ResultSet::Successful).await {
            results.succeeded = records.into_iter().map(split_success).collect();
        }
        if let Ok(records) = self.result_set(job_id, ResultSet::Failed).await {
            results.failed = records.into_iter().map(split_failure).collect();
        }
        if let Ok(records) = self.result_set(job_id, ResultSet::Unprocessed).await {
            results.unprocessed = records.into_iter().map(strip_result_columns).collect();
        }
        (results, error_message)
    }

    /// Aborts the job. The service rejects aborts of jobs already terminal.
    pub async fn abort(&self, job_id: &str) -> Result<JobState, Error> {
        let job = self.api.set_ingest_state(job_id, JobState::Aborted).await?;
        Ok(job.state)
    }

    async fn result_set(&self, job_id: &str, set: ResultSet) -> Result<Vec<Record>, Error> {
        let csv = self.api.get_ingest_results(job_id, set).await?;
        codec::decode(&csv, Format::Csv)
    }
}

/// Successful rows carry `sf__Id`/`sf__Created`; fold the id into the
/// record's own `Id` field and drop the rest.
fn split_success(mut record: Record) -> Record {
    if let Some(id) = record.remove(SF_ID) {
        record.insert("Id", id);
    }
    record.remove(SF_CREATED);
    record
}

/// Failed rows carry the error in `sf__Error`.
fn split_failure(record: Record) -> (Record, String) {
    let mut record = record;
    let error = record
        .remove(SF_ERROR)
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown error".to_string());
    record.remove(SF_ID);
    record.remove(SF_CREATED);
    (record, error)
}

fn strip_result_columns(mut record: Record) -> Record {
    record.remove(SF_ID);
    record.remove(SF_CREATED);
    record.remove(SF_ERROR);
    record
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bulkapi::{CreateQueryJobRequest, JobInfo};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// In-memory job endpoint: records the call sequence, serves scripted
    /// poll states, and hands back canned result CSVs.
    #[derive(Default)]
    pub(crate) struct FakeJobApi {
        pub calls: Mutex<Vec<String>>,
        pub uploaded: Mutex<Vec<u8>>,
        /// States served by successive get calls; the last repeats.
        pub poll_states: Mutex<Vec<JobState>>,
        pub error_message: Mutex<Option<String>>,
        pub fail_upload: bool,
        pub successful_csv: Mutex<Vec<u8>>,
        pub failed_csv: Mutex<Vec<u8>>,
        pub unprocessed_csv: Mutex<Vec<u8>>,
        pub query_csv: Mutex<Vec<u8>>,
    }

    impl FakeJobApi {
        pub fn with_states(states: Vec<JobState>) -> Self {
            Self {
                poll_states: Mutex::new(states),
                ..Self::default()
            }
        }

        fn log(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn job(&self, id: &str, state: JobState) -> JobInfo {
            JobInfo {
                id: id.to_string(),
                object: Some("Account".to_string()),
                operation: Some("insert".to_string()),
                state,
                number_records_processed: None,
                number_records_failed: None,
                error_message: self.error_message.lock().unwrap().clone(),
                content_url: None,
            }
        }

        fn next_state(&self) -> JobState {
            let mut states = self.poll_states.lock().unwrap();
            if states.len() > 1 {
                states.remove(0)
            } else {
                states.first().copied().unwrap_or(JobState::JobComplete)
            }
        }

        pub fn call_log(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobApi for FakeJobApi {
        async fn create_ingest_job(&self, request: &CreateJobRequest) -> Result<JobInfo, Error> {
            self.log(format!("create:{}:{}", request.object, request.operation));
            Ok(self.job("750fake", JobState::Open))
        }

        async fn upload_ingest_data(&self, job_id: &str, csv: &[u8]) -> Result<(), Error> {
            self.log(format!("upload:{job_id}"));
            if self.fail_upload {
                return Err(Error::TransientRemote {
                    message: "upload interrupted".to_string(),
                });
            }
            *self.uploaded.lock().unwrap() = csv.to_vec();
            Ok(())
        }

        async fn set_ingest_state(&self, job_id: &str, state: JobState) -> Result<JobInfo, Error> {
            self.log(format!("set_state:{job_id}:{state}"));
            Ok(self.job(job_id, state))
        }

        async fn get_ingest_job(&self, job_id: &str) -> Result<JobInfo, Error> {
            self.log(format!("get:{job_id}"));
            Ok(self.job(job_id, self.next_state()))
        }

        async fn get_ingest_results(
            &self,
            job_id: &str,
            set: ResultSet,
        ) -> Result<Vec<u8>, Error> {
            self.log(format!("results:{job_id}:{}", set.path()));
            let csv = match set {
                ResultSet::Successful => self.successful_csv.lock().unwrap().clone(),
                ResultSet::Failed => self.failed_csv.lock().unwrap().clone(),
                ResultSet::Unprocessed => self.unprocessed_csv.lock().unwrap().clone(),
            };
            Ok(csv)
        }

        async fn create_query_job(
            &self,
            request: &CreateQueryJobRequest,
        ) -> Result<JobInfo, Error> {
            self.log(format!("create_query:{}", request.operation));
            Ok(self.job("750query", JobState::UploadComplete))
        }

        async fn set_query_state(&self, job_id: &str, state: JobState) -> Result<JobInfo, Error> {
            self.log(format!("set_query_state:{job_id}:{state}"));
            Ok(self.job(job_id, state))
        }

        async fn get_query_job(&self, job_id: &str) -> Result<JobInfo, Error> {
            self.log(format!("get_query:{job_id}"));
            Ok(self.job(job_id, self.next_state()))
        }

        async fn get_query_results(&self, job_id: &str) -> Result<Vec<u8>, Error> {
            self.log(format!("query_results:{job_id}"));
            Ok(self.query_csv.lock().unwrap().clone())
        }
    }

    fn record(name: &str) -> Record {
        [("Name".to_string(), json!(name))].into_iter().collect()
    }

    #[tokio::test]
    async fn test_submit_runs_create_upload_close_in_order() {
        let api = Arc::new(FakeJobApi::default());
        let client = IngestClient::new(Arc::clone(&api) as Arc<dyn JobApi>);

        let job = client
            .submit("Account", Operation::Insert, &[record("Acme"), record("Globex")], None)
            .await
            .unwrap();

        assert_eq!(job.job_id, "750fake");
        assert_eq!(job.operation, "insert");
        assert_eq!(job.state, JobState::UploadComplete);
        assert_eq!(
            api.call_log(),
            vec![
                "create:Account:insert",
                "upload:750fake",
                "set_state:750fake:UploadComplete",
            ]
        );

        let uploaded = String::from_utf8(api.uploaded.lock().unwrap().clone()).unwrap();
        assert!(uploaded.starts_with("Name\n"));
        assert!(uploaded.contains("Acme"));
        assert!(uploaded.contains("Globex"));
    }

    #[tokio::test]
    async fn test_upload_payload_writes_nulls_as_na_token() {
        let api = Arc::new(FakeJobApi::default());
        let client = IngestClient::new(Arc::clone(&api) as Arc<dyn JobApi>);

        let mut rec = record("Acme");
        rec.insert("Phone", serde_json::Value::Null);
        client
            .submit("Account", Operation::Update, &[rec], None)
            .await
            .unwrap();

        let uploaded = String::from_utf8(api.uploaded.lock().unwrap().clone()).unwrap();
        assert!(uploaded.contains("Acme,#N/A"));
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_record_set_without_calls() {
        let api = Arc::new(FakeJobApi::default());
        let client = IngestClient::new(Arc::clone(&api) as Arc<dyn JobApi>);

        let err = client
            .submit("Account", Operation::Insert, &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Submission { .. }));
        assert!(api.call_log().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_upsert_without_external_id_field() {
        let api = Arc::new(FakeJobApi::default());
        let client = IngestClient::new(Arc::clone(&api) as Arc<dyn JobApi>);

        let err = client
            .submit("Account", Operation::Upsert, &[record("Acme")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Submission { .. }));
        assert!(api.call_log().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_aborts_the_job() {
        let api = Arc::new(FakeJobApi {
            fail_upload: true,
            ..FakeJobApi::default()
        });
        let client = IngestClient::new(Arc::clone(&api) as Arc<dyn JobApi>);

        let err = client
            .submit("Account", Operation::Insert, &[record("Acme")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransientRemote { .. }));
        assert_eq!(
            api.call_log(),
            vec![
                "create:Account:insert",
                "upload:750fake",
                "set_state:750fake:Aborted",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_polls_until_terminal() {
        let api = Arc::new(FakeJobApi::with_states(vec![
            JobState::UploadComplete,
            JobState::InProgress,
            JobState::InProgress,
            JobState::JobComplete,
        ]));
        let client = IngestClient::new(Arc::clone(&api) as Arc<dyn JobApi>);

        let cancel = CancellationToken::new();
        let state = client.wait("750fake", &cancel).await.unwrap();
        assert_eq!(state, JobState::JobComplete);
        let polls = api.call_log().iter().filter(|c| c.starts_with("get:")).count();
        assert_eq!(polls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_honors_cancellation() {
        let api = Arc::new(FakeJobApi::with_states(vec![JobState::InProgress]));
        let client = IngestClient::new(Arc::clone(&api) as Arc<dyn JobApi>);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client.wait("750fake", &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_fetch_results_splits_the_three_sets() {
        let api = Arc::new(FakeJobApi::with_states(vec![JobState::JobComplete]));
        *api.successful_csv.lock().unwrap() =
            b"sf__Id,sf__Created,Name\n001new,true,Acme\n".to_vec();
        *api.failed_csv.lock().unwrap() =
            b"sf__Id,sf__Error,Name\n,REQUIRED_FIELD_MISSING:Required fields are missing,NoPhone\n"
                .to_vec();
        *api.unprocessed_csv.lock().unwrap() = b"Name\nNeverRan\n".to_vec();
        let client = IngestClient::new(Arc::clone(&api) as Arc<dyn JobApi>);

        let results = client.fetch_results("750fake").await.unwrap();
        assert_eq!(results.succeeded.len(), 1);
        assert_eq!(results.succeeded[0].id(), Some("001new"));
        assert!(results.succeeded[0].get("sf__Created").is_none());

        assert_eq!(results.failed.len(), 1);
        let (failed_record, error) = &results.failed[0];
        assert_eq!(failed_record.field_str("Name"), Some("NoPhone"));
        assert!(error.contains("REQUIRED_FIELD_MISSING"));

        assert_eq!(results.unprocessed.len(), 1);
        assert_eq!(results.unprocessed[0].field_str("Name"), Some("NeverRan"));
    }

    #[tokio::test]
    async fn test_fetch_results_on_failed_job_carries_the_service_message() {
        let api = Arc::new(FakeJobApi::with_states(vec![JobState::Failed]));
        *api.error_message.lock().unwrap() =
            Some("InvalidBatch : Field name not found : Nmae".to_string());
        let client = IngestClient::new(Arc::clone(&api) as Arc<dyn JobApi>);

        let err = client.fetch_results("750fake").await.unwrap_err();
        match err {
            Error::JobFailed { state, message, .. } => {
                assert_eq!(state, "Failed");
                assert!(message.contains("Field name not found"));
            }
            other => panic!("expected JobFailed error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_partial_results_for_failed_job_are_best_effort() {
        let api = Arc::new(FakeJobApi::with_states(vec![JobState::Failed]));
        *api.error_message.lock().unwrap() = Some("job hit an internal error".to_string());
        *api.successful_csv.lock().unwrap() =
            b"sf__Id,sf__Created,Name\n001a,true,Acme\n".to_vec();
        let client = IngestClient::new(Arc::clone(&api) as Arc<dyn JobApi>);

        let (results, message) = client.partial_results("750fake").await;
        assert_eq!(results.succeeded.len(), 1);
        assert_eq!(results.succeeded[0].id(), Some("001a"));
        assert!(results.failed.is_empty());
        assert!(results.unprocessed.is_empty());
        assert_eq!(message.as_deref(), Some("job hit an internal error"));
    }

    #[tokio::test]
    async fn test_fetch_results_rejects_unfinished_job() {
        let api = Arc::new(FakeJobApi::with_states(vec![JobState::InProgress]));
        let client = IngestClient::new(Arc::clone(&api) as Arc<dyn JobApi>);

        let err = client.fetch_results("750fake").await.unwrap_err();
        assert!(matches!(err, Error::JobFailed { .. }));
    }

    #[tokio::test]
    async fn test_abort() {
        let api = Arc::new(FakeJobApi::default());
        let client = IngestClient::new(Arc::clone(&api) as Arc<dyn JobApi>);

        let state = client.abort("750fake").await.unwrap();
        assert_eq!(state, JobState::Aborted);
    }
}
