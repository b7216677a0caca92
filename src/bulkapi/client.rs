//! HTTP implementation of the bulk job endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{CreateJobRequest, CreateQueryJobRequest, JobApi, JobInfo, JobState, ResultSet};
use crate::client::{Client, Credential};
use crate::error::Error;
use crate::rest::map_remote_error;
use crate::{DEFAULT_API_VERSION, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS};

/// [`JobApi`] over `/jobs/ingest` and `/jobs/query`.
pub struct HttpJobApi {
    auth: Arc<Client>,
    http: reqwest::Client,
    api_version: String,
}

impl HttpJobApi {
    /// Creates a job API client at the default API version.
    pub fn new(auth: Arc<Client>) -> Result<Self, Error> {
        Self::with_api_version(auth, DEFAULT_API_VERSION)
    }

    /// Creates a job API client pinned to a specific API version.
    pub fn with_api_version(auth: Arc<Client>, api_version: &str) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            // Uploads can be large; give them the long timeout.
            .timeout(std::time::Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            auth,
            http,
            api_version: api_version.to_string(),
        })
    }

    /// Resolves the session and the versioned base URL in one step.
    async fn base(&self) -> Result<(Credential, String), Error> {
        let credential = self.auth.credential().await?;
        let base = format!(
            "{}/services/data/v{}",
            credential.instance_url, self.api_version
        );
        Ok((credential, base))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        let response = request.send().await.map_err(|e| Error::TransientRemote {
            message: format!("request failed: {e}"),
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 401 {
            self.auth.invalidate().await;
        }
        Err(map_remote_error(status.as_u16(), &body))
    }

    async fn parse_job(&self, response: reqwest::Response) -> Result<JobInfo, Error> {
        response.json().await.map_err(|e| Error::TransientRemote {
            message: format!("malformed job response: {e}"),
        })
    }

    /// Job creation rejections are shape errors, not per-record failures.
    fn as_submission_error(error: Error) -> Error {
        match error {
            Error::Remote { message, .. } => Error::Submission { message },
            other => other,
        }
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn create_ingest_job(&self, request: &CreateJobRequest) -> Result<JobInfo, Error> {
        let (credential, base) = self.base().await?;
        debug!(object = %request.object, operation = %request.operation, "creating ingest job");
        let response = self
            .send(
                self.http
                    .post(format!("{base}/jobs/ingest"))
                    .bearer_auth(&credential.access_token)
                    .json(request),
            )
            .await
            .map_err(Self::as_submission_error)?;
        self.parse_job(response).await
    }

    async fn upload_ingest_data(&self, job_id: &str, csv: &[u8]) -> Result<(), Error> {
        let (credential, base) = self.base().await?;
        debug!(%job_id, bytes = csv.len(), "uploading ingest data");
        self.send(
            self.http
                .put(format!("{base}/jobs/ingest/{job_id}/batches"))
                .bearer_auth(&credential.access_token)
                .header(reqwest::header::CONTENT_TYPE, "text/csv")
                .body(csv.to_vec()),
        )
        .await?;
        Ok(())
    }

    async fn set_ingest_state(&self, job_id: &str, state: JobState) -> Result<JobInfo, Error> {
        let (credential, base) = self.base().await?;
        debug!(%job_id, %state, "setting ingest job state");
        let response = self
            .send(
                self.http
                    .patch(format!("{base}/jobs/ingest/{job_id}"))
                    .bearer_auth(&credential.access_token)
                    .json(&json!({ "state": state.as_str() })),
            )
            .await?;
        self.parse_job(response).await
    }

    async fn get_ingest_job(&self, job_id: &str) -> Result<JobInfo, Error> {
        let (credential, base) = self.base().await?;
        let response = self
            .send(
                self.http
                    .get(format!("{base}/jobs/ingest/{job_id}"))
                    .bearer_auth(&credential.access_token),
            )
            .await?;
        self.parse_job(response).await
    }

    async fn get_ingest_results(&self, job_id: &str, set: ResultSet) -> Result<Vec<u8>, Error> {
        let (credential, base) = self.base().await?;
        let response = self
            .send(
                self.http
                    .get(format!("{base}/jobs/ingest/{job_id}/{}", set.path()))
                    .bearer_auth(&credential.access_token)
                    .header(reqwest::header::ACCEPT, "text/csv"),
            )
            .await?;
        let bytes = response.bytes().await.map_err(|e| Error::TransientRemote {
            message: format!("failed to read result set: {e}"),
        })?;
        Ok(bytes.to_vec())
    }

    async fn create_query_job(&self, request: &CreateQueryJobRequest) -> Result<JobInfo, Error> {
        let (credential, base) = self.base().await?;
        debug!(operation = %request.operation, "creating query job");
        let response = self
            .send(
                self.http
                    .post(format!("{base}/jobs/query"))
                    .bearer_auth(&credential.access_token)
                    .json(request),
            )
            .await
            .map_err(Self::as_submission_error)?;
        self.parse_job(response).await
    }

    async fn set_query_state(&self, job_id: &str, state: JobState) -> Result<JobInfo, Error> {
        let (credential, base) = self.base().await?;
        debug!(%job_id, %state, "setting query job state");
        let response = self
            .send(
                self.http
                    .patch(format!("{base}/jobs/query/{job_id}"))
                    .bearer_auth(&credential.access_token)
                    .json(&json!({ "state": state.as_str() })),
            )
            .await?;
        self.parse_job(response).await
    }

    async fn get_query_job(&self, job_id: &str) -> Result<JobInfo, Error> {
        let (credential, base) = self.base().await?;
        let response = self
            .send(
                self.http
                    .get(format!("{base}/jobs/query/{job_id}"))
                    .bearer_auth(&credential.access_token),
            )
            .await?;
        self.parse_job(response).await
    }

    async fn get_query_results(&self, job_id: &str) -> Result<Vec<u8>, Error> {
        let (credential, base) = self.base().await?;
        let response = self
            .send(
                self.http
                    .get(format!("{base}/jobs/query/{job_id}/results"))
                    .bearer_auth(&credential.access_token)
                    .header(reqwest::header::ACCEPT, "text/csv"),
            )
            .await?;
        let bytes = response.bytes().await.map_err(|e| Error::TransientRemote {
            message: format!("failed to read query results: {e}"),
        })?;
        Ok(bytes.to_vec())
    }
}
