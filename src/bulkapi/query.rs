//! Query job orchestration: submit a SOQL query, wait, fetch the rows.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    wait_for_terminal, CreateQueryJobRequest, JobApi, JobDescriptor, JobState, QueryOperation,
};
use crate::codec::{self, Format};
use crate::error::Error;
use crate::record::Record;

/// Drives the query job lifecycle over a [`JobApi`].
#[derive(Clone)]
pub struct QueryClient {
    api: Arc<dyn JobApi>,
}

impl QueryClient {
    pub fn new(api: Arc<dyn JobApi>) -> Self {
        Self { api }
    }

    /// Submits a query job. Query jobs need no upload; the service starts
    /// processing on creation.
    pub async fn submit(
        &self,
        soql: &str,
        operation: QueryOperation,
    ) -> Result<JobDescriptor, Error> {
        if soql.trim().is_empty() {
            return Err(Error::Submission {
                message: "query must not be empty".to_string(),
            });
        }
        let job = self
            .api
            .create_query_job(&CreateQueryJobRequest {
                operation: operation.as_str().to_string(),
                query: soql.to_string(),
            })
            .await?;
        info!(job_id = %job.id, operation = operation.as_str(), "created query job");
        Ok(JobDescriptor {
            job_id: job.id,
            object: job.object.unwrap_or_default(),
            operation: operation.as_str().to_string(),
            state: job.state,
            created_at: chrono::Utc::now(),
        })
    }

    /// One non-blocking state check.
    pub async fn poll(&self, job_id: &str) -> Result<JobState, Error> {
        Ok(self.api.get_query_job(job_id).await?.state)
    }

    /// Polls until the job reaches a terminal state; cancel via the token.
    pub async fn wait(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<JobState, Error> {
        wait_for_terminal(|| self.api.get_query_job(job_id), cancel).await
    }

    /// Fetches and decodes the result rows of a completed query job.
    pub async fn fetch_results(&self, job_id: &str) -> Result<Vec<Record>, Error> {
        let job = self.api.get_query_job(job_id).await?;
        if job.state != JobState::JobComplete {
            return Err(Error::JobFailed {
                job_id: job_id.to_string(),
                state: job.state.to_string(),
                message: job
                    .error_message
                    .unwrap_or_else(|| "query job did not complete".to_string()),
            });
        }
        let csv = self.api.get_query_results(job_id).await?;
        codec::decode(&csv, Format::Csv)
    }

    /// Aborts the job.
    pub async fn abort(&self, job_id: &str) -> Result<JobState, Error> {
        let job = self.api.set_query_state(job_id, JobState::Aborted).await?;
        Ok(job.state)
    }
}
