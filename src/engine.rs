//! The run surface tying sources, batching, execution, and tracking together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{self, ExecutionPath};
use crate::bulkapi::ingest::IngestClient;
use crate::bulkapi::query::QueryClient;
use crate::bulkapi::{HttpJobApi, JobApi, JobDescriptor, JobState, QueryOperation};
use crate::client;
use crate::codec::{self, Format};
use crate::error::Error;
use crate::executor::RetryExecutor;
use crate::record::{clean_record, Record, DEFAULT_INTEGER_FIELDS};
use crate::rest::{Operation, RecordApi, RestClient};
use crate::source::RecordSource;
use crate::tracker::{OperationResult, OutcomeTracker, RecentHistory, RunReport};
use crate::{
    DEFAULT_API_VERSION, DEFAULT_BATCH_SIZE, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_RECENT_RECORDS,
    DEFAULT_MAX_WORKERS, DEFAULT_RETRY_DELAY_SECS,
};

/// Engine-wide settings. The defaults mirror the service's own limits.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Records per synchronous batch.
    pub batch_size: usize,
    /// Total attempts per record before giving up.
    pub max_attempts: u32,
    /// Base retry delay; attempt `n` waits `n` times this.
    pub retry_delay: Duration,
    /// Bound on concurrent per-record calls within one batch.
    pub max_workers: usize,
    /// Capacity of the shared recently-processed buffer.
    pub history_capacity: usize,
    /// Fields cleaned as integers.
    pub integer_fields: Vec<String>,
    /// API version for all endpoints.
    pub api_version: String,
    /// Where failed-record dumps and retrieve output land; `None` disables
    /// writing files.
    pub output_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            max_workers: DEFAULT_MAX_WORKERS,
            history_capacity: DEFAULT_MAX_RECENT_RECORDS,
            integer_fields: DEFAULT_INTEGER_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            api_version: DEFAULT_API_VERSION.to_string(),
            output_dir: None,
        }
    }
}

/// One synchronization run.
#[derive(Debug)]
pub struct SyncRequest {
    pub object: String,
    pub operation: Operation,
    pub source: RecordSource,
    /// Field addressing existing rows for upsert.
    pub external_id_field: Option<String>,
    /// Route the whole sequence through one Bulk API v2 job instead of
    /// per-record calls.
    pub use_bulk_api: bool,
    /// Overrides the configured batch size for this run.
    pub batch_size: Option<usize>,
}

/// What a run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    /// Set on the bulk path; pass to [`SyncEngine::complete_bulk`] to wait
    /// for the job and collect per-record outcomes.
    pub job_id: Option<String>,
    /// Where the failed-record dump was written, when configured and there
    /// were failures.
    pub failed_records_path: Option<PathBuf>,
}

/// What a retrieve produced.
#[derive(Debug)]
pub struct RetrieveOutcome {
    pub records: Vec<Record>,
    pub report: RunReport,
    pub output_path: Option<PathBuf>,
}

/// Batch synchronization engine.
///
/// Owns the API handles, the shared recent history, and the configuration;
/// one engine serves many runs.
pub struct SyncEngine {
    records: Arc<dyn RecordApi>,
    ingest: IngestClient,
    query: QueryClient,
    history: Arc<RecentHistory>,
    config: SyncConfig,
}

impl SyncEngine {
    /// Creates an engine over live HTTP clients sharing one credential
    /// manager.
    pub fn new(auth: client::Client, config: SyncConfig) -> Result<Self, Error> {
        let auth = Arc::new(auth);
        let records: Arc<dyn RecordApi> = Arc::new(RestClient::with_api_version(
            Arc::clone(&auth),
            &config.api_version,
        )?);
        let jobs: Arc<dyn JobApi> =
            Arc::new(HttpJobApi::with_api_version(auth, &config.api_version)?);
        Ok(Self::with_apis(records, jobs, config))
    }

    /// Creates an engine over caller-supplied API handles.
    pub fn with_apis(
        records: Arc<dyn RecordApi>,
        jobs: Arc<dyn JobApi>,
        config: SyncConfig,
    ) -> Self {
        Self {
            records,
            ingest: IngestClient::new(Arc::clone(&jobs)),
            query: QueryClient::new(jobs),
            history: Arc::new(RecentHistory::new(config.history_capacity)),
            config,
        }
    }

    /// The recently-processed buffer shared by all runs of this engine.
    pub fn history(&self) -> &Arc<RecentHistory> {
        &self.history
    }

    /// Runs one synchronization: load, clean, then apply the records over
    /// the requested path.
    ///
    /// On the sync path the returned report covers every record. On the
    /// bulk path the job is submitted and the report stays empty until
    /// [`complete_bulk`](Self::complete_bulk) collects the outcomes.
    pub async fn run(&self, request: SyncRequest) -> Result<RunOutcome, Error> {
        let raw = request.source.clone().load()?;
        let integer_fields: Vec<&str> = self
            .config
            .integer_fields
            .iter()
            .map(String::as_str)
            .collect();
        let cleaned: Vec<Record> = raw
            .iter()
            .map(|r| clean_record(r, &integer_fields))
            .collect();
        info!(
            object = %request.object,
            operation = %request.operation,
            records = cleaned.len(),
            "starting run"
        );

        match ExecutionPath::select(request.use_bulk_api) {
            ExecutionPath::Bulk => {
                let job = self
                    .ingest
                    .submit(
                        &request.object,
                        request.operation,
                        &cleaned,
                        request.external_id_field.as_deref(),
                    )
                    .await?;
                let tracker = OutcomeTracker::new(Arc::clone(&self.history));
                Ok(RunOutcome {
                    report: tracker.report(),
                    job_id: Some(job.job_id),
                    failed_records_path: None,
                })
            }
            ExecutionPath::Sync => {
                let report = self.run_sync(&request, &cleaned).await?;
                let failed_records_path = self.dump_failed(&report)?;
                Ok(RunOutcome {
                    report,
                    job_id: None,
                    failed_records_path,
                })
            }
        }
    }

    /// Sequential batches; inside each batch, records are dispatched
    /// concurrently up to the worker bound. A fatal error raises the shared
    /// halt flag: in-flight calls drain, nothing new is dispatched, and
    /// every undispatched record is reported failed without being attempted.
    async fn run_sync(
        &self,
        request: &SyncRequest,
        records: &[Record],
    ) -> Result<RunReport, Error> {
        let batch_size = request.batch_size.unwrap_or(self.config.batch_size);
        let batches = batch::plan(records, batch_size)?;
        let executor = RetryExecutor::new(self.config.max_attempts, self.config.retry_delay);
        let tracker = OutcomeTracker::new(Arc::clone(&self.history));
        let tag = request.operation.as_str();

        let mut not_attempted: Vec<&Record> = Vec::new();
        for (batch_index, batch) in batches.iter().enumerate() {
            if executor.is_halted() {
                not_attempted.extend(batch.iter());
                continue;
            }
            debug!(batch_index, batch_len = batch.len(), "processing batch");

            let mut join_set: JoinSet<(usize, OperationResult)> = JoinSet::new();
            let mut results: Vec<(usize, OperationResult)> = Vec::with_capacity(batch.len());
            let mut dispatched = 0usize;
            loop {
                while dispatched < batch.len()
                    && !executor.is_halted()
                    && join_set.len() < self.config.max_workers.max(1)
                {
                    let record = batch[dispatched].clone();
                    let index = dispatched;
                    let api = Arc::clone(&self.records);
                    let executor = executor.clone();
                    let object = request.object.clone();
                    let operation = request.operation;
                    let external_id_field = request.external_id_field.clone();
                    join_set.spawn(async move {
                        let result = executor
                            .execute(
                                api.as_ref(),
                                &object,
                                operation,
                                &record,
                                external_id_field.as_deref(),
                            )
                            .await;
                        (index, result)
                    });
                    dispatched += 1;
                }
                match join_set.join_next().await {
                    Some(Ok(indexed)) => results.push(indexed),
                    Some(Err(join_error)) => warn!(%join_error, "record task aborted"),
                    None => break,
                }
            }
            if executor.is_halted() {
                not_attempted.extend(batch[dispatched..].iter());
            }

            // Completion order is arbitrary under concurrency; report in
            // submission order.
            results.sort_by_key(|(index, _)| *index);
            for (_, result) in &results {
                tracker.record(tag, result);
            }
        }

        if executor.is_halted() {
            warn!(
                skipped = not_attempted.len(),
                "run halted, remaining records not attempted"
            );
            tracker.record_not_attempted(
                not_attempted,
                "run halted before this record was attempted",
            );
            tracker.mark_halted();
        }

        Ok(tracker.report())
    }

    /// Waits for a submitted bulk job, fetches its result sets, and turns
    /// them into a run report. `operation` is the history tag, matching the
    /// operation the job was submitted with.
    ///
    /// A job that ended `Failed` or `Aborted` still yields a report:
    /// whatever partial result sets the service exposes (empty when none),
    /// with the report marked halted and the job's error carried on every
    /// unprocessed record.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] when the token fires while waiting.
    pub async fn complete_bulk(
        &self,
        job_id: &str,
        operation: Operation,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, Error> {
        let state = self.ingest.wait(job_id, cancel).await?;
        debug!(%job_id, %state, "bulk job finished");

        let (results, halt_message) = match state {
            JobState::JobComplete => (self.ingest.fetch_results(job_id).await?, None),
            state => {
                let (results, error_message) = self.ingest.partial_results(job_id).await;
                let message = format!(
                    "bulk job ended in state {state}: {}",
                    error_message.unwrap_or_else(|| "no error detail reported".to_string())
                );
                warn!(%job_id, %message, "bulk job did not complete");
                (results, Some(message))
            }
        };

        let tracker = OutcomeTracker::new(Arc::clone(&self.history));
        let tag = operation.as_str();
        for record in results.succeeded {
            let remote_id = record.id().map(str::to_string);
            tracker.record(tag, &OperationResult::success(record, remote_id));
        }
        for (record, error) in results.failed {
            tracker.record(tag, &OperationResult::failure(record, error));
        }
        let skipped = halt_message
            .as_deref()
            .unwrap_or("not processed by the bulk job");
        tracker.record_not_attempted(results.unprocessed.iter(), skipped);
        if halt_message.is_some() {
            tracker.mark_halted();
        }

        let report = tracker.report();
        let failed_records_path = self.dump_failed(&report)?;
        Ok(RunOutcome {
            report,
            job_id: Some(job_id.to_string()),
            failed_records_path,
        })
    }

    /// Retrieves records via a SOQL query over the REST path. Retrieved
    /// records are appended to history tagged `retrieve`, and written to a
    /// file when an output directory and format are configured.
    pub async fn retrieve(
        &self,
        object: &str,
        fields: &[&str],
        output_format: Option<Format>,
    ) -> Result<RetrieveOutcome, Error> {
        if fields.is_empty() {
            return Err(Error::Config(
                "retrieve requires at least one field".to_string(),
            ));
        }
        let soql = format!("SELECT {} FROM {}", fields.join(", "), object);
        let records = self.records.query(&soql).await?;
        self.finish_retrieve(records, output_format)
    }

    /// Retrieves records via a Bulk API v2 query job. `QueryAll` includes
    /// deleted and archived rows.
    pub async fn bulk_retrieve(
        &self,
        soql: &str,
        operation: QueryOperation,
        output_format: Option<Format>,
        cancel: &CancellationToken,
    ) -> Result<RetrieveOutcome, Error> {
        let job: JobDescriptor = self.query.submit(soql, operation).await?;
        self.query.wait(&job.job_id, cancel).await?;
        let records = self.query.fetch_results(&job.job_id).await?;
        self.finish_retrieve(records, output_format)
    }

    fn finish_retrieve(
        &self,
        records: Vec<Record>,
        output_format: Option<Format>,
    ) -> Result<RetrieveOutcome, Error> {
        let tracker = OutcomeTracker::new(Arc::clone(&self.history));
        for record in &records {
            let remote_id = record.id().map(str::to_string);
            tracker.record(
                "retrieve",
                &OperationResult::success(record.clone(), remote_id),
            );
        }

        let output_path = match (&self.config.output_dir, output_format) {
            (Some(dir), Some(format)) => {
                std::fs::create_dir_all(dir)?;
                let path = dir.join(format!(
                    "retrieved_{}.{}",
                    Utc::now().format("%Y%m%d_%H%M%S"),
                    format.extension()
                ));
                std::fs::write(&path, codec::encode(&records, format)?)?;
                info!(path = %path.display(), records = records.len(), "wrote retrieve output");
                Some(path)
            }
            _ => None,
        };

        Ok(RetrieveOutcome {
            records,
            report: tracker.report(),
            output_path,
        })
    }

    /// Writes the failed records of a report to a timestamped JSON file
    /// under the configured output directory, if any.
    fn dump_failed(&self, report: &RunReport) -> Result<Option<PathBuf>, Error> {
        let Some(dir) = &self.config.output_dir else {
            return Ok(None);
        };
        if report.failed_records.is_empty() {
            return Ok(None);
        }
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "failed_records_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        let data = serde_json::to_vec_pretty(&report.failed_records)
            .map_err(|e| Error::Codec(e.to_string()))?;
        std::fs::write(&path, data)?;
        info!(path = %path.display(), failed = report.failed, "wrote failed-record dump");
        Ok(Some(path))
    }
}
