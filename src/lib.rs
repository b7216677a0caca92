//! Batch synchronization engine for the Salesforce REST and Bulk v2 APIs.
//!
//! This crate turns an unordered collection of records into reliably-applied
//! remote mutations. It manages the OAuth password-grant credential
//! lifecycle, partitions records into batches, applies per-record operations
//! with classified retries, orchestrates asynchronous Bulk API v2 jobs, and
//! tracks per-record outcomes into a [`RunReport`](tracker::RunReport).
//!
//! # Example
//!
//! ```no_run
//! use sforce_sync::client::{self, Credentials};
//! use sforce_sync::engine::{SyncConfig, SyncEngine, SyncRequest};
//! use sforce_sync::rest::Operation;
//! use sforce_sync::source::RecordSource;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let auth = client::Builder::new()
//!     .credentials(Credentials {
//!         client_id: "...".to_string(),
//!         client_secret: "...".to_string(),
//!         username: "user@example.com".to_string(),
//!         password: "...".to_string(),
//!         token_url: "https://login.salesforce.com/services/oauth2/token".to_string(),
//!     })
//!     .build()?;
//!
//! let engine = SyncEngine::new(auth, SyncConfig::default())?;
//! let outcome = engine
//!     .run(SyncRequest {
//!         object: "Account".to_string(),
//!         operation: Operation::Insert,
//!         source: RecordSource::Path("accounts.csv".into()),
//!         external_id_field: None,
//!         use_bulk_api: false,
//!         batch_size: None,
//!     })
//!     .await?;
//!
//! println!("{} of {} records applied", outcome.report.succeeded, outcome.report.total);
//! # Ok(())
//! # }
//! ```

/// Default Salesforce API version.
pub const DEFAULT_API_VERSION: &str = "62.0";

/// Default number of records per synchronous batch.
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Default total attempts per record before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay between retry attempts; attempt `n` waits `n` times this.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Default capacity of the recently-processed record buffer.
pub const DEFAULT_MAX_RECENT_RECORDS: usize = 50;

/// Default bound on concurrent per-record calls within one batch.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Buffer time (in seconds) before token expiry to trigger refresh.
/// Refresh tokens 5 minutes before they expire to avoid mid-run expiry.
pub const TOKEN_REFRESH_BUFFER_SECONDS: u64 = 300;

/// Default connection timeout for HTTP requests (30 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default request timeout for HTTP requests (120 seconds).
///
/// This longer timeout is appropriate for bulk uploads which may take longer
/// to transfer.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Initial interval between bulk job status polls (2 seconds).
pub const POLL_INITIAL_INTERVAL_SECS: u64 = 2;

/// Each poll waits this much longer than the previous one (2 seconds).
pub const POLL_INTERVAL_STEP_SECS: u64 = 2;

/// Ceiling on the interval between bulk job status polls (30 seconds).
pub const POLL_MAX_INTERVAL_SECS: u64 = 30;

/// OAuth password-grant credential acquisition, caching, and refresh.
pub mod client;

/// Error taxonomy and retry classification.
pub mod error;

/// Dynamic field-map records and record cleaning.
pub mod record;

/// Decode and encode record sequences as CSV, JSON, or XML.
pub mod codec;

/// Normalizes file-based or payload-based input into record sequences.
pub mod source;

/// Partitions record sequences into batches and selects the execution path.
pub mod batch;

/// Synchronous per-record REST operations against sObject endpoints.
pub mod rest;

/// Bounded retries with classified backoff for single-record operations.
pub mod executor;

/// Asynchronous Bulk API v2 ingest and query job orchestration.
pub mod bulkapi;

/// Aggregates per-record outcomes into run reports and recent history.
pub mod tracker;

/// The run surface tying sources, batching, execution, and tracking together.
pub mod engine;

pub use error::Error;
pub use record::Record;
