//! Synchronous per-record REST operations against sObject endpoints.
//!
//! [`RecordApi`] is the seam the retry executor and engine call through;
//! [`RestClient`] is the HTTP implementation. Service rejections are mapped
//! onto the crate error taxonomy here, which is where the run-halting and
//! no-retry error codes are recognized.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::{Client, Credential};
use crate::error::Error;
use crate::record::Record;
use crate::{DEFAULT_API_VERSION, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS};

/// Error code the service reports when org storage is exhausted.
const STORAGE_LIMIT_EXCEEDED: &str = "STORAGE_LIMIT_EXCEEDED";

/// Error code the service reports when the target record was deleted.
const ENTITY_IS_DELETED: &str = "ENTITY_IS_DELETED";

/// Per-record mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Upsert,
}

impl Operation {
    /// Wire and history tag for the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Upsert => "upsert",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful mutation.
#[derive(Debug, Clone, Default)]
pub struct SaveResult {
    /// Identifier of the affected record, when the service returns one.
    pub id: Option<String>,
    /// True when the mutation created a new record (insert, or upsert that
    /// did not match an existing row).
    pub created: bool,
}

/// Remote per-record operations.
///
/// The executor and engine depend on this trait rather than on
/// [`RestClient`] directly, so tests substitute in-memory fakes.
#[async_trait]
pub trait RecordApi: Send + Sync {
    /// Creates a record, returning its new identifier.
    async fn create(&self, object: &str, record: &Record) -> Result<SaveResult, Error>;

    /// Updates the record with the given identifier.
    async fn update(&self, object: &str, id: &str, record: &Record) -> Result<(), Error>;

    /// Deletes the record with the given identifier.
    async fn delete(&self, object: &str, id: &str) -> Result<(), Error>;

    /// Retrieves one record by identifier, optionally restricted to the
    /// given fields. An empty field list fetches every field.
    async fn get(&self, object: &str, id: &str, fields: &[&str]) -> Result<Record, Error>;

    /// Fetches the object's metadata description.
    async fn describe(&self, object: &str) -> Result<Value, Error>;

    /// Creates or updates a record addressed by an external-id field value.
    async fn upsert(
        &self,
        object: &str,
        external_id_field: &str,
        external_id: &str,
        record: &Record,
    ) -> Result<SaveResult, Error>;

    /// Runs a SOQL query, following pagination to completion.
    async fn query(&self, soql: &str) -> Result<Vec<Record>, Error>;
}

/// One error entry from the service's JSON error array.
#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    message: Option<String>,
}

/// Wire shape of a create/upsert response.
#[derive(Debug, Deserialize)]
struct SaveResponse {
    id: Option<String>,
    created: Option<bool>,
}

/// Wire shape of a query response page.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    done: bool,
    #[serde(rename = "nextRecordsUrl")]
    next_records_url: Option<String>,
    records: Vec<Record>,
}

/// Maps a non-success response onto the error taxonomy.
///
/// The body is the service's JSON error array when parseable; otherwise the
/// raw text is carried through. Messages are retained verbatim so reports
/// show what the service actually said.
pub(crate) fn map_remote_error(status: u16, body: &str) -> Error {
    let (code, message) = match serde_json::from_str::<Vec<RemoteErrorBody>>(body) {
        Ok(mut entries) if !entries.is_empty() => {
            let entry = entries.remove(0);
            let message = entry
                .message
                .unwrap_or_else(|| format!("request failed with status {status}"));
            (entry.error_code, message)
        }
        _ => (None, format!("request failed with status {status}: {body}")),
    };

    match code.as_deref() {
        Some(STORAGE_LIMIT_EXCEEDED) => Error::QuotaExceeded { message },
        Some(ENTITY_IS_DELETED) => Error::EntityGone { message },
        _ if status == 401 => Error::Auth { message },
        _ if status >= 500 => Error::TransientRemote { message },
        _ => Error::Remote { code, message },
    }
}

/// HTTP implementation of [`RecordApi`].
pub struct RestClient {
    auth: Arc<Client>,
    http: reqwest::Client,
    api_version: String,
}

impl RestClient {
    /// Creates a REST client over the given credential manager at the
    /// default API version.
    pub fn new(auth: Arc<Client>) -> Result<Self, Error> {
        Self::with_api_version(auth, DEFAULT_API_VERSION)
    }

    /// Creates a REST client pinned to a specific API version, e.g. `"62.0"`.
    pub fn with_api_version(auth: Arc<Client>, api_version: &str) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .timeout(std::time::Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            auth,
            http,
            api_version: api_version.to_string(),
        })
    }

    async fn credential(&self) -> Result<Credential, Error> {
        self.auth.credential().await
    }

    fn sobject_url(&self, credential: &Credential, object: &str) -> String {
        format!(
            "{}/services/data/v{}/sobjects/{}",
            credential.instance_url, self.api_version, object
        )
    }

    /// Sends a request, mapping transport failures to [`Error::TransientRemote`]
    /// and non-success statuses through [`map_remote_error`]. A 401 also
    /// drops the cached session so the next call re-authenticates.
    async fn check(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        let response = request.send().await.map_err(|e| Error::TransientRemote {
            message: format!("request failed: {e}"),
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let error = map_remote_error(status.as_u16(), &body);
        if status.as_u16() == 401 {
            warn!("session rejected with 401, dropping cached token");
            self.auth.invalidate().await;
        }
        Err(error)
    }

    async fn parse_save(&self, response: reqwest::Response) -> Result<SaveResult, Error> {
        // An upsert that updated an existing row can answer 204 with no body.
        if response.status().as_u16() == 204 {
            return Ok(SaveResult {
                id: None,
                created: false,
            });
        }
        let save: SaveResponse = response.json().await.map_err(|e| Error::TransientRemote {
            message: format!("malformed save response: {e}"),
        })?;
        Ok(SaveResult {
            id: save.id,
            created: save.created.unwrap_or(false),
        })
    }
}

/// Query responses carry an `attributes` object per record; it is metadata,
/// not a field.
fn strip_attributes(mut record: Record) -> Record {
    record.remove("attributes");
    record
}

/// Comma-joined value for the `fields` query parameter; `None` when the
/// caller asked for every field.
fn field_list(fields: &[&str]) -> Option<String> {
    if fields.is_empty() {
        None
    } else {
        Some(fields.join(","))
    }
}

#[async_trait]
impl RecordApi for RestClient {
    async fn create(&self, object: &str, record: &Record) -> Result<SaveResult, Error> {
        let credential = self.credential().await?;
        let url = self.sobject_url(&credential, object);
        debug!(%object, "creating record");
        let response = self
            .check(
                self.http
                    .post(&url)
                    .bearer_auth(&credential.access_token)
                    .json(&record.without_field("Id")),
            )
            .await?;
        self.parse_save(response).await
    }

    async fn update(&self, object: &str, id: &str, record: &Record) -> Result<(), Error> {
        let credential = self.credential().await?;
        let url = format!("{}/{id}", self.sobject_url(&credential, object));
        debug!(%object, %id, "updating record");
        self.check(
            self.http
                .patch(&url)
                .bearer_auth(&credential.access_token)
                .json(&record.without_field("Id")),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, object: &str, id: &str) -> Result<(), Error> {
        let credential = self.credential().await?;
        let url = format!("{}/{id}", self.sobject_url(&credential, object));
        debug!(%object, %id, "deleting record");
        self.check(
            self.http
                .delete(&url)
                .bearer_auth(&credential.access_token),
        )
        .await?;
        Ok(())
    }

    async fn get(&self, object: &str, id: &str, fields: &[&str]) -> Result<Record, Error> {
        let credential = self.credential().await?;
        let url = format!("{}/{id}", self.sobject_url(&credential, object));
        debug!(%object, %id, "fetching record");
        let mut request = self.http.get(&url).bearer_auth(&credential.access_token);
        if let Some(list) = field_list(fields) {
            request = request.query(&[("fields", list)]);
        }
        let response = self.check(request).await?;
        let record: Record = response.json().await.map_err(|e| Error::TransientRemote {
            message: format!("malformed record response: {e}"),
        })?;
        Ok(strip_attributes(record))
    }

    async fn describe(&self, object: &str) -> Result<Value, Error> {
        let credential = self.credential().await?;
        let url = format!("{}/describe", self.sobject_url(&credential, object));
        debug!(%object, "describing object");
        let response = self.check(self.http.get(&url).bearer_auth(&credential.access_token)).await?;
        response.json().await.map_err(|e| Error::TransientRemote {
            message: format!("malformed describe response: {e}"),
        })
    }

    async fn upsert(
        &self,
        object: &str,
        external_id_field: &str,
        external_id: &str,
        record: &Record,
    ) -> Result<SaveResult, Error> {
        let credential = self.credential().await?;
        let url = format!(
            "{}/{external_id_field}/{external_id}",
            self.sobject_url(&credential, object)
        );
        // The addressing field and Id must not appear in the body.
        let body = record.without_field("Id").without_field(external_id_field);
        debug!(%object, %external_id_field, %external_id, "upserting record");
        let response = self
            .check(
                self.http
                    .patch(&url)
                    .bearer_auth(&credential.access_token)
                    .json(&body),
            )
            .await?;
        self.parse_save(response).await
    }

    async fn query(&self, soql: &str) -> Result<Vec<Record>, Error> {
        let credential = self.credential().await?;
        let url = format!(
            "{}/services/data/v{}/query",
            credential.instance_url, self.api_version
        );
        debug!(%soql, "running query");
        let mut response = self
            .check(
                self.http
                    .get(&url)
                    .bearer_auth(&credential.access_token)
                    .query(&[("q", soql)]),
            )
            .await?;

        let mut records = Vec::new();
        loop {
            let page: QueryResponse =
                response.json().await.map_err(|e| Error::TransientRemote {
                    message: format!("malformed query response: {e}"),
                })?;
            records.extend(page.records.into_iter().map(strip_attributes));
            if page.done {
                break;
            }
            let next = page.next_records_url.ok_or_else(|| Error::TransientRemote {
                message: "query page not done but nextRecordsUrl missing".to_string(),
            })?;
            let next_url = format!("{}{next}", credential.instance_url);
            response = self
                .check(self.http.get(&next_url).bearer_auth(&credential.access_token))
                .await?;
        }
        Ok(records)
    }
}
