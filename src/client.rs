//! OAuth password-grant credential acquisition, caching, and refresh.
//!
//! [`Client`] exchanges a username and password for an access token and the
//! instance URL that scopes all later API calls, then caches the pair until
//! it nears expiry. The check-then-refresh sequence is one critical section,
//! so concurrent callers trigger at most one token exchange.

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Error;
use crate::{DEFAULT_CONNECT_TIMEOUT_SECS, TOKEN_REFRESH_BUFFER_SECONDS};

/// Token validity assumed when the service omits `expires_in` (the service
/// default session timeout is 2 hours).
const DEFAULT_TOKEN_VALIDITY_SECONDS: u64 = 7200;

/// Connected App credentials for the username-password grant.
///
/// Obtained from a Connected App with OAuth enabled. If the org requires a
/// security token, append it to the password.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Credentials {
    /// Consumer Key of the Connected App.
    pub client_id: String,
    /// Consumer Secret of the Connected App.
    pub client_secret: String,
    /// Username to authenticate as (email address).
    pub username: String,
    /// Password (plus security token where required).
    pub password: String,
    /// Token endpoint, e.g. `https://login.salesforce.com/services/oauth2/token`
    /// for production orgs or `https://test.salesforce.com/services/oauth2/token`
    /// for sandboxes.
    pub token_url: String,
}

/// Source for loading credentials.
#[derive(Debug, Clone)]
pub enum CredentialsFrom {
    /// Load credentials from a JSON file.
    Path(PathBuf),
    /// Use credentials provided directly.
    Value(Credentials),
}

/// A live session: bearer token plus the instance URL it is valid against.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Bearer token for the `Authorization` header.
    pub access_token: String,
    /// Base URL of the org instance all API paths hang off.
    pub instance_url: String,
}

/// Cached session with its local expiry estimate.
#[derive(Debug, Clone)]
struct CachedToken {
    credential: Credential,
    /// Unix timestamp (seconds) when the token expires.
    expires_at: u64,
}

impl CachedToken {
    /// True when the token is expired or within the buffer of expiry.
    fn is_expired(&self, buffer_seconds: u64, now: u64) -> bool {
        now.saturating_add(buffer_seconds) >= self.expires_at
    }
}

/// Wire shape of the token endpoint response. Fields are optional so a
/// missing one surfaces as [`Error::Auth`] rather than a parse failure.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    instance_url: Option<String>,
    expires_in: Option<u64>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Credential manager for the username-password grant.
///
/// Construct via [`Builder`]. Cheap to share behind an `Arc`; every API
/// surface in this crate takes one and calls [`credential`](Self::credential)
/// per call group.
#[derive(Debug)]
pub struct Client {
    credentials_from: CredentialsFrom,
    refresh_buffer_secs: u64,
    http: reqwest::Client,
    state: Mutex<Option<CachedToken>>,
}

impl Client {
    /// Returns a valid session, performing the password grant if the cache
    /// is empty or the token is within the refresh buffer of expiry.
    ///
    /// The lock is held across the exchange, so concurrent callers that
    /// arrive while a refresh is in flight wait for it and share its result.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when credentials cannot be loaded or are incomplete;
    /// [`Error::Auth`] when the grant is rejected or the response lacks a
    /// token or instance URL. Authentication failures are never retried.
    pub async fn credential(&self) -> Result<Credential, Error> {
        let mut state = self.state.lock().await;
        if let Some(cached) = state.as_ref() {
            if !cached.is_expired(self.refresh_buffer_secs, unix_now()) {
                return Ok(cached.credential.clone());
            }
            debug!("access token within refresh buffer of expiry, refreshing");
        }

        let cached = self.authenticate().await?;
        let credential = cached.credential.clone();
        *state = Some(cached);
        Ok(credential)
    }

    /// Drops the cached session so the next call re-authenticates.
    ///
    /// Used after the service reports the session invalid (a 401), which
    /// happens when a session is revoked before its local expiry estimate.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        *state = None;
    }

    /// Performs the username-password grant against the token endpoint.
    async fn authenticate(&self) -> Result<CachedToken, Error> {
        let credentials = self.load_credentials()?;
        validate(&credentials)?;

        debug!(token_url = %credentials.token_url, "requesting access token");
        let response = self
            .http
            .post(&credentials.token_url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Auth {
                message: format!("token request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Auth {
                message: format!("token endpoint returned {status}: {body}"),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| Error::Auth {
            message: format!("malformed token response: {e}"),
        })?;

        let access_token = token.access_token.ok_or_else(|| Error::Auth {
            message: "token response missing access_token".to_string(),
        })?;
        let instance_url = token.instance_url.ok_or_else(|| Error::Auth {
            message: "token response missing instance_url".to_string(),
        })?;

        let validity = token.expires_in.unwrap_or(DEFAULT_TOKEN_VALIDITY_SECONDS);
        let expires_at = unix_now().saturating_add(validity);
        debug!(%instance_url, expires_at, "authenticated");

        Ok(CachedToken {
            credential: Credential {
                access_token,
                instance_url,
            },
            expires_at,
        })
    }

    /// Loads credentials from their configured source. Never caches file
    /// contents, so a rotated credentials file takes effect on the next
    /// refresh.
    fn load_credentials(&self) -> Result<Credentials, Error> {
        match &self.credentials_from {
            CredentialsFrom::Value(creds) => Ok(creds.clone()),
            CredentialsFrom::Path(path) => {
                let raw = fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("failed to read credentials file {path:?}: {e}"))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    Error::Config(format!("failed to parse credentials file {path:?}: {e}"))
                })
            }
        }
    }
}

/// All five fields are required for the password grant.
fn validate(credentials: &Credentials) -> Result<(), Error> {
    let required = [
        ("client_id", &credentials.client_id),
        ("client_secret", &credentials.client_secret),
        ("username", &credentials.username),
        ("password", &credentials.password),
        ("token_url", &credentials.token_url),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            return Err(Error::Config(format!("credential field {name} is empty")));
        }
    }
    Ok(())
}

/// Builder for constructing a [`Client`].
#[derive(Default)]
pub struct Builder {
    credentials_from: Option<CredentialsFrom>,
    refresh_buffer_secs: Option<u64>,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets credentials to load from a JSON file with the [`Credentials`]
    /// field names.
    pub fn credentials_path(mut self, path: PathBuf) -> Self {
        self.credentials_from = Some(CredentialsFrom::Path(path));
        self
    }

    /// Sets credentials directly.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials_from = Some(CredentialsFrom::Value(credentials));
        self
    }

    /// Overrides how long before expiry a token is refreshed.
    /// Defaults to [`TOKEN_REFRESH_BUFFER_SECONDS`].
    pub fn refresh_buffer_secs(mut self, seconds: u64) -> Self {
        self.refresh_buffer_secs = Some(seconds);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when no credentials source was provided or the HTTP
    /// client cannot be constructed.
    pub fn build(self) -> Result<Client, Error> {
        let credentials_from = self.credentials_from.ok_or_else(|| {
            Error::Config("credentials or credentials_path is required".to_string())
        })?;
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Client {
            credentials_from,
            refresh_buffer_secs: self
                .refresh_buffer_secs
                .unwrap_or(TOKEN_REFRESH_BUFFER_SECONDS),
            http,
            state: Mutex::new(None),
        })
    }
}
