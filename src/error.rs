//! Error taxonomy and retry classification.
//!
//! Errors fall into two tiers. Run-level errors ([`Error::Auth`],
//! [`Error::Config`], [`Error::QuotaExceeded`], [`Error::Submission`]) abort
//! the remaining work; per-record errors ([`Error::Validation`],
//! [`Error::EntityGone`], [`Error::Remote`]) are recorded as failures and the
//! run continues. [`Error::TransientRemote`] is the only retryable class.

use std::time::Duration;

/// Errors that can occur during a synchronization run.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Credential acquisition failed. Fatal to the run; never retried here.
    #[error("authentication failed: {message}")]
    Auth {
        /// Description of the grant rejection or transport failure.
        message: String,
    },

    /// Invalid configuration, caught before any network call.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A record failed local validation (e.g. missing identity field).
    /// Per-record; no network call is made.
    #[error("{0}")]
    Validation(String),

    /// Network or server-side 5xx-class failure. Retried with backoff.
    #[error("{message}")]
    TransientRemote {
        /// The transport or server error description.
        message: String,
    },

    /// The remote organization is out of storage. Halts the entire run.
    #[error("{message}")]
    QuotaExceeded {
        /// The quota error reported by the service.
        message: String,
    },

    /// The target record no longer exists. Per-record; never retried.
    #[error("{message}")]
    EntityGone {
        /// The stale-reference error reported by the service.
        message: String,
    },

    /// The service rejected the request for a non-retryable reason
    /// (unknown field, bad value, and so on). Per-record.
    #[error("{message}")]
    Remote {
        /// Service error code, when one was supplied.
        code: Option<String>,
        /// The rejection message reported by the service.
        message: String,
    },

    /// The service rejected the shape of a bulk job submission.
    #[error("bulk job submission rejected: {message}")]
    Submission {
        /// The rejection message reported by the service.
        message: String,
    },

    /// A bulk job reached the `Failed` or `Aborted` state.
    #[error("bulk job {job_id} ended in state {state}: {message}")]
    JobFailed {
        /// Identifier of the failed job.
        job_id: String,
        /// Terminal state the job reached.
        state: String,
        /// Error detail reported by the service, if any.
        message: String,
    },

    /// A caller-supplied cancellation signal stopped the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Record data could not be decoded from or encoded to a file format.
    #[error("codec error: {0}")]
    Codec(String),

    /// Filesystem error while reading or writing record files.
    #[error("i/o error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// What the retry loop should do after a failed attempt.
///
/// Classification is separated from the call site so the policy can be
/// tested and evolved on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Record the failure and move on; retrying cannot help.
    NoRetry,
    /// Wait for the given duration, then attempt again.
    RetryAfter(Duration),
    /// Stop the whole run; no further records should be attempted.
    Fatal,
}

/// Classifies a failed attempt into a [`RetryDecision`].
///
/// Delays grow linearly: attempt `n` waits `n * base_delay`, so successive
/// retries are strictly spaced further apart.
pub fn classify(error: &Error, attempt: u32, base_delay: Duration) -> RetryDecision {
    match error {
        Error::QuotaExceeded { .. } => RetryDecision::Fatal,
        Error::TransientRemote { .. } => {
            RetryDecision::RetryAfter(base_delay.saturating_mul(attempt.max(1)))
        }
        _ => RetryDecision::NoRetry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_is_fatal() {
        let err = Error::QuotaExceeded {
            message: "storage limit exceeded".to_string(),
        };
        assert_eq!(
            classify(&err, 1, Duration::from_secs(5)),
            RetryDecision::Fatal
        );
    }

    #[test]
    fn test_entity_gone_is_not_retried() {
        let err = Error::EntityGone {
            message: "entity is deleted".to_string(),
        };
        assert_eq!(
            classify(&err, 1, Duration::from_secs(5)),
            RetryDecision::NoRetry
        );
    }

    #[test]
    fn test_transient_delay_grows_linearly() {
        let err = Error::TransientRemote {
            message: "connection reset".to_string(),
        };
        let base = Duration::from_secs(5);
        assert_eq!(
            classify(&err, 1, base),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );
        assert_eq!(
            classify(&err, 2, base),
            RetryDecision::RetryAfter(Duration::from_secs(10))
        );
        assert_eq!(
            classify(&err, 3, base),
            RetryDecision::RetryAfter(Duration::from_secs(15))
        );
    }

    #[test]
    fn test_auth_and_config_are_not_retried() {
        let auth = Error::Auth {
            message: "invalid_grant".to_string(),
        };
        let config = Error::Config("batch size must be at least 1".to_string());
        assert_eq!(
            classify(&auth, 1, Duration::from_secs(1)),
            RetryDecision::NoRetry
        );
        assert_eq!(
            classify(&config, 1, Duration::from_secs(1)),
            RetryDecision::NoRetry
        );
    }

    #[test]
    fn test_error_messages_surface_remote_text_verbatim() {
        let err = Error::EntityGone {
            message: "entity is deleted".to_string(),
        };
        assert_eq!(err.to_string(), "entity is deleted");

        let err = Error::Remote {
            code: Some("INVALID_FIELD".to_string()),
            message: "No such column 'Foo' on sobject of type Account".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No such column 'Foo' on sobject of type Account"
        );
    }
}
