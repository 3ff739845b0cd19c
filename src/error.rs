//! Error taxonomy for the translation pipeline.
//!
//! Provider errors are classified by how the runner must react to them:
//! credential failures abort the run, quota exhaustion ends it early,
//! transient failures and rate limits are retried with backoff, and
//! everything else fails the single job.

use crate::retry::Retryable;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the translation provider client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Bad or revoked credential. No job can succeed.
    #[error("translation provider rejected the credential (HTTP {status})")]
    Auth { status: u16 },

    /// Character budget exhausted for the current billing period.
    #[error("translation provider character quota exceeded")]
    QuotaExceeded,

    /// HTTP 429. `retry_after` comes from the `Retry-After` header when present.
    #[error("translation provider rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    /// Network failure, timeout or 5xx.
    #[error("transient translation provider failure: {0}")]
    Transient(String),

    /// Any other 4xx. Retrying the same request will not help.
    #[error("translation provider rejected the request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// 2xx response that does not match the expected shape.
    #[error("malformed translation provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Map a non-success HTTP status to the provider taxonomy.
    ///
    /// 456 is the DeepL-specific "quota exceeded" status.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => ProviderError::Auth { status },
            429 => ProviderError::RateLimited { retry_after },
            456 => ProviderError::QuotaExceeded,
            408 | 500..=599 => ProviderError::Transient(format!("HTTP {}: {}", status, body)),
            _ => ProviderError::Rejected { status, body },
        }
    }

    /// True for errors after which no further job in the run can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProviderError::Auth { .. })
    }
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient(_) | ProviderError::RateLimited { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            ProviderError::Malformed(error.to_string())
        } else {
            // Timeouts, connection resets and DNS failures all land here
            ProviderError::Transient(error.to_string())
        }
    }
}

/// Failures surfaced by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("document store unreachable: {0}")]
    Unavailable(String),

    #[error("document store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("record {0} not found")]
    NotFound(String),

    #[error("malformed document store response: {0}")]
    Malformed(String),
}

impl StoreError {
    /// Transient failures are worth retrying for reads.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            StoreError::Malformed(error.to_string())
        } else {
            StoreError::Unavailable(error.to_string())
        }
    }
}

/// Failures while establishing or using a locale link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// More than one variant already shares the link in this locale.
    #[error("{count} variants share link {link_id} in locale {locale}")]
    Conflict {
        link_id: String,
        locale: String,
        count: usize,
    },

    #[error("no source record for base id {0}")]
    MissingSource(String),
}

/// Invalid locale code supplied by configuration or an operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid locale code '{0}'")]
pub struct LocaleError(pub String);

/// Failures of the explicit, operator-confirmed corrective operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrectiveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Link(#[from] LinkError),

    /// Destructive operations never touch the canonical locale.
    #[error("refusing to modify source locale {0}")]
    SourceLocale(String),

    /// The store changed since the dry run, or the operator typed the wrong token.
    #[error("confirmation token does not match the current plan (expected '{expected}')")]
    ConfirmationMismatch { expected: String },
}
