//! Quota guard: decides whether a batch may spend provider characters.
//!
//! The character budget is shared with every other consumer of the same
//! credential, so the guard fetches a fresh usage snapshot for every
//! reservation and never trusts local bookkeeping.

use crate::error::ProviderError;
use crate::provider::TranslationProvider;
use crate::retry::{with_backoff, RetryConfig};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a reservation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    Allowed { requested: u64, remaining: u64 },
    Denied { requested: u64, reason: DenyReason },
}

impl Reservation {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Reservation::Allowed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum DenyReason {
    /// The estimate does not fit in `limit - used - reserve`
    InsufficientBudget { remaining: u64 },
    /// Usage could not be fetched; spending blind is not allowed
    UsageUnavailable { message: String },
}

/// How the runner must react to a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Try the same job again after a backoff delay
    Retry,
    /// Budget is gone: stop issuing work, report the rest as skipped
    QuotaExhausted,
    /// Credential is bad: abort the whole run
    Abort,
    /// Only this job is affected
    FailJob,
}

/// Classify a provider error for the runner.
pub fn classify(error: &ProviderError) -> ErrorClass {
    match error {
        ProviderError::Auth { .. } => ErrorClass::Abort,
        ProviderError::QuotaExceeded => ErrorClass::QuotaExhausted,
        ProviderError::Transient(_) | ProviderError::RateLimited { .. } => ErrorClass::Retry,
        ProviderError::Rejected { .. } | ProviderError::Malformed(_) => ErrorClass::FailJob,
    }
}

/// Gatekeeper for provider spend.
pub struct QuotaGuard<P: ?Sized> {
    provider: Arc<P>,
    /// Characters kept in hand for other consumers of the credential
    reserve_chars: u64,
    retry: RetryConfig,
}

impl<P> QuotaGuard<P>
where
    P: TranslationProvider + ?Sized,
{
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            reserve_chars: 0,
            retry: RetryConfig::usage_query(),
        }
    }

    pub fn with_reserve(mut self, reserve_chars: u64) -> Self {
        self.reserve_chars = reserve_chars;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Ask for `estimated_chars` of budget against a freshly fetched snapshot.
    ///
    /// Returns `Err` only for credential failures, which must abort the run.
    /// Any other usage failure becomes a denial.
    pub async fn reserve(&self, estimated_chars: u64) -> Result<Reservation, ProviderError> {
        let usage = with_backoff(&self.retry, "Provider usage query", || {
            self.provider.usage()
        })
        .await;

        let usage = match usage {
            Ok(usage) => usage,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Usage unavailable from {}: {}", self.provider.provider_name(), e);
                return Ok(Reservation::Denied {
                    requested: estimated_chars,
                    reason: DenyReason::UsageUnavailable {
                        message: e.to_string(),
                    },
                });
            }
        };

        let remaining = usage.remaining().saturating_sub(self.reserve_chars);
        debug!(
            "Quota snapshot: used={} limit={} reserve={} requested={}",
            usage.characters_used, usage.character_limit, self.reserve_chars, estimated_chars
        );

        if estimated_chars > remaining {
            info!(
                "Quota guard denied {} chars ({} remaining)",
                estimated_chars, remaining
            );
            return Ok(Reservation::Denied {
                requested: estimated_chars,
                reason: DenyReason::InsufficientBudget { remaining },
            });
        }

        Ok(Reservation::Allowed {
            requested: estimated_chars,
            remaining,
        })
    }
}
