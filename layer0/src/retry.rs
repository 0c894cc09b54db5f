//! Error classification and retry policy vocabulary.
//!
//! Every error surfaced by a provider adapter or operator runtime carries
//! an [`ErrorKind`] so callers can decide whether to retry without
//! string-matching error messages.

use crate::duration::DurationMs;
use serde::{Deserialize, Serialize};

/// Coarse classification of what went wrong during a model call or tool
/// invocation. Providers map their native error responses onto this set.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The provider's rate limit was hit (HTTP 429). Retryable after backoff,
    /// honoring `Retry-After` if present.
    RateLimit,
    /// Credentials were rejected (401/403). Not retryable without operator
    /// intervention.
    AuthFailed,
    /// The request exceeded the model's context window. Not retryable
    /// without compaction.
    ContextLength,
    /// The request was malformed (HTTP 400). Not retryable without
    /// changing the request.
    InvalidRequest,
    /// The provider is temporarily unavailable (HTTP >= 500). Retryable.
    ServerError,
    /// The provider signaled it is overloaded (HTTP 503). Retryable,
    /// honoring `Retry-After` if present.
    ServiceUnavailable,
    /// The request timed out. Retryable.
    Timeout,
    /// A connection-level failure (DNS, TCP reset, TLS). Retryable.
    NetworkError,
    /// The provider's safety system blocked the request or response. Not
    /// retryable.
    ContentFilter,
    /// The requested model does not exist (HTTP 404). Not retryable.
    ModelNotFound,
    /// The account's quota/budget was exhausted (HTTP 402). Not retryable.
    QuotaExceeded,
    /// A reasoning block's signature failed verification, meaning history
    /// was tampered with or mis-assembled. Not retryable.
    ThinkingSignatureInvalid,
    /// The stream was interrupted mid-response. Retryable.
    StreamError,
    /// The provider's response body could not be parsed. Not retryable.
    ParseError,
    /// Uncategorized.
    Unknown,
}

impl ErrorKind {
    /// Whether an error of this kind is worth retrying at all.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit
                | ErrorKind::ServerError
                | ErrorKind::ServiceUnavailable
                | ErrorKind::Timeout
                | ErrorKind::NetworkError
                | ErrorKind::StreamError
        )
    }
}

/// Exponential backoff with jitter, parameterized by attempt count.
///
/// `delay(attempt)` for `attempt` starting at 0 computes
/// `capped = min(max_delay, base_delay * 2^attempt)`, then jitters it by
/// `capped * jitter_fraction * (rand - 0.5) * 2` — a centered,
/// bidirectional offset so the result falls in
/// `[capped * (1 - jitter_fraction), capped * (1 + jitter_fraction))`.
/// `rand` is a caller-supplied sample in `[0.0, 1.0)` — callers own the
/// random source so this stays deterministic and testable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: DurationMs,
    /// Ceiling on the computed delay, regardless of attempt count.
    pub max_delay: DurationMs,
    /// Upper bound on the jitter fraction applied to each delay.
    pub jitter_fraction: f64,
}

impl RetryPolicy {
    /// The spec's default policy: 3 retries, 1s base, 60s cap, 20% jitter.
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            base_delay: DurationMs::from_secs(1),
            max_delay: DurationMs::from_secs(60),
            jitter_fraction: 0.2,
        }
    }

    /// Compute the delay before the given retry attempt (0-indexed),
    /// given a jitter sample in `[0.0, 1.0)`.
    pub fn delay_for(&self, attempt: u32, jitter_sample: f64) -> DurationMs {
        let base = self.base_delay.as_millis();
        let scaled = base.saturating_mul(1u64 << attempt.min(32));
        let capped = scaled.min(self.max_delay.as_millis()) as f64;
        let offset = jitter_sample.clamp(0.0, 1.0) - 0.5;
        let jittered = capped + capped * self.jitter_fraction * offset * 2.0;
        DurationMs::from_millis(jittered.max(0.0) as u64)
    }

    /// Compute the delay before the given retry attempt, honoring a
    /// provider-supplied `Retry-After` hint. The larger of the two wins,
    /// per the spec's override rule.
    pub fn delay_for_with_retry_after(
        &self,
        attempt: u32,
        jitter_sample: f64,
        retry_after: Option<DurationMs>,
    ) -> DurationMs {
        let computed = self.delay_for(attempt, jitter_sample);
        match retry_after {
            Some(hint) if hint.as_millis() > computed.as_millis() => hint,
            _ => computed,
        }
    }

    /// Whether another attempt is permitted after this many retries so far.
    pub fn should_retry(&self, kind: ErrorKind, attempts_so_far: u32) -> bool {
        kind.is_retryable() && attempts_so_far < self.max_attempts
    }
}
