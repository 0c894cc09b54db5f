//! Provider trait for LLM backends.
//!
//! The [`Provider`] trait uses RPITIT (return-position `impl Trait` in traits)
//! and is intentionally NOT object-safe. The object-safe boundary is
//! `layer0::Operator` — ReactOperator<P: Provider> implements Operator.

use crate::types::{ProviderRequest, ProviderResponse};
use crate::upload_cache::UploadedFile;
use futures_core::Stream;
use layer0::retry::ErrorKind;
use layer0::stream::StreamChunk;
use std::future::Future;
use thiserror::Error;

/// Errors from LLM providers.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP or network request failed.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Provider rate-limited the request, optionally with a `Retry-After`
    /// hint in milliseconds.
    #[error("rate limited")]
    RateLimited {
        /// `Retry-After`, if the provider sent one.
        retry_after_ms: Option<u64>,
    },

    /// Authentication/authorization failed.
    #[error("auth failed: {0}")]
    AuthFailed(String),

    /// The request exceeded the model's context window.
    #[error("context length exceeded")]
    ContextLengthExceeded,

    /// The provider's safety system blocked the request or response.
    #[error("content filtered")]
    ContentFiltered,

    /// Could not parse the provider's response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Mid-stream interruption (connection dropped before `message_stop`).
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    /// This provider has no file upload endpoint.
    #[error("file upload not supported by this provider")]
    UploadUnsupported,

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ProviderError {
    /// Classify this error per the core's retry taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::RequestFailed(_) => ErrorKind::NetworkError,
            ProviderError::RateLimited { .. } => ErrorKind::RateLimit,
            ProviderError::AuthFailed(_) => ErrorKind::AuthFailed,
            ProviderError::ContextLengthExceeded => ErrorKind::ContextLength,
            ProviderError::ContentFiltered => ErrorKind::ContentFilter,
            ProviderError::InvalidResponse(_) => ErrorKind::ParseError,
            ProviderError::StreamInterrupted(_) => ErrorKind::StreamError,
            ProviderError::UploadUnsupported => ErrorKind::InvalidRequest,
            ProviderError::Other(_) => ErrorKind::Unknown,
        }
    }

    /// Whether retrying this request might succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Parse a `Retry-After` header value into milliseconds.
///
/// Providers send either a delay in seconds (`Retry-After: 30`) or an
/// HTTP-date; only the seconds form is common in practice, so that's all
/// this supports. Returns `None` if absent or unparseable.
pub fn parse_retry_after_ms(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().map(|secs| secs * 1000)
}

/// LLM provider interface.
///
/// Each provider (Anthropic, OpenAI, Ollama) implements this trait.
/// Provider-native features (truncation, caching, thinking blocks)
/// are handled by the provider impl using `ProviderRequest.extra`.
///
/// This trait uses RPITIT and is NOT object-safe. That's intentional —
/// `ReactOperator<P: Provider>` is generic, and the object-safe boundary
/// is `layer0::Operator`.
pub trait Provider: Send + Sync {
    /// Send a completion request to the provider.
    fn complete(
        &self,
        request: ProviderRequest,
    ) -> impl Future<Output = Result<ProviderResponse, ProviderError>> + Send;

    /// Send a completion request and stream back normalized chunks.
    ///
    /// The returned stream is lazy, finite, and single-pass: a failed
    /// or interrupted stream is not resumable, only retryable by
    /// calling `stream` again with the same request.
    ///
    /// The default forwards to [`Provider::complete`] and replays the
    /// finished response as a single `content_block_start`/`stop` pair
    /// per block — a provider with no native incremental transport
    /// still satisfies the streaming contract, just without the
    /// latency benefit. Providers with real incremental transports
    /// (SSE, NDJSON, ...) should override this.
    fn stream(
        &self,
        request: ProviderRequest,
    ) -> impl Future<Output = Result<impl Stream<Item = Result<StreamChunk, ProviderError>> + Send, ProviderError>> + Send
    {
        async move {
            let response = self.complete(request).await?;
            Ok(futures_util::stream::iter(response_to_chunks(response)))
        }
    }

    /// Upload raw file bytes, returning the provider-scoped id a later
    /// request can reference instead of resending the payload inline.
    ///
    /// The default rejects every upload; providers with a files
    /// endpoint (Anthropic, OpenAI) override this. Callers normally
    /// reach this indirectly, through [`crate::upload_cache::resolve_uploads`],
    /// which only calls it on a cache miss.
    fn upload_file(
        &self,
        bytes: &[u8],
        mime_type: &str,
    ) -> impl Future<Output = Result<UploadedFile, ProviderError>> + Send {
        let _ = (bytes, mime_type);
        async { Err(ProviderError::UploadUnsupported) }
    }
}

/// Replay a finished [`ProviderResponse`] as the synthetic chunk
/// sequence a real streaming transport would have produced.
fn response_to_chunks(
    response: ProviderResponse,
) -> Vec<Result<StreamChunk, ProviderError>> {
    use crate::convert::content_part_to_block;

    let mut chunks = Vec::with_capacity(response.content.len() * 2 + 2);
    for (index, part) in response.content.iter().enumerate() {
        chunks.push(Ok(StreamChunk::ContentBlockStart {
            index,
            content_block: content_part_to_block(part),
        }));
        chunks.push(Ok(StreamChunk::ContentBlockStop { index }));
    }
    chunks.push(Ok(StreamChunk::MessageDelta {
        usage: Some(layer0::stream::StreamUsage {
            input_tokens: response.usage.input_tokens.min(u64::from(u32::MAX)) as u32,
            output_tokens: response.usage.output_tokens.min(u64::from(u32::MAX)) as u32,
        }),
    }));
    chunks.push(Ok(StreamChunk::MessageStop));
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_display() {
        assert_eq!(
            ProviderError::RequestFailed("timeout".into()).to_string(),
            "request failed: timeout"
        );
        assert_eq!(
            ProviderError::RateLimited { retry_after_ms: None }.to_string(),
            "rate limited"
        );
        assert_eq!(
            ProviderError::AuthFailed("bad key".into()).to_string(),
            "auth failed: bad key"
        );
        assert_eq!(
            ProviderError::InvalidResponse("bad json".into()).to_string(),
            "invalid response: bad json"
        );
    }

    #[test]
    fn provider_error_retryable() {
        assert!(ProviderError::RateLimited { retry_after_ms: None }.is_retryable());
        assert!(ProviderError::RequestFailed("timeout".into()).is_retryable());
        assert!(ProviderError::StreamInterrupted("eof".into()).is_retryable());
        assert!(!ProviderError::AuthFailed("bad key".into()).is_retryable());
        assert!(!ProviderError::InvalidResponse("x".into()).is_retryable());
        assert!(!ProviderError::ContextLengthExceeded.is_retryable());
        assert!(!ProviderError::ContentFiltered.is_retryable());
    }

    #[test]
    fn provider_error_kind_classification() {
        assert_eq!(
            ProviderError::RateLimited { retry_after_ms: Some(2000) }.kind(),
            ErrorKind::RateLimit
        );
        assert_eq!(ProviderError::ContextLengthExceeded.kind(), ErrorKind::ContextLength);
        assert_eq!(ProviderError::ContentFiltered.kind(), ErrorKind::ContentFilter);
    }
}
