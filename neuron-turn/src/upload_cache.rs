//! SHA-256-keyed cache for provider file uploads (§4.B).
//!
//! A [`FileUploadCache`] is an explicit service handed to the code that
//! builds a provider request, not an ambient singleton — this keeps
//! adapters testable with a fake cache and lets a caller share or
//! isolate cache state across agents however it likes.

use crate::provider::{Provider, ProviderError};
use crate::types::{ContentPart, MediaSource, ProviderMessage};
use async_trait::async_trait;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::Mutex;

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// A provider-assigned handle for previously uploaded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// The id the provider returned for this upload.
    pub file_id: String,
    /// A provider-fetchable URI for the upload, if it returned one.
    pub file_uri: Option<String>,
}

/// Maps raw file bytes to the provider-scoped id a prior upload
/// returned, keyed by `(scope, sha256-of-bytes)`.
///
/// `scope` is caller-defined; [`resolve_uploads`] uses it to separate
/// cache entries per provider (and, where the caller has one, per
/// agent) so a provider switch can't hand another vendor's file id
/// back to a request.
#[async_trait]
pub trait FileUploadCache: Send + Sync {
    /// Look up a previously uploaded file by scope and content hash.
    async fn get(&self, scope: &str, sha256: &str) -> Option<UploadedFile>;
    /// Record a newly uploaded file under this scope and content hash.
    async fn put(&self, scope: &str, sha256: &str, file: UploadedFile);
}

/// In-memory [`FileUploadCache`]. The default for `ReactOperator` and
/// the provider adapters; swap in a durable or fake implementation by
/// constructing one of your own.
#[derive(Default)]
pub struct InMemoryUploadCache {
    entries: Mutex<HashMap<(String, String), UploadedFile>>,
}

#[async_trait]
impl FileUploadCache for InMemoryUploadCache {
    async fn get(&self, scope: &str, sha256: &str) -> Option<UploadedFile> {
        self.entries
            .lock()
            .await
            .get(&(scope.to_string(), sha256.to_string()))
            .cloned()
    }

    async fn put(&self, scope: &str, sha256: &str, file: UploadedFile) {
        self.entries
            .lock()
            .await
            .insert((scope.to_string(), sha256.to_string()), file);
    }
}

/// Walk every `Audio`/`Video`/`File` part in `messages` carrying inline
/// base64 bytes and no `file_id` yet, uploading through `provider` on a
/// cache miss and rewriting the part to reference the returned id with
/// the base64 payload cleared. Parts that already reference a
/// `file_id`, or that only carry a `url`, are left untouched. `Image`
/// parts are untouched too — they use their own `ImageSource` shape
/// without a file-id slot, and most vendors accept inline image bytes
/// directly.
pub async fn resolve_uploads<P: Provider + ?Sized>(
    provider: &P,
    cache: &dyn FileUploadCache,
    scope: &str,
    messages: &mut [ProviderMessage],
) -> Result<(), ProviderError> {
    for message in messages.iter_mut() {
        for part in message.content.iter_mut() {
            let source = match part {
                ContentPart::Audio { source } | ContentPart::Video { source } => source,
                ContentPart::File { source, .. } => source,
                _ => continue,
            };
            resolve_source(provider, cache, scope, source).await?;
        }
    }
    Ok(())
}

async fn resolve_source<P: Provider + ?Sized>(
    provider: &P,
    cache: &dyn FileUploadCache,
    scope: &str,
    source: &mut MediaSource,
) -> Result<(), ProviderError> {
    if source.file_id.is_some() {
        return Ok(());
    }
    let Some(data) = source.base64.as_ref() else {
        return Ok(());
    };
    let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(data) else {
        return Ok(());
    };

    let sha256 = sha256_hex(&bytes);
    let mime_type = source.mime_type.clone().unwrap_or_default();
    let uploaded = match cache.get(scope, &sha256).await {
        Some(file) => file,
        None => match provider.upload_file(&bytes, &mime_type).await {
            Ok(file) => {
                cache.put(scope, &sha256, file.clone()).await;
                file
            }
            // Upload is the preferred wire form, not a requirement: a
            // provider with no Files API still sends these bytes inline.
            Err(ProviderError::UploadUnsupported) => return Ok(()),
            Err(e) => return Err(e),
        },
    };

    source.file_id = Some(uploaded.file_id);
    if uploaded.file_uri.is_some() {
        source.url = uploaded.file_uri;
    }
    source.base64 = None;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProviderRequest, ProviderResponse, Role, StopReason, TokenUsage};
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        uploads: AtomicUsize,
    }

    impl Provider for CountingProvider {
        fn complete(
            &self,
            _request: ProviderRequest,
        ) -> impl Future<Output = Result<ProviderResponse, ProviderError>> + Send {
            async {
                Ok(ProviderResponse {
                    content: vec![],
                    stop_reason: StopReason::EndTurn,
                    usage: TokenUsage::default(),
                    model: "test-model".into(),
                    cost: None,
                    truncated: None,
                })
            }
        }

        fn upload_file(
            &self,
            bytes: &[u8],
            _mime_type: &str,
        ) -> impl Future<Output = Result<UploadedFile, ProviderError>> + Send {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            let id = sha256_hex(bytes);
            async move {
                Ok(UploadedFile {
                    file_id: format!("file_{id}"),
                    file_uri: None,
                })
            }
        }
    }

    fn file_part(base64_data: &str) -> ContentPart {
        ContentPart::File {
            source: MediaSource {
                base64: Some(base64_data.into()),
                url: None,
                mime_type: Some("application/pdf".into()),
                file_id: None,
            },
            filename: Some("doc.pdf".into()),
        }
    }

    #[tokio::test]
    async fn uploads_once_and_rewrites_to_file_id() {
        let provider = CountingProvider { uploads: AtomicUsize::new(0) };
        let cache = InMemoryUploadCache::default();
        let data = base64::engine::general_purpose::STANDARD.encode(b"hello world");

        let mut messages = vec![ProviderMessage {
            role: Role::User,
            content: vec![file_part(&data)],
        }];
        resolve_uploads(&provider, &cache, "anthropic", &mut messages).await.unwrap();

        let ContentPart::File { source, .. } = &messages[0].content[0] else {
            panic!("expected file part");
        };
        assert!(source.base64.is_none());
        assert!(source.file_id.is_some());
        assert_eq!(provider.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_hit_skips_second_upload() {
        let provider = CountingProvider { uploads: AtomicUsize::new(0) };
        let cache = InMemoryUploadCache::default();
        let data = base64::engine::general_purpose::STANDARD.encode(b"same bytes");

        let mut first = vec![ProviderMessage { role: Role::User, content: vec![file_part(&data)] }];
        resolve_uploads(&provider, &cache, "anthropic", &mut first).await.unwrap();

        let mut second = vec![ProviderMessage { role: Role::User, content: vec![file_part(&data)] }];
        resolve_uploads(&provider, &cache, "anthropic", &mut second).await.unwrap();

        assert_eq!(provider.uploads.load(Ordering::SeqCst), 1);
        let ContentPart::File { source, .. } = &second[0].content[0] else {
            panic!("expected file part");
        };
        assert!(source.file_id.is_some());
    }

    struct NoUploadProvider;

    impl Provider for NoUploadProvider {
        fn complete(
            &self,
            _request: ProviderRequest,
        ) -> impl Future<Output = Result<ProviderResponse, ProviderError>> + Send {
            async {
                Ok(ProviderResponse {
                    content: vec![],
                    stop_reason: StopReason::EndTurn,
                    usage: TokenUsage::default(),
                    model: "test-model".into(),
                    cost: None,
                    truncated: None,
                })
            }
        }
    }

    #[tokio::test]
    async fn provider_without_uploads_keeps_inline_base64() {
        let provider = NoUploadProvider;
        let cache = InMemoryUploadCache::default();
        let data = base64::engine::general_purpose::STANDARD.encode(b"no upload support");

        let mut messages = vec![ProviderMessage {
            role: Role::User,
            content: vec![file_part(&data)],
        }];
        resolve_uploads(&provider, &cache, "ollama", &mut messages).await.unwrap();

        let ContentPart::File { source, .. } = &messages[0].content[0] else {
            panic!("expected file part");
        };
        assert_eq!(source.base64.as_deref(), Some(data.as_str()));
        assert!(source.file_id.is_none());
    }

    #[tokio::test]
    async fn different_scope_uploads_again() {
        let provider = CountingProvider { uploads: AtomicUsize::new(0) };
        let cache = InMemoryUploadCache::default();
        let data = base64::engine::general_purpose::STANDARD.encode(b"scoped bytes");

        let mut a = vec![ProviderMessage { role: Role::User, content: vec![file_part(&data)] }];
        resolve_uploads(&provider, &cache, "anthropic", &mut a).await.unwrap();

        let mut b = vec![ProviderMessage { role: Role::User, content: vec![file_part(&data)] }];
        resolve_uploads(&provider, &cache, "openai", &mut b).await.unwrap();

        assert_eq!(provider.uploads.load(Ordering::SeqCst), 2);
    }
}
