#![deny(missing_docs)]
//! Anthropic API provider for neuron-turn.
//!
//! Implements the [`neuron_turn::Provider`] trait for Anthropic's Messages API.

mod streaming;
mod types;

use neuron_turn::provider::{parse_retry_after_ms, Provider, ProviderError};
use neuron_turn::sanitize_tool_schema;
use neuron_turn::types::*;
use neuron_turn::StreamChunk;
use rust_decimal::Decimal;
use types::*;

fn retry_after_ms_from_headers(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after_ms)
}

/// Anthropic API provider.
pub struct AnthropicProvider {
    api_key: String,
    client: reqwest::Client,
    api_url: String,
    files_url: String,
    api_version: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            api_url: "https://api.anthropic.com/v1/messages".into(),
            files_url: "https://api.anthropic.com/v1/files".into(),
            api_version: "2023-06-01".into(),
        }
    }

    /// Override the API URL (for testing or proxies).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Override the Files API URL (for testing or proxies).
    pub fn with_files_url(mut self, url: impl Into<String>) -> Self {
        self.files_url = url.into();
        self
    }

    fn build_request(&self, request: &ProviderRequest) -> AnthropicRequest {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| "claude-haiku-4-5-20251001".into());
        let max_tokens = request.max_tokens.unwrap_or(4096);

        let messages: Vec<AnthropicMessage> = request
            .messages
            .iter()
            .map(|m| AnthropicMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "user".into(), // System messages go in the system field
                },
                content: parts_to_anthropic_content(&m.content),
            })
            .collect();

        let tools: Vec<AnthropicTool> = request
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: sanitize_tool_schema(&t.input_schema),
            })
            .collect();

        AnthropicRequest {
            model,
            max_tokens,
            messages,
            system: request.system.clone(),
            tools,
            stream: false,
        }
    }

    fn parse_response(&self, response: AnthropicResponse) -> ProviderResponse {
        let content: Vec<ContentPart> = response
            .content
            .iter()
            .map(anthropic_block_to_content_part)
            .collect();

        let stop_reason = match response.stop_reason.as_str() {
            "end_turn" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };

        let usage = TokenUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            cache_read_tokens: response.usage.cache_read_input_tokens,
            cache_creation_tokens: response.usage.cache_creation_input_tokens,
        };

        // Simple cost calculation for Haiku
        // Haiku: $0.25/MTok input, $1.25/MTok output (as of 2025)
        let input_cost = Decimal::from(response.usage.input_tokens) * Decimal::new(25, 8);
        let output_cost = Decimal::from(response.usage.output_tokens) * Decimal::new(125, 8);
        let cost = input_cost + output_cost;

        ProviderResponse {
            content,
            stop_reason,
            usage,
            model: response.model,
            cost: Some(cost),
            truncated: None,
        }
    }
}

impl Provider for AnthropicProvider {
    fn complete(
        &self,
        request: ProviderRequest,
    ) -> impl std::future::Future<Output = Result<ProviderResponse, ProviderError>> + Send {
        let api_request = self.build_request(&request);
        let http_request = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
            .json(&api_request);

        async move {
            let http_response = http_request
                .send()
                .await
                .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

            let status = http_response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after_ms = retry_after_ms_from_headers(http_response.headers());
                return Err(ProviderError::RateLimited { retry_after_ms });
            }
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                let body = http_response.text().await.unwrap_or_default();
                return Err(ProviderError::AuthFailed(body));
            }
            if !status.is_success() {
                let body = http_response.text().await.unwrap_or_default();
                return Err(ProviderError::RequestFailed(format!(
                    "HTTP {status}: {body}"
                )));
            }

            let api_response: AnthropicResponse = http_response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

            Ok(self.parse_response(api_response))
        }
    }

    fn upload_file(
        &self,
        bytes: &[u8],
        mime_type: &str,
    ) -> impl std::future::Future<Output = Result<neuron_turn::upload_cache::UploadedFile, ProviderError>> + Send
    {
        let part = match reqwest::multipart::Part::bytes(bytes.to_vec()).mime_str(mime_type) {
            Ok(p) => p,
            Err(_) => reqwest::multipart::Part::bytes(bytes.to_vec()),
        }
        .file_name("upload");
        let form = reqwest::multipart::Form::new().part("file", part);
        let http_request = self
            .client
            .post(&self.files_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("anthropic-beta", "files-api-2025-04-14")
            .multipart(form);

        async move {
            let http_response = http_request
                .send()
                .await
                .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

            let status = http_response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after_ms = retry_after_ms_from_headers(http_response.headers());
                return Err(ProviderError::RateLimited { retry_after_ms });
            }
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                let body = http_response.text().await.unwrap_or_default();
                return Err(ProviderError::AuthFailed(body));
            }
            if !status.is_success() {
                let body = http_response.text().await.unwrap_or_default();
                return Err(ProviderError::RequestFailed(format!("HTTP {status}: {body}")));
            }

            let file: AnthropicFileResponse = http_response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

            Ok(neuron_turn::upload_cache::UploadedFile {
                file_id: file.id,
                file_uri: None,
            })
        }
    }

    fn stream(
        &self,
        request: ProviderRequest,
    ) -> impl std::future::Future<
        Output = Result<
            impl futures_util::Stream<Item = Result<StreamChunk, ProviderError>> + Send,
            ProviderError,
        >,
    > + Send {
        let mut api_request = self.build_request(&request);
        api_request.stream = true;
        let http_request = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
            .json(&api_request);

        async move {
            let http_response = http_request
                .send()
                .await
                .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

            let status = http_response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after_ms = retry_after_ms_from_headers(http_response.headers());
                return Err(ProviderError::RateLimited { retry_after_ms });
            }
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                let body = http_response.text().await.unwrap_or_default();
                return Err(ProviderError::AuthFailed(body));
            }
            if !status.is_success() {
                let body = http_response.text().await.unwrap_or_default();
                return Err(ProviderError::RequestFailed(format!(
                    "HTTP {status}: {body}"
                )));
            }

            Ok(streaming::stream_chunks(http_response))
        }
    }
}

fn parts_to_anthropic_content(parts: &[ContentPart]) -> AnthropicContent {
    if parts.len() == 1 {
        if let ContentPart::Text { text } = &parts[0] {
            return AnthropicContent::Text(text.clone());
        }
    }
    AnthropicContent::Blocks(parts.iter().map(content_part_to_anthropic_block).collect())
}

fn content_part_to_anthropic_block(part: &ContentPart) -> AnthropicContentBlock {
    match part {
        ContentPart::Text { text } => AnthropicContentBlock::Text { text: text.clone() },
        ContentPart::Reasoning { reasoning, meta } => AnthropicContentBlock::Thinking {
            thinking: reasoning.clone(),
            signature: meta.as_ref().and_then(|m| m.signature.clone()),
        },
        ContentPart::ToolUse { id, name, input } => AnthropicContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => AnthropicContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: *is_error,
        },
        ContentPart::Image { source, media_type } => AnthropicContentBlock::Image {
            source: match source {
                ImageSource::Base64 { data } => AnthropicImageSource::Base64 { data: data.clone() },
                ImageSource::Url { url } => AnthropicImageSource::Url { url: url.clone() },
            },
            media_type: media_type.clone(),
        },
        ContentPart::File { source, .. } => AnthropicContentBlock::Document {
            source: media_source_to_anthropic_image_source(source),
            media_type: source.mime_type.clone().unwrap_or_else(|| "application/pdf".into()),
        },
        // Anthropic's Messages API has no audio/video content block; degrade
        // to a text marker rather than dropping the turn's content silently.
        ContentPart::Audio { .. } => AnthropicContentBlock::Text {
            text: "[audio content omitted: unsupported by this provider]".into(),
        },
        ContentPart::Video { .. } => AnthropicContentBlock::Text {
            text: "[video content omitted: unsupported by this provider]".into(),
        },
    }
}

fn media_source_to_anthropic_image_source(source: &MediaSource) -> AnthropicImageSource {
    if let Some(id) = &source.file_id {
        AnthropicImageSource::File {
            file_id: id.clone(),
        }
    } else if let Some(data) = &source.base64 {
        AnthropicImageSource::Base64 { data: data.clone() }
    } else {
        AnthropicImageSource::Url {
            url: source.url.clone().unwrap_or_default(),
        }
    }
}

fn anthropic_block_to_content_part(block: &AnthropicContentBlock) -> ContentPart {
    match block {
        AnthropicContentBlock::Text { text } => ContentPart::Text { text: text.clone() },
        AnthropicContentBlock::Thinking { thinking, signature } => ContentPart::Reasoning {
            reasoning: thinking.clone(),
            meta: signature.as_ref().map(|sig| ReasoningMeta {
                signature: Some(sig.clone()),
                thought_signature: None,
            }),
        },
        AnthropicContentBlock::ToolUse { id, name, input } => ContentPart::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        AnthropicContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentPart::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: *is_error,
        },
        AnthropicContentBlock::Image { source, media_type } => ContentPart::Image {
            source: match source {
                AnthropicImageSource::Base64 { data } => ImageSource::Base64 { data: data.clone() },
                AnthropicImageSource::Url { url } => ImageSource::Url { url: url.clone() },
                // ImageSource has no file_id variant; surface the reference
                // as a URL so round-tripping doesn't silently drop it.
                AnthropicImageSource::File { file_id } => ImageSource::Url {
                    url: format!("file:{file_id}"),
                },
            },
            media_type: media_type.clone(),
        },
        AnthropicContentBlock::Document { source, media_type } => ContentPart::File {
            source: MediaSource {
                base64: match source {
                    AnthropicImageSource::Base64 { data } => Some(data.clone()),
                    AnthropicImageSource::Url { .. } | AnthropicImageSource::File { .. } => None,
                },
                url: match source {
                    AnthropicImageSource::Url { url } => Some(url.clone()),
                    AnthropicImageSource::Base64 { .. } | AnthropicImageSource::File { .. } => None,
                },
                mime_type: Some(media_type.clone()),
                file_id: match source {
                    AnthropicImageSource::File { file_id } => Some(file_id.clone()),
                    AnthropicImageSource::Base64 { .. } | AnthropicImageSource::Url { .. } => None,
                },
            },
            filename: None,
        },
    }
}
