#![deny(missing_docs)]
//! OpenAI API provider for neuron-turn.
//!
//! Implements the [`neuron_turn::Provider`] trait for OpenAI's Chat Completions API.

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

/// OpenAI API provider.
pub struct OpenAIProvider {
    api_key: String,
    client: reqwest::Client,
    api_url: String,
    files_url: String,
    org_id: Option<String>,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            api_url: "https://api.openai.com/v1/chat/completions".into(),
            files_url: "https://api.openai.com/v1/files".into(),
            org_id: None,
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

    /// Set the OpenAI-Organization header for multi-org accounts.
    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    fn build_request(&self, request: &ProviderRequest) -> OpenAIRequest {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".into());
        let max_tokens = request.max_tokens;

        let mut messages: Vec<OpenAIMessage> = Vec::new();

        // System prompt becomes a system message.
        if let Some(ref system) = request.system {
            messages.push(OpenAIMessage {
                role: "system".into(),
                content: Some(OpenAIContent::Text(system.clone())),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        // Map ProviderMessages to OpenAI messages.
        for m in &request.messages {
            match m.role {
                Role::System => {
                    // Additional system messages.
                    let text = extract_text(&m.content);
                    messages.push(OpenAIMessage {
                        role: "system".into(),
                        content: Some(OpenAIContent::Text(text)),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                }
                Role::User => {
                    // Check if any content part is a tool result.
                    // OpenAI uses role="tool" for tool results, not user messages.
                    let mut tool_results = Vec::new();
                    let mut other_parts = Vec::new();
                    for part in &m.content {
                        match part {
                            ContentPart::ToolResult {
                                tool_use_id,
                                content,
                                ..
                            } => {
                                tool_results.push((tool_use_id.clone(), content.clone()));
                            }
                            _ => {
                                other_parts.push(part.clone());
                            }
                        }
                    }

                    // Emit tool result messages first.
                    for (tool_call_id, content) in tool_results {
                        messages.push(OpenAIMessage {
                            role: "tool".into(),
                            content: Some(OpenAIContent::Text(content)),
                            tool_calls: None,
                            tool_call_id: Some(tool_call_id),
                        });
                    }

                    // Emit user message if there are other parts.
                    if !other_parts.is_empty() {
                        messages.push(OpenAIMessage {
                            role: "user".into(),
                            content: Some(parts_to_openai_content(&other_parts)),
                            tool_calls: None,
                            tool_call_id: None,
                        });
                    }
                }
                Role::Assistant => {
                    // Check for tool use parts.
                    let mut tool_calls = Vec::new();
                    let mut text_parts = Vec::new();
                    for part in &m.content {
                        match part {
                            ContentPart::ToolUse { id, name, input } => {
                                tool_calls.push(OpenAIToolCall {
                                    id: id.clone(),
                                    call_type: "function".into(),
                                    function: OpenAIFunctionCall {
                                        name: name.clone(),
                                        arguments: serde_json::to_string(input)
                                            .unwrap_or_default(),
                                    },
                                });
                            }
                            _ => {
                                text_parts.push(part.clone());
                            }
                        }
                    }

                    let content = if text_parts.is_empty() {
                        None
                    } else {
                        Some(parts_to_openai_content(&text_parts))
                    };

                    let tool_calls_field = if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    };

                    messages.push(OpenAIMessage {
                        role: "assistant".into(),
                        content,
                        tool_calls: tool_calls_field,
                        tool_call_id: None,
                    });
                }
            }
        }

        let tools: Vec<OpenAITool> = request
            .tools
            .iter()
            .map(|t| OpenAITool {
                tool_type: "function".into(),
                function: OpenAIFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: sanitize_tool_schema(&t.input_schema),
                },
            })
            .collect();

        // Extract provider-specific fields from extra.
        let service_tier = request.extra.get("service_tier").and_then(|v| v.as_str()).map(String::from);
        let reasoning_effort = request.extra.get("reasoning_effort").and_then(|v| v.as_str()).map(String::from);
        let parallel_tool_calls = request.extra.get("parallel_tool_calls").and_then(|v| v.as_bool());

        OpenAIRequest {
            model,
            messages,
            max_tokens,
            temperature: request.temperature,
            tools,
            parallel_tool_calls,
            service_tier,
            reasoning_effort,
            stream: false,
            stream_options: None,
        }
    }

    fn parse_response(&self, response: OpenAIResponse) -> Result<ProviderResponse, ProviderError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".into()))?;

        let mut content: Vec<ContentPart> = Vec::new();

        // Extract text content.
        if let Some(msg_content) = choice.message.content {
            match msg_content {
                OpenAIContent::Text(text) => {
                    if !text.is_empty() {
                        content.push(ContentPart::Text { text });
                    }
                }
                OpenAIContent::Parts(parts) => {
                    for part in parts {
                        match part {
                            OpenAIContentPart::Text { text } => {
                                content.push(ContentPart::Text { text });
                            }
                            OpenAIContentPart::ImageUrl { image_url } => {
                                content.push(ContentPart::Image {
                                    source: ImageSource::Url {
                                        url: image_url.url,
                                    },
                                    media_type: "image/png".into(),
                                });
                            }
                            // The model never emits a file part in a
                            // response; present only for exhaustiveness.
                            OpenAIContentPart::File { file } => {
                                content.push(ContentPart::File {
                                    source: MediaSource {
                                        base64: None,
                                        url: None,
                                        mime_type: None,
                                        file_id: Some(file.file_id),
                                    },
                                    filename: None,
                                });
                            }
                        }
                    }
                }
            }
        }

        // Extract tool calls.
        if let Some(tool_calls) = choice.message.tool_calls {
            for tc in tool_calls {
                let input: serde_json::Value =
                    serde_json::from_str(&tc.function.arguments).unwrap_or_default();
                content.push(ContentPart::ToolUse {
                    id: tc.id,
                    name: tc.function.name,
                    input,
                });
            }
        }

        let stop_reason = match choice.finish_reason.as_str() {
            "stop" => StopReason::EndTurn,
            "tool_calls" => StopReason::ToolUse,
            "length" => StopReason::MaxTokens,
            "content_filter" => StopReason::ContentFilter,
            _ => StopReason::EndTurn,
        };

        let usage = TokenUsage {
            input_tokens: response.usage.prompt_tokens,
            output_tokens: response.usage.completion_tokens,
            cache_read_tokens: response
                .usage
                .prompt_tokens_details
                .and_then(|d| d.cached_tokens),
            cache_creation_tokens: None,
        };

        // Cost calculation for gpt-4o-mini: $0.15/MTok input, $0.60/MTok output
        // $0.15 per 1M tokens = $0.00000015 per token = 15e-8
        // $0.60 per 1M tokens = $0.0000006 per token = 60e-8
        let input_cost = Decimal::from(response.usage.prompt_tokens) * Decimal::new(15, 8);
        let output_cost = Decimal::from(response.usage.completion_tokens) * Decimal::new(60, 8);
        let cost = input_cost + output_cost;

        Ok(ProviderResponse {
            content,
            stop_reason,
            usage,
            model: response.model,
            cost: Some(cost),
            truncated: None,
        })
    }
}

impl Provider for OpenAIProvider {
    fn complete(
        &self,
        request: ProviderRequest,
    ) -> impl std::future::Future<Output = Result<ProviderResponse, ProviderError>> + Send {
        let api_request = self.build_request(&request);
        let mut http_request = self
            .client
            .post(&self.api_url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json");

        if let Some(ref org_id) = self.org_id {
            http_request = http_request.header("openai-organization", org_id);
        }

        let http_request = http_request.json(&api_request);

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

            let api_response: OpenAIResponse = http_response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

            self.parse_response(api_response)
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
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);
        let mut http_request = self
            .client
            .post(&self.files_url)
            .header("authorization", format!("Bearer {}", self.api_key));
        if let Some(ref org_id) = self.org_id {
            http_request = http_request.header("openai-organization", org_id);
        }
        let http_request = http_request.multipart(form);

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

            let file: OpenAIFileResponse = http_response
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
        api_request.stream_options = Some(OpenAIStreamOptions { include_usage: true });

        let mut http_request = self
            .client
            .post(&self.api_url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json");

        if let Some(ref org_id) = self.org_id {
            http_request = http_request.header("openai-organization", org_id);
        }

        let http_request = http_request.json(&api_request);

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

fn extract_text(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn parts_to_openai_content(parts: &[ContentPart]) -> OpenAIContent {
    if parts.len() == 1 {
        if let ContentPart::Text { text } = &parts[0] {
            return OpenAIContent::Text(text.clone());
        }
    }
    OpenAIContent::Parts(parts.iter().filter_map(content_part_to_openai_part).collect())
}

fn content_part_to_openai_part(part: &ContentPart) -> Option<OpenAIContentPart> {
    match part {
        ContentPart::Text { text } => Some(OpenAIContentPart::Text { text: text.clone() }),
        ContentPart::Image { source, .. } => {
            let url = match source {
                ImageSource::Url { url } => url.clone(),
                ImageSource::Base64 { data } => format!("data:image/png;base64,{data}"),
            };
            Some(OpenAIContentPart::ImageUrl {
                image_url: OpenAIImageUrl { url },
            })
        }
        // Chat Completions has no `reasoning` content part; fold it into
        // text the same way the resume preparer does for this vendor.
        ContentPart::Reasoning { reasoning, .. } => Some(OpenAIContentPart::Text {
            text: format!("<think>{reasoning}</think>"),
        }),
        // No wire representation for audio/video/file content in Chat
        // Completions messages. Keep a visible trace instead of silently
        // dropping the block.
        ContentPart::Audio { .. } => Some(OpenAIContentPart::Text {
            text: "[audio unsupported]".into(),
        }),
        ContentPart::Video { .. } => Some(OpenAIContentPart::Text {
            text: "[video unsupported]".into(),
        }),
        // Files routed through the upload cache carry a file_id and can be
        // referenced directly; anything else has no wire representation.
        ContentPart::File { source, filename } => match &source.file_id {
            Some(file_id) => Some(OpenAIContentPart::File {
                file: OpenAIFileRef {
                    file_id: file_id.clone(),
                },
            }),
            None => Some(OpenAIContentPart::Text {
                text: match filename {
                    Some(name) => format!("[file unsupported: {name}]"),
                    None => "[file unsupported]".into(),
                },
            }),
        },
        // ToolUse and ToolResult are handled separately, not as content parts.
        ContentPart::ToolUse { .. } | ContentPart::ToolResult { .. } => None,
    }
}
