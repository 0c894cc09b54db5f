//! SSE streaming support for the OpenAI Chat Completions API.
//!
//! OpenAI's streaming format is SSE, one `data:` line per chunk:
//! ```text
//! data: {"choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":null}]}
//! data: {"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}
//! data: [DONE]
//! ```
//! Tool calls arrive incrementally under `delta.tool_calls`, each carrying
//! its own `index` distinguishing concurrent calls; text has none, since
//! a choice only ever has one text stream. This maps both onto the same
//! indexed [`StreamChunk`] sequence every provider adapter produces.
//!
//! Reference: <https://platform.openai.com/docs/api-reference/chat-streaming>

use futures_util::{Stream, StreamExt};
use neuron_turn::provider::ProviderError;
use neuron_turn::{ContentBlock, ContentDelta, StreamChunk, StreamUsage};
use reqwest::Response;
use std::collections::HashMap;

const TEXT_INDEX: usize = 0;

pub(crate) fn stream_chunks(
    response: Response,
) -> impl Stream<Item = Result<StreamChunk, ProviderError>> + Send + 'static {
    parse_sse_stream(response.bytes_stream())
}

fn parse_sse_stream(
    byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = Result<StreamChunk, ProviderError>> + Send + 'static {
    async_stream::stream! {
        let mut state = SseParserState::new();
        let mut bytes_stream = std::pin::pin!(byte_stream);
        let mut line_buf = String::new();

        while let Some(chunk_result) = bytes_stream.next().await {
            let chunk = match chunk_result {
                Ok(b) => b,
                Err(e) => {
                    yield Err(ProviderError::StreamInterrupted(e.to_string()));
                    return;
                }
            };

            let chunk_str = match std::str::from_utf8(&chunk) {
                Ok(s) => s,
                Err(e) => {
                    yield Err(ProviderError::InvalidResponse(format!("UTF-8 decode error: {e}")));
                    return;
                }
            };

            line_buf.push_str(chunk_str);

            while let Some(newline_pos) = line_buf.find('\n') {
                let line = line_buf[..newline_pos].trim_end_matches('\r').to_string();
                line_buf.drain(..=newline_pos);

                for event in state.process_line(&line) {
                    yield event;
                }
            }
        }

        let remaining = line_buf.trim().to_string();
        if !remaining.is_empty() {
            for event in state.process_line(&remaining) {
                yield event;
            }
        }
    }
}

/// Tracks in-progress streaming state across SSE lines.
struct SseParserState {
    text_started: bool,
    /// Maps OpenAI's `delta.tool_calls[].index` to the synthesized
    /// content-block index this adapter assigns it.
    tool_block_indices: HashMap<u64, usize>,
    next_index: usize,
    done: bool,
}

impl SseParserState {
    fn new() -> Self {
        Self {
            text_started: false,
            tool_block_indices: HashMap::new(),
            next_index: TEXT_INDEX + 1,
            done: false,
        }
    }

    fn process_line(&mut self, line: &str) -> Vec<Result<StreamChunk, ProviderError>> {
        let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
            return vec![];
        };
        let data = data.trim();

        if data.is_empty() {
            return vec![];
        }
        if data == "[DONE]" {
            if self.done {
                return vec![];
            }
            self.done = true;
            return self.close_open_blocks();
        }

        let json: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                return vec![Err(ProviderError::InvalidResponse(format!(
                    "JSON parse error in SSE: {e}"
                )))];
            }
        };

        let mut events = Vec::new();

        if let Some(usage_val) = json.get("usage").filter(|v| !v.is_null()) {
            events.push(Ok(StreamChunk::MessageDelta {
                usage: Some(StreamUsage {
                    input_tokens: usage_val["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                    output_tokens: usage_val["completion_tokens"].as_u64().unwrap_or(0) as u32,
                }),
            }));
        }

        let Some(choice) = json["choices"].as_array().and_then(|c| c.first()) else {
            return events;
        };
        let delta = &choice["delta"];

        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                if !self.text_started {
                    self.text_started = true;
                    events.push(Ok(StreamChunk::ContentBlockStart {
                        index: TEXT_INDEX,
                        content_block: ContentBlock::Text { text: String::new() },
                    }));
                }
                events.push(Ok(StreamChunk::ContentBlockDelta {
                    index: TEXT_INDEX,
                    delta: ContentDelta::TextDelta { text: text.to_string() },
                }));
            }
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for tc in tool_calls {
                let call_index = tc["index"].as_u64().unwrap_or(0);
                let function = &tc["function"];

                let block_index = *self.tool_block_indices.entry(call_index).or_insert_with(|| {
                    let idx = self.next_index;
                    self.next_index += 1;
                    idx
                });

                // A tool call's id/name appear only on the first delta for
                // that index; argument fragments stream afterward.
                if let Some(name) = function["name"].as_str() {
                    events.push(Ok(StreamChunk::ContentBlockStart {
                        index: block_index,
                        content_block: ContentBlock::ToolUse {
                            id: tc["id"].as_str().unwrap_or("").to_string(),
                            name: name.to_string(),
                            input: serde_json::json!({}),
                            meta: None,
                        },
                    }));
                }

                if let Some(partial) = function["arguments"].as_str() {
                    if !partial.is_empty() {
                        events.push(Ok(StreamChunk::ContentBlockDelta {
                            index: block_index,
                            delta: ContentDelta::InputJsonDelta {
                                partial_json: partial.to_string(),
                            },
                        }));
                    }
                }
            }
        }

        if choice["finish_reason"].is_string() {
            events.extend(self.close_open_blocks());
        }

        events
    }

    fn close_open_blocks(&mut self) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut events = Vec::new();
        if self.text_started {
            self.text_started = false;
            events.push(Ok(StreamChunk::ContentBlockStop { index: TEXT_INDEX }));
        }
        for index in self.tool_block_indices.values() {
            events.push(Ok(StreamChunk::ContentBlockStop { index: *index }));
        }
        self.tool_block_indices.clear();
        events.push(Ok(StreamChunk::MessageStop));
        events
    }
}
