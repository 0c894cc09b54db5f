//! NDJSON streaming support for the Ollama Chat API.
//!
//! Ollama emits one JSON object per line instead of SSE:
//! ```text
//! {"model":"llama3.2","message":{"role":"assistant","content":"Hello"},"done":false}
//! {"model":"llama3.2","message":{"role":"assistant","content":""},"done":true,"eval_count":10,"prompt_eval_count":20}
//! ```
//! This parses that line protocol and maps it onto the same normalized
//! [`StreamChunk`] sequence every provider adapter produces, synthesizing
//! block indices since Ollama's wire format carries none.
//!
//! Reference: <https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-chat-completion>

use futures_util::{Stream, StreamExt};
use neuron_turn::provider::ProviderError;
use neuron_turn::{ContentBlock, ContentDelta, StreamChunk, StreamUsage};
use reqwest::Response;
use uuid::Uuid;

const TEXT_INDEX: usize = 0;

pub(crate) fn stream_chunks(
    response: Response,
) -> impl Stream<Item = Result<StreamChunk, ProviderError>> + Send + 'static {
    parse_ndjson_stream(response.bytes_stream())
}

fn parse_ndjson_stream(
    byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = Result<StreamChunk, ProviderError>> + Send + 'static {
    async_stream::stream! {
        let mut state = NdjsonParserState::new();
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

                if line.trim().is_empty() {
                    continue;
                }

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

/// Tracks in-progress streaming state across NDJSON lines.
struct NdjsonParserState {
    text_started: bool,
    next_index: usize,
}

impl NdjsonParserState {
    fn new() -> Self {
        Self {
            text_started: false,
            next_index: TEXT_INDEX + 1,
        }
    }

    fn process_line(&mut self, line: &str) -> Vec<Result<StreamChunk, ProviderError>> {
        let json: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                return vec![Err(ProviderError::InvalidResponse(format!(
                    "JSON parse error in NDJSON: {e}"
                )))];
            }
        };

        let done = json["done"].as_bool().unwrap_or(false);
        let mut events = Vec::new();

        let content = json["message"]["content"].as_str().unwrap_or_default();
        if !content.is_empty() {
            if !self.text_started {
                self.text_started = true;
                events.push(Ok(StreamChunk::ContentBlockStart {
                    index: TEXT_INDEX,
                    content_block: ContentBlock::Text { text: String::new() },
                }));
            }
            events.push(Ok(StreamChunk::ContentBlockDelta {
                index: TEXT_INDEX,
                delta: ContentDelta::TextDelta { text: content.to_string() },
            }));
        }

        if let Some(tool_calls) = json["message"]["tool_calls"].as_array() {
            for tc in tool_calls {
                let function = &tc["function"];
                let name = function["name"].as_str().unwrap_or_default().to_string();
                let arguments = function["arguments"].clone();
                let id = format!("ollama_{}", Uuid::new_v4());
                let index = self.next_index;
                self.next_index += 1;

                events.push(Ok(StreamChunk::ContentBlockStart {
                    index,
                    content_block: ContentBlock::ToolUse {
                        id,
                        name,
                        input: serde_json::json!({}),
                        meta: None,
                    },
                }));
                events.push(Ok(StreamChunk::ContentBlockDelta {
                    index,
                    delta: ContentDelta::InputJsonDelta {
                        partial_json: arguments.to_string(),
                    },
                }));
                events.push(Ok(StreamChunk::ContentBlockStop { index }));
            }
        }

        if done {
            if self.text_started {
                events.push(Ok(StreamChunk::ContentBlockStop { index: TEXT_INDEX }));
            }
            let usage = StreamUsage {
                input_tokens: json["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
                output_tokens: json["eval_count"].as_u64().unwrap_or(0) as u32,
            };
            events.push(Ok(StreamChunk::MessageDelta { usage: Some(usage) }));
            events.push(Ok(StreamChunk::MessageStop));
        }

        events
    }
}
