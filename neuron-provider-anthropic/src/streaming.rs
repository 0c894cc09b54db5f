//! SSE streaming support for the Anthropic Messages API.
//!
//! Parses the Server-Sent Events stream Anthropic sends when `"stream":
//! true` and maps each event onto the normalized [`StreamChunk`]
//! protocol every provider adapter shares.
//!
//! Reference: <https://docs.anthropic.com/en/api/messages-streaming>

use futures_util::{Stream, StreamExt};
use neuron_turn::provider::ProviderError;
use neuron_turn::{ContentBlock, ContentDelta, StreamChunk, StreamUsage};
use reqwest::Response;

/// Turn an HTTP response body into a stream of [`StreamChunk`]s.
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

        if !line_buf.trim().is_empty() {
            for event in state.process_line(line_buf.trim().to_string().as_str()) {
                yield event;
            }
        }
    }
}

/// Tracks in-progress streaming state across SSE events.
struct SseParserState {
    current_event_type: Option<String>,
    current_data: String,
}

impl SseParserState {
    fn new() -> Self {
        Self {
            current_event_type: None,
            current_data: String::new(),
        }
    }

    fn process_line(&mut self, line: &str) -> Vec<Result<StreamChunk, ProviderError>> {
        if line.is_empty() {
            return self.dispatch_event();
        }

        if let Some(event_type) = line.strip_prefix("event: ") {
            self.current_event_type = Some(event_type.trim().to_string());
        } else if let Some(data) = line.strip_prefix("data: ") {
            if !self.current_data.is_empty() {
                self.current_data.push('\n');
            }
            self.current_data.push_str(data.trim());
        }

        vec![]
    }

    fn dispatch_event(&mut self) -> Vec<Result<StreamChunk, ProviderError>> {
        let event_type = match self.current_event_type.take() {
            Some(t) => t,
            None => {
                self.current_data.clear();
                return vec![];
            }
        };
        let data = std::mem::take(&mut self.current_data);

        if data == "[DONE]" || data.is_empty() {
            return vec![];
        }

        let json: serde_json::Value = match serde_json::from_str(&data) {
            Ok(v) => v,
            Err(e) => {
                return vec![Err(ProviderError::InvalidResponse(format!(
                    "JSON parse error in SSE: {e}"
                )))];
            }
        };

        match event_type.as_str() {
            "content_block_start" => vec![Ok(handle_content_block_start(&json))],
            "content_block_delta" => handle_content_block_delta(&json)
                .into_iter()
                .map(Ok)
                .collect(),
            "content_block_stop" => vec![Ok(handle_content_block_stop(&json))],
            "message_delta" => vec![Ok(handle_message_delta(&json))],
            "message_stop" => vec![Ok(StreamChunk::MessageStop)],
            "message_start" | "ping" => vec![],
            "error" => {
                let msg = json["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown streaming error")
                    .to_string();
                vec![Err(ProviderError::Other(msg.into()))]
            }
            _ => vec![],
        }
    }
}

fn handle_content_block_start(json: &serde_json::Value) -> StreamChunk {
    let index = json["index"].as_u64().unwrap_or(0) as usize;
    let block = &json["content_block"];
    let block_type = block["type"].as_str().unwrap_or("");

    let content_block = match block_type {
        "thinking" => ContentBlock::Reasoning {
            reasoning: block["thinking"].as_str().unwrap_or("").to_string(),
            meta: None,
        },
        "tool_use" => ContentBlock::ToolUse {
            id: block["id"].as_str().unwrap_or("").to_string(),
            name: block["name"].as_str().unwrap_or("").to_string(),
            input: serde_json::json!({}),
            meta: None,
        },
        // "text" and anything unrecognized degrade to an empty text block.
        _ => ContentBlock::Text {
            text: block["text"].as_str().unwrap_or("").to_string(),
        },
    };

    StreamChunk::ContentBlockStart { index, content_block }
}

fn handle_content_block_delta(json: &serde_json::Value) -> Vec<StreamChunk> {
    let index = json["index"].as_u64().unwrap_or(0) as usize;
    let delta = &json["delta"];
    let delta_type = delta["type"].as_str().unwrap_or("");

    match delta_type {
        "text_delta" => vec![StreamChunk::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta {
                text: delta["text"].as_str().unwrap_or("").to_string(),
            },
        }],
        "thinking_delta" => vec![StreamChunk::ContentBlockDelta {
            index,
            delta: ContentDelta::ReasoningDelta {
                text: delta["thinking"].as_str().unwrap_or("").to_string(),
            },
        }],
        "signature_delta" => vec![StreamChunk::ContentBlockDelta {
            index,
            delta: ContentDelta::SignatureDelta {
                signature: delta["signature"].as_str().unwrap_or("").to_string(),
            },
        }],
        "input_json_delta" => vec![StreamChunk::ContentBlockDelta {
            index,
            delta: ContentDelta::InputJsonDelta {
                partial_json: delta["partial_json"].as_str().unwrap_or("").to_string(),
            },
        }],
        _ => vec![],
    }
}

fn handle_content_block_stop(json: &serde_json::Value) -> StreamChunk {
    let index = json["index"].as_u64().unwrap_or(0) as usize;
    StreamChunk::ContentBlockStop { index }
}

fn handle_message_delta(json: &serde_json::Value) -> StreamChunk {
    let usage = json.get("usage").map(|usage_val| StreamUsage {
        input_tokens: usage_val["input_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: usage_val["output_tokens"].as_u64().unwrap_or(0) as u32,
    });
    StreamChunk::MessageDelta { usage }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_state() -> SseParserState {
        SseParserState::new()
    }

    fn feed_sse(state: &mut SseParserState, sse: &str) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut events = Vec::new();
        for line in sse.lines() {
            events.extend(state.process_line(line));
        }
        events.extend(state.process_line(""));
        events
    }

    #[test]
    fn text_delta_chunks_emit_in_order() {
        let mut state = make_state();
        let sse = "\
event: content_block_start
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello \"}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"world\"}}

event: content_block_stop
data: {\"type\":\"content_block_stop\",\"index\":0}
";
        let events = feed_sse(&mut state, sse);
        let texts: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                Ok(StreamChunk::ContentBlockDelta {
                    delta: ContentDelta::TextDelta { text },
                    ..
                }) => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["Hello ".to_string(), "world".to_string()]);
        assert!(matches!(events[0], Ok(StreamChunk::ContentBlockStart { index: 0, .. })));
        assert!(matches!(events.last(), Some(Ok(StreamChunk::ContentBlockStop { index: 0 }))));
    }

    #[test]
    fn tool_use_start_carries_id_and_name() {
        let mut state = make_state();
        let sse = "\
event: content_block_start
data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_01\",\"name\":\"search\",\"input\":{}}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"q\\\":\\\"rust\\\"}\"}}

event: content_block_stop
data: {\"type\":\"content_block_stop\",\"index\":1}
";
        let events = feed_sse(&mut state, sse);
        let has_start = events.iter().any(|e| {
            matches!(
                e,
                Ok(StreamChunk::ContentBlockStart {
                    index: 1,
                    content_block: ContentBlock::ToolUse { id, name, .. },
                }) if id == "toolu_01" && name == "search"
            )
        });
        assert!(has_start);
        let has_delta = events.iter().any(|e| {
            matches!(
                e,
                Ok(StreamChunk::ContentBlockDelta {
                    index: 1,
                    delta: ContentDelta::InputJsonDelta { partial_json },
                }) if partial_json.contains("rust")
            )
        });
        assert!(has_delta);
    }

    #[test]
    fn thinking_delta_maps_to_reasoning_delta() {
        let mut state = make_state();
        let sse = "\
event: content_block_start
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"hm\"}}

event: content_block_stop
data: {\"type\":\"content_block_stop\",\"index\":0}
";
        let events = feed_sse(&mut state, sse);
        let has_reasoning = events.iter().any(|e| {
            matches!(
                e,
                Ok(StreamChunk::ContentBlockDelta {
                    delta: ContentDelta::ReasoningDelta { text },
                    ..
                }) if text == "hm"
            )
        });
        assert!(has_reasoning);
    }

    #[test]
    fn signature_delta_is_preserved_not_dropped() {
        let mut state = make_state();
        let sse = "\
event: content_block_start
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"hm\"}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"signature_delta\",\"signature\":\"sig-abc\"}}

event: content_block_stop
data: {\"type\":\"content_block_stop\",\"index\":0}
";
        let events = feed_sse(&mut state, sse);
        let signature = events.iter().find_map(|e| match e {
            Ok(StreamChunk::ContentBlockDelta {
                delta: ContentDelta::SignatureDelta { signature },
                ..
            }) => Some(signature.clone()),
            _ => None,
        });
        assert_eq!(signature.as_deref(), Some("sig-abc"));
    }

    #[test]
    fn message_delta_carries_usage() {
        let mut state = make_state();
        let sse = "\
event: message_delta
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"input_tokens\":100,\"output_tokens\":50}}
";
        let events = feed_sse(&mut state, sse);
        let usage = events.iter().find_map(|e| match e {
            Ok(StreamChunk::MessageDelta { usage: Some(u) }) => Some(*u),
            _ => None,
        });
        assert_eq!(usage, Some(StreamUsage { input_tokens: 100, output_tokens: 50 }));
    }

    #[test]
    fn message_stop_emits_message_stop_chunk() {
        let mut state = make_state();
        let sse = "\
event: message_stop
data: {\"type\":\"message_stop\"}
";
        let events = feed_sse(&mut state, sse);
        assert!(matches!(events.as_slice(), [Ok(StreamChunk::MessageStop)]));
    }

    #[test]
    fn ping_and_message_start_produce_nothing() {
        let mut state = make_state();
        let sse = "\
event: ping
data: {}

event: message_start
data: {\"type\":\"message_start\"}
";
        let events = feed_sse(&mut state, sse);
        assert!(events.is_empty());
    }

    #[test]
    fn error_event_surfaces_provider_error() {
        let mut state = make_state();
        let sse = "\
event: error
data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}
";
        let events = feed_sse(&mut state, sse);
        assert!(matches!(events.as_slice(), [Err(ProviderError::Other(_))]));
    }

    #[test]
    fn invalid_json_produces_invalid_response_error() {
        let mut state = make_state();
        let sse = "\
event: content_block_delta
data: {not valid json}
";
        let events = feed_sse(&mut state, sse);
        assert!(matches!(events.as_slice(), [Err(ProviderError::InvalidResponse(_))]));
    }

    #[test]
    fn done_sentinel_produces_no_events() {
        let mut state = make_state();
        let sse = "\
event: done
data: [DONE]
";
        assert!(feed_sse(&mut state, sse).is_empty());
    }
}
