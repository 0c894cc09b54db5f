//! Normalized streaming protocol shared by every provider adapter.
//!
//! This is the only chunk protocol the step loop consumes — adapters
//! translate whatever wire format a vendor uses (SSE, NDJSON, ...) into
//! this shape before the loop ever sees it.

use crate::content::ContentBlock;

/// A single event in a provider's streamed response.
///
/// `content_block_start` always precedes any `content_block_delta`/
/// `content_block_stop` for the same `index`; `content_block_stop`
/// appears exactly once per started index; `message_stop` is always
/// the last chunk in the sequence.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// A new output block has started at `index`.
    ContentBlockStart {
        /// Stable integer index of this block within the response.
        index: usize,
        /// The block's starting shape (usually empty text/tool name,
        /// filled in by subsequent deltas).
        content_block: ContentBlock,
    },
    /// An incremental update to the block at `index`.
    ContentBlockDelta {
        /// Index of the block this delta applies to.
        index: usize,
        /// The incremental content.
        delta: ContentDelta,
    },
    /// The block at `index` is complete.
    ContentBlockStop {
        /// Index of the completed block.
        index: usize,
    },
    /// Top-level response metadata, usually token usage. May arrive
    /// more than once; the last `usage` seen wins.
    MessageDelta {
        /// Token usage, if the provider reported it in this delta.
        usage: Option<StreamUsage>,
    },
    /// The stream is finished. Always the last chunk.
    MessageStop,
}

/// Incremental content carried by a `content_block_delta` chunk.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum ContentDelta {
    /// A fragment of plain text.
    TextDelta {
        /// The text fragment.
        text: String,
    },
    /// A fragment of reasoning/thinking text.
    ReasoningDelta {
        /// The reasoning fragment.
        text: String,
    },
    /// A fragment of a tool call's JSON input. The adapter buffers
    /// these and guarantees the final fragment before `content_block_stop`
    /// parses as complete JSON — the loop never sees partial JSON.
    InputJsonDelta {
        /// The partial JSON fragment.
        partial_json: String,
    },
    /// The signature Anthropic attaches to a completed thinking block,
    /// delivered as its own delta rather than folded into the thinking
    /// text. Carries the full signature, not a fragment.
    SignatureDelta {
        /// The reasoning block's signature.
        signature: String,
    },
}

/// Token usage reported mid- or end-of-stream via `MessageDelta`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamUsage {
    /// Input tokens consumed by the request.
    pub input_tokens: u32,
    /// Output tokens produced so far.
    pub output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_start_carries_index_and_block() {
        let chunk = StreamChunk::ContentBlockStart {
            index: 0,
            content_block: ContentBlock::Text { text: String::new() },
        };
        assert!(matches!(chunk, StreamChunk::ContentBlockStart { index: 0, .. }));
    }

    #[test]
    fn text_delta_roundtrips_through_pattern_match() {
        let delta = ContentDelta::TextDelta { text: "hi".into() };
        match delta {
            ContentDelta::TextDelta { text } => assert_eq!(text, "hi"),
            _ => panic!("expected TextDelta"),
        }
    }
}
