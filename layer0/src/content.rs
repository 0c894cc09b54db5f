//! Universal content types that cross every protocol boundary.

use serde::{Deserialize, Serialize};

/// The universal content type. Crosses every boundary.
/// Intentionally simple — complex structured content uses
/// ContentBlock variants, not nested Content.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Content {
    /// Plain text content.
    Text(String),
    /// Structured content blocks.
    Blocks(Vec<ContentBlock>),
}

/// Common shape for binary-ish media blocks (image/audio/video/file).
/// All fields are optional because a block may carry inline bytes,
/// a remote URL, or a provider-assigned file handle — never all three.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaSource {
    /// Base64-encoded inline bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    /// A URL the provider can fetch directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// The MIME type of the media.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// A provider-assigned file identifier (from the file upload cache).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

/// Metadata carried on a `reasoning` block. Providers that sign their
/// reasoning traces (Anthropic thinking signatures, Gemini
/// `thoughtSignature`) round-trip the signature here so the resume
/// preparer can decide whether the block survives history rewriting.
///
/// Unknown keys are preserved in `extra` and must be passed through
/// unread — consumers ignore meta keys they don't recognize.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReasoningMeta {
    /// Anthropic-style thinking signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Gemini-style thought signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
    /// Any other provider-specific keys, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A single block of structured content.
///
/// This is an exhaustive tagged union by design — text, reasoning, the
/// three media kinds, file, tool_use, and tool_result are the complete
/// set of block kinds this core understands. `#[non_exhaustive]` is
/// kept so that adding a new kind in a later minor version doesn't
/// break downstream `match` arms; callers should always carry a
/// catch-all arm that degrades gracefully (see
/// [`Message::mark_degraded`]).
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    /// Plain text block.
    #[serde(rename = "text")]
    Text {
        /// The text content.
        text: String,
    },

    /// A model's internal reasoning/thinking trace.
    #[serde(rename = "reasoning")]
    Reasoning {
        /// The reasoning text.
        reasoning: String,
        /// Provider-specific signature metadata, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<ReasoningMeta>,
    },

    /// Image content block.
    #[serde(rename = "image")]
    Image {
        /// Where the image bytes live.
        #[serde(flatten)]
        source: MediaSource,
    },

    /// Audio content block.
    #[serde(rename = "audio")]
    Audio {
        /// Where the audio bytes live.
        #[serde(flatten)]
        source: MediaSource,
    },

    /// Video content block.
    #[serde(rename = "video")]
    Video {
        /// Where the video bytes live.
        #[serde(flatten)]
        source: MediaSource,
    },

    /// Generic file content block (documents, archives, anything that
    /// isn't image/audio/video).
    #[serde(rename = "file")]
    File {
        /// Where the file bytes live.
        #[serde(flatten)]
        source: MediaSource,
        /// Original filename, if known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },

    /// A tool use request from the model.
    #[serde(rename = "tool_use")]
    ToolUse {
        /// Unique identifier for this tool use.
        id: String,
        /// Name of the tool to invoke.
        name: String,
        /// Tool input parameters.
        input: serde_json::Value,
        /// Provider-specific extras (e.g. parallel-call grouping hints).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meta: Option<serde_json::Value>,
    },

    /// Result from a tool execution.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// The tool_use id this result corresponds to.
        tool_use_id: String,
        /// The result content.
        content: String,
        /// Whether the tool execution errored. Absent means "no, unless
        /// the caller knows otherwise" — callers that care should treat
        /// `None` the same as `Some(false)`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl ContentBlock {
    /// Whether this block errored, treating an absent `is_error` as `false`.
    pub fn is_error(&self) -> bool {
        matches!(self, ContentBlock::ToolResult { is_error: Some(true), .. })
    }
}

/// Source for image content.
///
/// Retained for backward-compatible construction of the pre-union
/// `image` shape; new code should build [`MediaSource`] directly.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Base64-encoded image data.
    Base64 {
        /// The base64-encoded image data.
        data: String,
    },
    /// URL pointing to an image.
    Url {
        /// The URL of the image.
        url: String,
    },
}

impl From<ImageSource> for MediaSource {
    fn from(src: ImageSource) -> Self {
        match src {
            ImageSource::Base64 { data } => MediaSource {
                base64: Some(data),
                ..Default::default()
            },
            ImageSource::Url { url } => MediaSource {
                url: Some(url),
                ..Default::default()
            },
        }
    }
}

impl Content {
    /// Create a text content value.
    pub fn text(s: impl Into<String>) -> Self {
        Content::Text(s.into())
    }

    /// Extract plain text content, ignoring non-text blocks.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s),
            Content::Blocks(blocks) => {
                // Return first text block's content
                blocks.iter().find_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
            }
        }
    }
}

/// Who authored a [`Message`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human (or calling system) driving the conversation.
    User,
    /// The model.
    Assistant,
    /// System/instruction content.
    System,
}

/// How a message's canonical `content` relates to its original blocks,
/// once degradation has happened for a provider that can't express them.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// The original blocks were flattened into text.
    Text,
    /// The original blocks were dropped entirely.
    Omit,
    /// The provider natively carries the original blocks; no degradation.
    Provider,
}

/// Side-channel metadata on a [`Message`]. When `content_blocks` is
/// present it is the authoritative representation — see
/// [`Message::get_blocks`].
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// The original blocks, preserved across degradation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_blocks: Option<Vec<ContentBlock>>,
    /// What happened to `content` relative to `content_blocks`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,
}

/// A single entry in a conversation history: a role, an ordered
/// sequence of content blocks, and optional degradation metadata.
///
/// Messages are append-only within a session; the only mutation
/// permitted is a hook rewriting the in-flight assistant reply before
/// it's appended (see the hook interface).
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored this message.
    pub role: Role,
    /// The ordered content blocks.
    pub content: Vec<ContentBlock>,
    /// Degradation side-channel, if this message has been rewritten
    /// for a provider that can't express its original blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    /// Construct a message with no metadata.
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content,
            metadata: None,
        }
    }

    /// A user message carrying a single text block.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::Text { text: text.into() }])
    }

    /// The authoritative blocks for this message: `metadata.content_blocks`
    /// if present, else `content`.
    pub fn get_blocks(&self) -> &[ContentBlock] {
        match &self.metadata {
            Some(MessageMetadata {
                content_blocks: Some(blocks),
                ..
            }) => blocks,
            _ => &self.content,
        }
    }

    /// Stamp this message as degraded: preserve `original` in
    /// `metadata.content_blocks` and mark `transport = text`.
    ///
    /// Idempotent, and never overwrites an existing `Omit` marker —
    /// once a message has been deliberately dropped for a provider,
    /// a later degradation pass must not silently resurrect it as text.
    pub fn mark_degraded(&mut self, original: Vec<ContentBlock>) {
        if let Some(meta) = &self.metadata {
            if meta.transport == Some(Transport::Omit) {
                return;
            }
            if meta.content_blocks.is_some() {
                return;
            }
        }
        self.metadata = Some(MessageMetadata {
            content_blocks: Some(original),
            transport: Some(Transport::Text),
        });
    }
}
