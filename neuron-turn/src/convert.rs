//! Bidirectional conversion between layer0 types and internal types.

use crate::types::{
    ContentPart, ImageSource, MediaSource as InternalMediaSource, ProviderMessage,
    ReasoningMeta as InternalReasoningMeta, Role,
};
use layer0::content::{Content, ContentBlock, MediaSource, Message, ReasoningMeta};
use layer0::content::Role as Layer0Role;

/// Convert a layer0 `ContentBlock` to an internal `ContentPart`.
pub fn content_block_to_part(block: &ContentBlock) -> ContentPart {
    match block {
        ContentBlock::Text { text } => ContentPart::Text { text: text.clone() },
        ContentBlock::Reasoning { reasoning, meta } => ContentPart::Reasoning {
            reasoning: reasoning.clone(),
            meta: meta.as_ref().map(reasoning_meta_to_internal),
        },
        ContentBlock::Image { source } => ContentPart::Image {
            source: media_source_to_image_source(source),
            media_type: source.mime_type.clone().unwrap_or_default(),
        },
        ContentBlock::Audio { source } => ContentPart::Audio {
            source: media_source_to_internal(source),
        },
        ContentBlock::Video { source } => ContentPart::Video {
            source: media_source_to_internal(source),
        },
        ContentBlock::File { source, filename } => ContentPart::File {
            source: media_source_to_internal(source),
            filename: filename.clone(),
        },
        ContentBlock::ToolUse { id, name, input, .. } => ContentPart::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentPart::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: is_error.unwrap_or(false),
        },
        // Handle non_exhaustive future variants: degrade to a sentinel
        // rather than fail the conversion outright.
        #[allow(unreachable_patterns)]
        _ => ContentPart::Text {
            text: "[unknown content block]".into(),
        },
    }
}

/// Convert an internal `ContentPart` to a layer0 `ContentBlock`.
pub fn content_part_to_block(part: &ContentPart) -> ContentBlock {
    match part {
        ContentPart::Text { text } => ContentBlock::Text { text: text.clone() },
        ContentPart::Reasoning { reasoning, meta } => ContentBlock::Reasoning {
            reasoning: reasoning.clone(),
            meta: meta.as_ref().map(reasoning_meta_to_layer0),
        },
        ContentPart::Image { source, media_type } => ContentBlock::Image {
            source: image_source_to_media_source(source, media_type),
        },
        ContentPart::Audio { source } => ContentBlock::Audio {
            source: media_source_to_layer0(source),
        },
        ContentPart::Video { source } => ContentBlock::Video {
            source: media_source_to_layer0(source),
        },
        ContentPart::File { source, filename } => ContentBlock::File {
            source: media_source_to_layer0(source),
            filename: filename.clone(),
        },
        ContentPart::ToolUse { id, name, input } => ContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
            meta: None,
        },
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: Some(*is_error),
        },
    }
}

/// Convert layer0 `Content` to a list of internal `ContentPart`s.
pub fn content_to_parts(content: &Content) -> Vec<ContentPart> {
    match content {
        Content::Text(text) => vec![ContentPart::Text { text: text.clone() }],
        Content::Blocks(blocks) => blocks.iter().map(content_block_to_part).collect(),
        // Handle non_exhaustive
        #[allow(unreachable_patterns)]
        _ => vec![ContentPart::Text {
            text: "[unknown content]".into(),
        }],
    }
}

/// Convert internal `ContentPart`s to a layer0 `Content`.
pub fn parts_to_content(parts: &[ContentPart]) -> Content {
    if parts.len() == 1 {
        if let ContentPart::Text { text } = &parts[0] {
            return Content::Text(text.clone());
        }
    }
    Content::Blocks(parts.iter().map(content_part_to_block).collect())
}

/// Convert layer0 `Content` to an internal `ProviderMessage` with User role.
pub fn content_to_user_message(content: &Content) -> ProviderMessage {
    ProviderMessage {
        role: Role::User,
        content: content_to_parts(content),
    }
}

/// Convert a persisted `layer0::content::Message` to a `ProviderMessage`.
/// Drops the degradation side-channel (`metadata`) — a provider request
/// only ever needs the current content blocks.
pub fn message_to_provider_message(message: &Message) -> ProviderMessage {
    ProviderMessage {
        role: role_to_internal(message.role),
        content: message.content.iter().map(content_block_to_part).collect(),
    }
}

/// Convert a `ProviderMessage` back to a `layer0::content::Message` for
/// persistence.
pub fn provider_message_to_message(message: &ProviderMessage) -> Message {
    Message::new(
        role_to_layer0(message.role),
        message.content.iter().map(content_part_to_block).collect(),
    )
}

fn role_to_internal(role: Layer0Role) -> Role {
    match role {
        Layer0Role::User => Role::User,
        Layer0Role::Assistant => Role::Assistant,
        Layer0Role::System => Role::System,
    }
}

fn role_to_layer0(role: Role) -> Layer0Role {
    match role {
        Role::User => Layer0Role::User,
        Role::Assistant => Layer0Role::Assistant,
        Role::System => Layer0Role::System,
    }
}

fn media_source_to_image_source(source: &MediaSource) -> ImageSource {
    if let Some(data) = &source.base64 {
        ImageSource::Base64 { data: data.clone() }
    } else {
        ImageSource::Url {
            url: source.url.clone().unwrap_or_default(),
        }
    }
}

fn image_source_to_media_source(source: &ImageSource, media_type: &str) -> MediaSource {
    let mut media = MediaSource {
        mime_type: Some(media_type.to_string()),
        ..Default::default()
    };
    match source {
        ImageSource::Base64 { data } => media.base64 = Some(data.clone()),
        ImageSource::Url { url } => media.url = Some(url.clone()),
    }
    media
}

fn media_source_to_internal(source: &MediaSource) -> InternalMediaSource {
    InternalMediaSource {
        base64: source.base64.clone(),
        url: source.url.clone(),
        mime_type: source.mime_type.clone(),
        file_id: source.file_id.clone(),
    }
}

fn media_source_to_layer0(source: &InternalMediaSource) -> MediaSource {
    MediaSource {
        base64: source.base64.clone(),
        url: source.url.clone(),
        mime_type: source.mime_type.clone(),
        file_id: source.file_id.clone(),
    }
}

fn reasoning_meta_to_internal(meta: &ReasoningMeta) -> InternalReasoningMeta {
    InternalReasoningMeta {
        signature: meta.signature.clone(),
        thought_signature: meta.thought_signature.clone(),
    }
}

fn reasoning_meta_to_layer0(meta: &InternalReasoningMeta) -> ReasoningMeta {
    ReasoningMeta {
        signature: meta.signature.clone(),
        thought_signature: meta.thought_signature.clone(),
        extra: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_roundtrip() {
        let block = ContentBlock::Text {
            text: "hello".into(),
        };
        let part = content_block_to_part(&block);
        let back = content_part_to_block(&part);
        assert_eq!(block, back);
    }

    #[test]
    fn tool_use_roundtrip() {
        let block = ContentBlock::ToolUse {
            id: "tu_1".into(),
            name: "bash".into(),
            input: json!({"cmd": "ls"}),
            meta: None,
        };
        let part = content_block_to_part(&block);
        let back = content_part_to_block(&part);
        assert_eq!(block, back);
    }

    #[test]
    fn tool_result_roundtrip() {
        let block = ContentBlock::ToolResult {
            tool_use_id: "tu_1".into(),
            content: "output".into(),
            is_error: Some(false),
        };
        let part = content_block_to_part(&block);
        let back = content_part_to_block(&part);
        assert_eq!(block, back);
    }

    #[test]
    fn tool_result_missing_is_error_becomes_false() {
        let block = ContentBlock::ToolResult {
            tool_use_id: "tu_1".into(),
            content: "output".into(),
            is_error: None,
        };
        let part = content_block_to_part(&block);
        assert!(matches!(part, ContentPart::ToolResult { is_error: false, .. }));
    }

    #[test]
    fn image_roundtrip() {
        let block = ContentBlock::Image {
            source: MediaSource {
                url: Some("https://example.com/img.png".into()),
                mime_type: Some("image/png".into()),
                ..Default::default()
            },
        };
        let part = content_block_to_part(&block);
        let back = content_part_to_block(&part);
        assert_eq!(block, back);
    }

    #[test]
    fn reasoning_roundtrip_preserves_signature() {
        let block = ContentBlock::Reasoning {
            reasoning: "let me think".into(),
            meta: Some(ReasoningMeta {
                signature: Some("sig".into()),
                ..Default::default()
            }),
        };
        let part = content_block_to_part(&block);
        let back = content_part_to_block(&part);
        assert_eq!(block, back);
    }

    #[test]
    fn file_roundtrip() {
        let block = ContentBlock::File {
            source: MediaSource {
                file_id: Some("file_abc".into()),
                ..Default::default()
            },
            filename: Some("report.pdf".into()),
        };
        let part = content_block_to_part(&block);
        let back = content_part_to_block(&part);
        assert_eq!(block, back);
    }

    #[test]
    fn content_text_to_parts() {
        let content = Content::text("hello");
        let parts = content_to_parts(&content);
        assert_eq!(parts.len(), 1);
        assert_eq!(
            parts[0],
            ContentPart::Text {
                text: "hello".into()
            }
        );
    }

    #[test]
    fn parts_to_content_single_text() {
        let parts = vec![ContentPart::Text {
            text: "hello".into(),
        }];
        let content = parts_to_content(&parts);
        assert_eq!(content, Content::text("hello"));
    }

    #[test]
    fn parts_to_content_multiple_blocks() {
        let parts = vec![
            ContentPart::Text {
                text: "hello".into(),
            },
            ContentPart::Text {
                text: "world".into(),
            },
        ];
        let content = parts_to_content(&parts);
        match content {
            Content::Blocks(blocks) => assert_eq!(blocks.len(), 2),
            _ => panic!("expected Blocks"),
        }
    }

    #[test]
    fn content_to_user_message_builds_correctly() {
        let content = Content::text("hi");
        let msg = content_to_user_message(&content);
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content.len(), 1);
    }

    #[test]
    fn message_roundtrips_through_provider_message() {
        let message = Message::new(
            layer0::content::Role::Assistant,
            vec![ContentBlock::Text {
                text: "hello".into(),
            }],
        );
        let provider = message_to_provider_message(&message);
        assert_eq!(provider.role, Role::Assistant);
        let back = provider_message_to_message(&provider);
        assert_eq!(back.role, message.role);
        assert_eq!(back.content, message.content);
    }

    #[test]
    fn system_role_roundtrips() {
        let message = Message::new(layer0::content::Role::System, vec![]);
        let provider = message_to_provider_message(&message);
        assert_eq!(provider.role, Role::System);
        let back = provider_message_to_message(&provider);
        assert_eq!(back.role, layer0::content::Role::System);
    }
}
