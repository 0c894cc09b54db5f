#![deny(missing_docs)]
//! Safe-fork-point (SFP) analysis and per-provider resume preparation.
//!
//! A conversation history can only be safely branched or resumed at
//! message indices where the tool_use/tool_result invariant holds —
//! branching mid-tool-call would hand a provider a dangling tool_use
//! with no matching result, and every provider rejects that. This
//! crate finds those indices and, separately, rewrites reasoning
//! blocks the way each provider's history rules demand before resend.

use neuron_turn::types::{ContentPart, ProviderMessage, Role};
use std::collections::HashSet;
use thiserror::Error;

/// Errors from fork analysis.
#[non_exhaustive]
#[derive(Debug, Error, PartialEq)]
pub enum SfpError {
    /// `fork` was asked to branch at an index that isn't SAFE.
    #[error("message index {0} is not a safe fork point")]
    UnsafeForkPoint(usize),
    /// `fork` was asked to branch at an out-of-range index.
    #[error("message index {0} is out of range (len {1})")]
    IndexOutOfRange(usize, usize),
}

/// Whether `messages[i]` is safe to fork/resume at.
///
/// SAFE iff one of:
/// - the message is a `system` message, or
/// - the message is a `user` message and, if the preceding message is
///   `assistant`, every `tool_use` id in it has a matching `tool_result`
///   id in this message, or
/// - the message is an `assistant` message containing no `tool_use` blocks.
pub fn is_safe(messages: &[ProviderMessage], i: usize) -> bool {
    let Some(msg) = messages.get(i) else {
        return false;
    };
    match msg.role {
        Role::System => true,
        Role::User => match messages.get(i.wrapping_sub(1)) {
            Some(prev) if prev.role == Role::Assistant && i > 0 => {
                let pending: HashSet<&str> = prev
                    .content
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::ToolUse { id, .. } => Some(id.as_str()),
                        _ => None,
                    })
                    .collect();
                let satisfied: HashSet<&str> = msg
                    .content
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                        _ => None,
                    })
                    .collect();
                pending.is_subset(&satisfied)
            }
            _ => true,
        },
        Role::Assistant => !msg
            .content
            .iter()
            .any(|p| matches!(p, ContentPart::ToolUse { .. })),
    }
}

/// Classify every message index, in order.
pub fn find_safe_fork_points(messages: &[ProviderMessage]) -> Vec<bool> {
    (0..messages.len()).map(|i| is_safe(messages, i)).collect()
}

/// The highest SAFE index, or `None` if no index is safe (including the
/// empty-history case).
pub fn last_safe_fork_point(messages: &[ProviderMessage]) -> Option<usize> {
    (0..messages.len()).rev().find(|&i| is_safe(messages, i))
}

/// Branch history at index `i`, returning `messages[0..=i]`.
///
/// Fails if `i` is out of range or not SAFE.
pub fn fork(messages: &[ProviderMessage], i: usize) -> Result<Vec<ProviderMessage>, SfpError> {
    if i >= messages.len() {
        return Err(SfpError::IndexOutOfRange(i, messages.len()));
    }
    if !is_safe(messages, i) {
        return Err(SfpError::UnsafeForkPoint(i));
    }
    Ok(messages[..=i].to_vec())
}

/// A problem the analyzer found while validating history for resume.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    /// Index of the offending message.
    pub index: usize,
    /// Human-readable description.
    pub message: String,
}

/// Output of validating a history for resume-readiness.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    /// Whether the history is resume-safe as-is.
    pub valid: bool,
    /// Hard problems: pending tool calls, broken invariants.
    pub errors: Vec<ValidationIssue>,
    /// Soft problems: missing signatures that a resume preparer can
    /// still recover from by dropping the block.
    pub warnings: Vec<ValidationIssue>,
}

/// Validate a history, surfacing pending tool calls and missing
/// reasoning signatures without mutating anything.
pub fn validate(messages: &[ProviderMessage]) -> ValidationResult {
    let mut result = ValidationResult {
        valid: true,
        ..Default::default()
    };

    if let Some(last) = messages.last() {
        if last.role == Role::Assistant {
            let pending: Vec<&str> = last
                .content
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect();
            for id in pending {
                result.valid = false;
                result.errors.push(ValidationIssue {
                    index: messages.len() - 1,
                    message: format!("tool_use {id} has no matching tool_result"),
                });
            }
        }
    }

    for (i, msg) in messages.iter().enumerate() {
        if msg.role != Role::Assistant {
            continue;
        }
        for part in &msg.content {
            if let ContentPart::Reasoning { meta, .. } = part {
                let has_signature = meta
                    .as_ref()
                    .is_some_and(|m| m.signature.is_some() || m.thought_signature.is_some());
                if !has_signature {
                    result.warnings.push(ValidationIssue {
                        index: i,
                        message: "reasoning block has no signature".into(),
                    });
                }
            }
        }
    }

    result
}

/// Providers with distinct history-rewrite rules for resume.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Anthropic Messages API.
    Anthropic,
    /// DeepSeek's chat API.
    DeepSeek,
    /// Alibaba's Qwen API.
    Qwen,
    /// OpenAI Chat Completions.
    OpenAiChat,
    /// OpenAI Responses API.
    OpenAiResponses,
    /// Google Gemini.
    Gemini,
    /// Any provider without a dedicated rule.
    Default,
}

/// Rewrite `messages` per `provider`'s resume rules, applied to
/// reasoning blocks in assistant messages before resend.
///
/// This never touches tool_use/tool_result content — only whether a
/// reasoning block survives, and in what shape.
pub fn prepare_for_resume(messages: &[ProviderMessage], provider: ProviderKind) -> Vec<ProviderMessage> {
    messages
        .iter()
        .map(|msg| {
            if msg.role != Role::Assistant {
                return msg.clone();
            }
            let content = msg
                .content
                .iter()
                .filter_map(|part| rewrite_reasoning_part(part, provider))
                .collect();
            ProviderMessage {
                role: msg.role.clone(),
                content,
            }
        })
        .collect()
}

fn rewrite_reasoning_part(part: &ContentPart, provider: ProviderKind) -> Option<ContentPart> {
    let ContentPart::Reasoning { reasoning, meta } = part else {
        return Some(part.clone());
    };
    match provider {
        ProviderKind::Anthropic => {
            if meta.as_ref().is_some_and(|m| m.signature.is_some()) {
                Some(part.clone())
            } else {
                None
            }
        }
        ProviderKind::DeepSeek | ProviderKind::Qwen => None,
        ProviderKind::OpenAiChat => Some(ContentPart::Text {
            text: format!("<think>{reasoning}</think>"),
        }),
        ProviderKind::OpenAiResponses => Some(part.clone()),
        ProviderKind::Gemini => {
            if meta.as_ref().is_some_and(|m| m.thought_signature.is_some()) {
                Some(part.clone())
            } else {
                None
            }
        }
        ProviderKind::Default => None,
    }
}
