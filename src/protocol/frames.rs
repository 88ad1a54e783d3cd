use bytes::Bytes;
use serde::Serialize;

use crate::util::{push_json_string_escaped, push_u64_decimal};

/// The literal terminator line, always the last frame of a response.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// One event in the UI message-stream protocol.
///
/// Serialization is `{"type": "<kebab-case tag>", ...camelCase fields}`;
/// the terminator is the literal `[DONE]` line and never serializes as
/// JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum FrameEvent {
    Start {
        message_id: String,
    },
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
    },
    ToolInputDelta {
        tool_call_id: String,
        input_text_delta: String,
    },
    Finish {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_metadata: Option<FinishMetadata>,
    },
    Error {
        error_text: String,
    },
    /// The `[DONE]` terminator.
    Done,
}

/// `messageMetadata` payload of a `finish` frame. Unset fields are
/// omitted, never sent as nulls.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<FinishUsage>,
}

/// Token usage reported on the `finish` frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// Encode one frame as an SSE `data:` line pair.
///
/// Pure and deterministic: encoding the same event twice yields
/// byte-identical output. The JSON is built by hand to keep the per-delta
/// hot path allocation-light; a test pins it against the serde derive.
#[must_use]
pub fn encode_frame(event: &FrameEvent) -> Bytes {
    let mut out = String::with_capacity(48 + payload_hint(event));
    out.push_str("data: ");
    match event {
        FrameEvent::Start { message_id } => {
            out.push_str("{\"type\":\"start\",\"messageId\":");
            push_json_string_escaped(&mut out, message_id);
            out.push('}');
        }
        FrameEvent::TextStart { id } => {
            out.push_str("{\"type\":\"text-start\",\"id\":");
            push_json_string_escaped(&mut out, id);
            out.push('}');
        }
        FrameEvent::TextDelta { id, delta } => {
            out.push_str("{\"type\":\"text-delta\",\"id\":");
            push_json_string_escaped(&mut out, id);
            out.push_str(",\"delta\":");
            push_json_string_escaped(&mut out, delta);
            out.push('}');
        }
        FrameEvent::TextEnd { id } => {
            out.push_str("{\"type\":\"text-end\",\"id\":");
            push_json_string_escaped(&mut out, id);
            out.push('}');
        }
        FrameEvent::ToolInputStart {
            tool_call_id,
            tool_name,
        } => {
            out.push_str("{\"type\":\"tool-input-start\",\"toolCallId\":");
            push_json_string_escaped(&mut out, tool_call_id);
            out.push_str(",\"toolName\":");
            push_json_string_escaped(&mut out, tool_name);
            out.push('}');
        }
        FrameEvent::ToolInputDelta {
            tool_call_id,
            input_text_delta,
        } => {
            out.push_str("{\"type\":\"tool-input-delta\",\"toolCallId\":");
            push_json_string_escaped(&mut out, tool_call_id);
            out.push_str(",\"inputTextDelta\":");
            push_json_string_escaped(&mut out, input_text_delta);
            out.push('}');
        }
        FrameEvent::Finish { message_metadata } => {
            out.push_str("{\"type\":\"finish\"");
            if let Some(metadata) = message_metadata {
                out.push_str(",\"messageMetadata\":");
                push_finish_metadata(&mut out, metadata);
            }
            out.push('}');
        }
        FrameEvent::Error { error_text } => {
            out.push_str("{\"type\":\"error\",\"errorText\":");
            push_json_string_escaped(&mut out, error_text);
            out.push('}');
        }
        FrameEvent::Done => {
            return Bytes::from_static(DONE_FRAME);
        }
    }
    out.push_str("\n\n");
    Bytes::from(out)
}

fn push_finish_metadata(out: &mut String, metadata: &FinishMetadata) {
    out.push('{');
    let mut first = true;
    if let Some(reason) = metadata.finish_reason.as_deref() {
        out.push_str("\"finishReason\":");
        push_json_string_escaped(out, reason);
        first = false;
    }
    if let Some(usage) = &metadata.usage {
        if !first {
            out.push(',');
        }
        out.push_str("\"usage\":{\"promptTokens\":");
        push_u64_decimal(out, usage.prompt_tokens);
        out.push_str(",\"completionTokens\":");
        push_u64_decimal(out, usage.completion_tokens);
        if let Some(total) = usage.total_tokens {
            out.push_str(",\"totalTokens\":");
            push_u64_decimal(out, total);
        }
        out.push('}');
    }
    out.push('}');
}

fn payload_hint(event: &FrameEvent) -> usize {
    match event {
        FrameEvent::TextDelta { delta, .. } => delta.len(),
        FrameEvent::ToolInputDelta {
            input_text_delta, ..
        } => input_text_delta.len(),
        FrameEvent::Error { error_text } => error_text.len(),
        _ => 32,
    }
}
