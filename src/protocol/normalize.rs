use serde_json::Value;

use super::openai_chat::{ChatMessage, ContentBlock, ImageUrl, MessageContent, ToolCall};
use super::ui::{UiMessage, UiPart, UiPartKind, UiToolInvocation};

/// Convert a UI conversation into the provider message array.
///
/// The fixed system instruction always comes first. Each UI message
/// contributes its own provider message plus, after it, one tool-role
/// message per completed tool part and per legacy tool invocation, so
/// every `tool_call_id` referenced by a result was declared by a
/// preceding call.
#[must_use]
pub fn provider_messages(system_prompt: &str, messages: &[UiMessage]) -> Vec<ChatMessage> {
    let mut out: Vec<ChatMessage> = Vec::with_capacity(messages.len() + 1);
    out.push(ChatMessage::system(system_prompt));

    for message in messages {
        let mut blocks: Vec<ContentBlock> = Vec::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut tool_results: Vec<ChatMessage> = Vec::new();

        if !message.parts.is_empty() {
            for part in &message.parts {
                collect_part(part, &mut blocks, &mut tool_calls, &mut tool_results);
            }
        } else if let Some(content) = &message.content {
            blocks.push(ContentBlock::Text {
                text: content.clone(),
            });
        }

        if message.parts.is_empty() {
            for attachment in &message.attachments {
                if attachment.content_type.starts_with("image") {
                    blocks.push(ContentBlock::ImageUrl {
                        image_url: ImageUrl {
                            url: attachment.url.clone(),
                        },
                    });
                } else if attachment.content_type.starts_with("text") {
                    blocks.push(ContentBlock::Text {
                        text: attachment.url.clone(),
                    });
                }
            }
        }

        for invocation in &message.tool_invocations {
            tool_calls.push(legacy_tool_call(invocation));
        }

        out.push(ChatMessage {
            role: message.role.clone(),
            content: Some(collapse_blocks(blocks)),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        });

        out.append(&mut tool_results);

        for invocation in &message.tool_invocations {
            out.push(ChatMessage::tool_result(
                invocation.tool_call_id.clone(),
                encode_json_value(invocation.result.as_ref()),
            ));
        }
    }

    out
}

fn collect_part(
    part: &UiPart,
    blocks: &mut Vec<ContentBlock>,
    tool_calls: &mut Vec<ToolCall>,
    tool_results: &mut Vec<ChatMessage>,
) {
    match part.kind() {
        UiPartKind::Text => {
            blocks.push(ContentBlock::Text {
                text: part.text.clone().unwrap_or_default(),
            });
        }
        UiPartKind::File => {
            let Some(url) = part.url.clone() else {
                return;
            };
            let is_image = part
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.starts_with("image"));
            if is_image {
                blocks.push(ContentBlock::ImageUrl {
                    image_url: ImageUrl { url },
                });
            } else {
                // No direct mapping for other file kinds; surface the URL
                // as text so the model still sees the reference.
                blocks.push(ContentBlock::Text { text: url });
            }
        }
        UiPartKind::Tool { type_name } => {
            let Some(tool_call_id) = part.tool_call_id.as_deref() else {
                return;
            };
            let tool_name = part.tool_name.as_deref().unwrap_or(type_name);
            if tool_call_id.is_empty() || tool_name.is_empty() {
                return;
            }

            let state_requests_call = part
                .state
                .as_deref()
                .is_some_and(|state| state.contains("call") || state.contains("input"));
            let has_payload = part.input.is_some() || part.args.is_some();

            if state_requests_call || has_payload {
                let arguments = match part.input.as_ref().or(part.args.as_ref()) {
                    Some(Value::String(raw)) => raw.clone(),
                    Some(value) => encode_json_value(Some(value)),
                    None => "{}".to_string(),
                };
                tool_calls.push(ToolCall::function(
                    tool_call_id.to_string(),
                    tool_name.to_string(),
                    arguments,
                ));
            }

            if part.state.as_deref() == Some("output-available") {
                if let Some(output) = &part.output {
                    tool_results.push(ChatMessage::tool_result(
                        tool_call_id.to_string(),
                        encode_json_value(Some(output)),
                    ));
                }
            }
        }
        UiPartKind::Other => {}
    }
}

fn legacy_tool_call(invocation: &UiToolInvocation) -> ToolCall {
    ToolCall::function(
        invocation.tool_call_id.clone(),
        invocation.tool_name.clone(),
        encode_json_value(invocation.args.as_ref()),
    )
}

/// A single text block collapses to a bare string; anything else stays a
/// structured block list. No content at all becomes the empty string, so
/// every message carries a content field.
fn collapse_blocks(mut blocks: Vec<ContentBlock>) -> MessageContent {
    match blocks.len() {
        0 => MessageContent::Text(String::new()),
        1 => match blocks.pop() {
            Some(ContentBlock::Text { text }) => MessageContent::Text(text),
            Some(block) => MessageContent::Blocks(vec![block]),
            None => MessageContent::Text(String::new()),
        },
        _ => MessageContent::Blocks(blocks),
    }
}

fn encode_json_value(value: Option<&Value>) -> String {
    match value {
        Some(value) => serde_json::to_string(value).unwrap_or_else(|_| "null".to_string()),
        None => "null".to_string(),
    }
}
