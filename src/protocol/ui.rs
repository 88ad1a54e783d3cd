use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub messages: Vec<UiMessage>,
}

/// A message in the UI message-stream format.
///
/// When `parts` is non-empty it is authoritative; the legacy `content`,
/// `attachments` and `toolInvocations` fields exist for older clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<UiPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(
        default,
        alias = "experimental_attachments",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub attachments: Vec<UiAttachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<UiToolInvocation>,
}

impl UiMessage {
    /// Build the assistant message persisted at the end of a turn.
    #[must_use]
    pub fn assistant_text(id: String, text: String) -> Self {
        Self {
            id: Some(id),
            role: "assistant".to_string(),
            parts: vec![UiPart::text(text)],
            content: None,
            attachments: Vec::new(),
            tool_invocations: Vec::new(),
        }
    }
}

/// One typed content part of a [`UiMessage`].
///
/// The `type` field carries the variant: `text`, `file`, or `tool-<name>`
/// for tool parts. All other fields are populated per variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiPart {
    #[serde(rename = "type")]
    pub part_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// Structural classification of a [`UiPart`] by its `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiPartKind<'a> {
    Text,
    File,
    /// `tool-<name>`; the embedded name is used when `toolName` is absent.
    Tool { type_name: &'a str },
    Other,
}

impl UiPart {
    #[must_use]
    pub fn text(text: String) -> Self {
        Self {
            part_type: "text".to_string(),
            text: Some(text),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn kind(&self) -> UiPartKind<'_> {
        match self.part_type.as_str() {
            "text" => UiPartKind::Text,
            "file" => UiPartKind::File,
            other => match other.strip_prefix("tool-") {
                Some(type_name) => UiPartKind::Tool { type_name },
                None => UiPartKind::Other,
            },
        }
    }
}

/// Legacy attachment carried by older clients when `parts` is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiAttachment {
    pub content_type: String,
    pub url: String,
}

/// Legacy completed tool invocation, replayed into the provider
/// conversation as a call plus a result message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}
