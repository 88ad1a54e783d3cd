use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Failure talking to the completion provider. Once the SSE stream has
/// started these are converted into an in-band `error` frame; before that
/// they surface as a plain HTTP error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("failed to reach completion provider: {0}")]
    Connect(String),
    #[error("completion provider returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("failed to decode completion chunk: {0}")]
    Decode(String),
}

/// Failure inside a local tool invocation. Never aborts the turn: the
/// orchestrator encodes these as an inline `{"error": ...}` tool result.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("invalid tool arguments: {0}")]
    Arguments(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
}

/// Failure persisting a finished turn. Logged by the persistence tap,
/// invisible to the client.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to write chat store: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode chat record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Pre-stream request failure (malformed body). The only error shape that
/// ever leaves as a transport-level status code on the chat route.
#[derive(Debug, thiserror::Error)]
#[error("invalid request: {0}")]
pub struct RequestError(pub String);

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "message": self.0,
                "type": "invalid_request_error",
            }
        });
        (http::StatusCode::BAD_REQUEST, axum::Json(body)).into_response()
    }
}

/// Extract a readable message from an upstream error body, which may be a
/// JSON error envelope or arbitrary text.
#[must_use]
pub fn sanitize_upstream_error(body: &[u8]) -> String {
    const MAX_MESSAGE_LEN: usize = 512;

    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        let message = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(serde_json::Value::as_str)
            .or_else(|| value.get("error").and_then(serde_json::Value::as_str))
            .or_else(|| value.get("message").and_then(serde_json::Value::as_str));
        if let Some(message) = message {
            return truncate_chars(message, MAX_MESSAGE_LEN);
        }
    }

    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "upstream returned an empty error body".to_string()
    } else {
        truncate_chars(trimmed, MAX_MESSAGE_LEN)
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}
