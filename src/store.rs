use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::StoreError;
use crate::protocol::ui::UiMessage;

/// Persistence sink for finished chat turns.
///
/// Implementations are synchronous and must be safe to call from a
/// blocking task; callers shift the work off the async path themselves.
pub trait ChatStore: Send + Sync {
    /// Persist the full message list for a chat.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the record cannot be encoded or
    /// written.
    fn save(
        &self,
        chat_id: &str,
        user_id: Option<i64>,
        messages: &[UiMessage],
    ) -> Result<(), StoreError>;
}

#[derive(Serialize)]
struct ChatRecord<'a> {
    chat_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<i64>,
    saved_at: u64,
    messages: &'a [UiMessage],
}

/// Append-only JSONL chat store: one record per save, one line each.
///
/// Each save opens its own file handle, so concurrent background saves
/// never share state with a request context.
pub struct JsonlChatStore {
    path: PathBuf,
}

impl JsonlChatStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ChatStore for JsonlChatStore {
    fn save(
        &self,
        chat_id: &str,
        user_id: Option<i64>,
        messages: &[UiMessage],
    ) -> Result<(), StoreError> {
        let record = ChatRecord {
            chat_id,
            user_id,
            saved_at: unix_now_secs(),
            messages,
        };
        let line = serde_json::to_string(&record)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
