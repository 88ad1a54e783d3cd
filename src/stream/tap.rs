//! Pass-through frame observer that persists finished turns.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use pin_project_lite::pin_project;

use crate::protocol::frames::{encode_frame, FrameEvent};
use crate::protocol::ui::UiMessage;
use crate::store::ChatStore;
use crate::util::new_message_id;

/// Everything the background save needs, captured up front so the task
/// borrows nothing from the request once it is scheduled.
pub struct PendingSave {
    pub chat_id: String,
    pub user_id: Option<i64>,
    pub messages: Vec<UiMessage>,
    pub store: Arc<dyn ChatStore>,
}

pin_project! {
    /// Wraps the turn's frame sequence as the SSE response body.
    ///
    /// Frames pass through encoded but otherwise untouched. The tap
    /// observes the message id from `start` and accumulates `text-delta`
    /// payloads; when the terminator is produced it schedules exactly one
    /// background save of the assembled assistant message. A stream that
    /// ends without the terminator (client disconnect, driver teardown)
    /// never persists anything.
    pub struct PersistenceTap<S> {
        #[pin]
        frames: S,
        text: String,
        message_id: Option<String>,
        save: Option<PendingSave>,
        finished: bool,
    }
}

impl<S> PersistenceTap<S> {
    pub fn new(frames: S, save: PendingSave) -> Self {
        Self {
            frames,
            text: String::new(),
            message_id: None,
            save: Some(save),
            finished: false,
        }
    }
}

impl<S> Stream for PersistenceTap<S>
where
    S: Stream<Item = FrameEvent>,
{
    type Item = Result<Bytes, std::convert::Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }

        match this.frames.poll_next(cx) {
            Poll::Ready(Some(frame)) => {
                match &frame {
                    FrameEvent::Start { message_id } => {
                        *this.message_id = Some(message_id.clone());
                    }
                    FrameEvent::TextDelta { delta, .. } => {
                        this.text.push_str(delta);
                    }
                    FrameEvent::Done => {
                        *this.finished = true;
                        if let Some(save) = this.save.take() {
                            schedule_save(
                                save,
                                this.message_id.take(),
                                std::mem::take(this.text),
                            );
                        }
                    }
                    _ => {}
                }
                Poll::Ready(Some(Ok(encode_frame(&frame))))
            }
            Poll::Ready(None) => {
                *this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Persist off the response path. Store failures are logged and go no
/// further: the client already has its bytes.
fn schedule_save(save: PendingSave, message_id: Option<String>, text: String) {
    tokio::spawn(async move {
        let PendingSave {
            chat_id,
            user_id,
            mut messages,
            store,
        } = save;

        let assistant_id = message_id.unwrap_or_else(new_message_id);
        messages.push(UiMessage::assistant_text(assistant_id, text));

        let task_chat_id = chat_id.clone();
        let outcome =
            tokio::task::spawn_blocking(move || store.save(&task_chat_id, user_id, &messages))
                .await;

        match outcome {
            Ok(Ok(())) => {
                tracing::debug!(chat_id = %chat_id, "chat turn persisted");
            }
            Ok(Err(err)) => {
                tracing::error!(chat_id = %chat_id, error = %err, "failed to persist chat turn");
            }
            Err(err) => {
                tracing::error!(chat_id = %chat_id, error = %err, "chat persistence task panicked");
            }
        }
    });
}
