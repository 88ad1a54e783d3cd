use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::error::RequestError;
use crate::protocol::frames::FrameEvent;
use crate::protocol::normalize::provider_messages;
use crate::protocol::ui::ChatRequest;
use crate::state::AppState;
use crate::stream::tap::{PendingSave, PersistenceTap};
use crate::stream::translator::drive_turn;
use crate::util::new_chat_id;

/// `POST /api/chat`: stream one assistant turn as UI message-stream
/// frames over SSE.
///
/// The turn driver runs on its own task and hands frames over a
/// capacity-1 channel; the response body drains it through the
/// persistence tap. Dropping the body (client disconnect) closes the
/// channel and tears the driver down before tools run or anything is
/// persisted.
pub fn handler(State(state): State<Arc<AppState>>, body: bytes::Bytes) -> Response {
    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return RequestError(format!("malformed chat request: {err}")).into_response();
        }
    };

    let chat_id = request.id.clone().unwrap_or_else(new_chat_id);
    let messages = provider_messages(state.system_prompt(), &request.messages);

    tracing::debug!(
        chat_id = %chat_id,
        ui_messages = request.messages.len(),
        "starting chat turn"
    );

    let (frame_tx, frame_rx) = mpsc::channel::<FrameEvent>(1);
    let span = tracing::info_span!("chat_turn", chat_id = %chat_id);
    tokio::spawn(
        drive_turn(
            Arc::clone(&state.backend),
            Arc::clone(&state.registry),
            Arc::clone(&state.tool_definitions),
            messages,
            frame_tx,
        )
        .instrument(span),
    );

    let tap = PersistenceTap::new(
        frame_stream(frame_rx),
        PendingSave {
            chat_id,
            user_id: request.user_id,
            messages: request.messages,
            store: Arc::clone(&state.store),
        },
    );

    message_stream_response(Body::from_stream(tap))
}

fn frame_stream(
    receiver: mpsc::Receiver<FrameEvent>,
) -> impl futures_util::Stream<Item = FrameEvent> + Send {
    futures_util::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|frame| (frame, receiver))
    })
}

/// Attach the fixed protocol headers to the streaming response.
fn message_stream_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::HeaderName::from_static("x-vercel-ai-ui-message-stream"),
        http::HeaderValue::from_static("v1"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    headers.insert(
        http::HeaderName::from_static("x-accel-buffering"),
        http::HeaderValue::from_static("no"),
    );
    response
}
