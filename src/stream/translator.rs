//! The streaming translator: consumes provider completion chunks and
//! emits UI message-stream frames, driving at most one round of tool
//! orchestration in between.

use std::collections::hash_map::Entry;
use std::sync::Arc;

use futures_util::StreamExt;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use crate::error::UpstreamError;
use crate::protocol::frames::{FinishMetadata, FinishUsage, FrameEvent};
use crate::protocol::openai_chat::{ChatMessage, ChatUsage, ToolCallDelta, ToolDefinition};
use crate::stream::orchestrator::run_tool_calls;
use crate::tools::ToolRegistry;
use crate::upstream::CompletionBackend;
use crate::util::new_message_id;

/// The single text stream identifier, reused across both rounds of a
/// tool-calling turn so the client sees one text block per response.
const TEXT_STREAM_ID: &str = "text-1";

/// Accumulation state for one in-progress tool call, keyed by the
/// provider's delta index.
#[derive(Debug, Default)]
pub struct ToolCallBuffer {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
    pub started: bool,
}

/// Per-turn map from provider index to tool-call buffer.
///
/// Index values carry no ordering meaning; arrival order is tracked
/// separately so the orchestrator can make a deterministic pass.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    by_index: FxHashMap<u32, ToolCallBuffer>,
    arrival: Vec<u32>,
}

impl ToolCallAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the buffer for `index`, creating it on first sight.
    pub fn entry(&mut self, index: u32) -> &mut ToolCallBuffer {
        match self.by_index.entry(index) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.arrival.push(index);
                entry.insert(ToolCallBuffer::default())
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    /// Buffers in the order their indices first appeared on the stream.
    pub fn iter_arrival(&self) -> impl Iterator<Item = (u32, &ToolCallBuffer)> {
        self.arrival
            .iter()
            .filter_map(move |index| self.by_index.get(index).map(|buffer| (*index, buffer)))
    }

    /// Buffers in ascending index order, the order tool calls execute in.
    pub fn iter_ascending(&self) -> impl Iterator<Item = (u32, &ToolCallBuffer)> {
        let mut indices = self.arrival.clone();
        indices.sort_unstable();
        indices
            .into_iter()
            .filter_map(move |index| self.by_index.get(&index).map(|buffer| (index, buffer)))
    }
}

/// Ephemeral state owned by exactly one in-flight turn.
struct TurnSession {
    message_id: String,
    text_started: bool,
    text_finished: bool,
    finish_reason: Option<String>,
    usage: Option<ChatUsage>,
    tool_calls: ToolCallAccumulator,
}

impl TurnSession {
    fn new() -> Self {
        Self {
            message_id: new_message_id(),
            text_started: false,
            text_finished: false,
            finish_reason: None,
            usage: None,
            tool_calls: ToolCallAccumulator::new(),
        }
    }
}

/// Which provider round the translator is consuming. Tool-call deltas
/// are only honored in the first round; a second `tool_calls` finish
/// reason falls through to finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Round {
    First,
    Second,
}

enum RoundOutcome {
    Completed,
    ClientGone,
    Failed(UpstreamError),
}

/// Drive one full turn: open the provider stream, translate chunks into
/// frames on `frames`, orchestrate one round of tool calls when the
/// provider asks for it, and terminate the frame sequence.
///
/// Every failure past the first frame is delivered in-band as an `error`
/// frame followed by the terminator. A closed `frames` channel means the
/// client went away: the turn is torn down immediately, without running
/// tools or finishing the sequence.
pub async fn drive_turn(
    backend: Arc<dyn CompletionBackend>,
    registry: Arc<ToolRegistry>,
    tools: Arc<[ToolDefinition]>,
    mut messages: Vec<ChatMessage>,
    frames: mpsc::Sender<FrameEvent>,
) {
    let mut session = TurnSession::new();

    let start = FrameEvent::Start {
        message_id: session.message_id.clone(),
    };
    if frames.send(start).await.is_err() {
        return;
    }

    let first = match backend
        .stream_completion(messages.clone(), Arc::clone(&tools))
        .await
    {
        Ok(stream) => stream,
        Err(err) => {
            abort_with_error(&frames, &err).await;
            return;
        }
    };
    match consume_round(first, Round::First, &mut session, &frames).await {
        RoundOutcome::Completed => {}
        RoundOutcome::ClientGone => return,
        RoundOutcome::Failed(err) => {
            abort_with_error(&frames, &err).await;
            return;
        }
    }

    if session.finish_reason.as_deref() == Some("stop")
        && session.text_started
        && !session.text_finished
    {
        if send_text_end(&frames).await.is_err() {
            return;
        }
        session.text_finished = true;
    }

    if session.finish_reason.as_deref() == Some("tool_calls") {
        let (assistant, results) =
            run_tool_calls(&session.tool_calls, registry.as_ref()).await;
        tracing::debug!(
            tool_calls = session.tool_calls.len(),
            "executed tool round, issuing second completion"
        );
        messages.push(assistant);
        messages.extend(results);

        let second = match backend
            .stream_completion(messages, Arc::clone(&tools))
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                abort_with_error(&frames, &err).await;
                return;
            }
        };
        match consume_round(second, Round::Second, &mut session, &frames).await {
            RoundOutcome::Completed => {}
            RoundOutcome::ClientGone => return,
            RoundOutcome::Failed(err) => {
                abort_with_error(&frames, &err).await;
                return;
            }
        }
    }

    if session.text_started && !session.text_finished {
        if send_text_end(&frames).await.is_err() {
            return;
        }
        session.text_finished = true;
    }

    let finish = FrameEvent::Finish {
        message_metadata: finish_metadata(&session),
    };
    if frames.send(finish).await.is_err() {
        return;
    }
    let _ = frames.send(FrameEvent::Done).await;

    tracing::info!(
        message_id = %session.message_id,
        finish_reason = session.finish_reason.as_deref().unwrap_or("none"),
        "turn complete"
    );
}

async fn abort_with_error(frames: &mpsc::Sender<FrameEvent>, err: &UpstreamError) {
    tracing::warn!(error = %err, "upstream failure, abandoning turn");
    let error = FrameEvent::Error {
        error_text: err.to_string(),
    };
    if frames.send(error).await.is_err() {
        return;
    }
    let _ = frames.send(FrameEvent::Done).await;
}

async fn send_text_end(frames: &mpsc::Sender<FrameEvent>) -> Result<(), ()> {
    frames
        .send(FrameEvent::TextEnd {
            id: TEXT_STREAM_ID.to_string(),
        })
        .await
        .map_err(|_| ())
}

async fn consume_round(
    mut chunks: crate::upstream::ChunkStream,
    round: Round,
    session: &mut TurnSession,
    frames: &mpsc::Sender<FrameEvent>,
) -> RoundOutcome {
    let mut pending: Vec<FrameEvent> = Vec::with_capacity(4);

    while let Some(item) = chunks.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(err) => return RoundOutcome::Failed(err),
        };

        if chunk.choices.is_empty() {
            // Terminal usage-only chunk convention.
            if let Some(usage) = chunk.usage {
                session.usage = Some(usage);
            }
            continue;
        }

        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
                // Last write wins if the provider repeats it.
                session.finish_reason = Some(reason);
            }

            if let Some(text) = choice.delta.content {
                if !session.text_started {
                    pending.push(FrameEvent::TextStart {
                        id: TEXT_STREAM_ID.to_string(),
                    });
                    session.text_started = true;
                }
                pending.push(FrameEvent::TextDelta {
                    id: TEXT_STREAM_ID.to_string(),
                    delta: text,
                });
            }

            if round == Round::First {
                if let Some(deltas) = choice.delta.tool_calls {
                    for delta in deltas {
                        apply_tool_call_delta(&mut session.tool_calls, delta, &mut pending);
                    }
                }
            }

            for frame in pending.drain(..) {
                if frames.send(frame).await.is_err() {
                    return RoundOutcome::ClientGone;
                }
            }
        }
    }

    RoundOutcome::Completed
}

/// Fold one provider tool-call fragment into the accumulator, pushing
/// any frames it triggers.
///
/// `tool-input-start` goes out as soon as both the id and the name are
/// known, and always before the first argument delta for that call.
/// Argument deltas are only emitted once the call id is known, since the
/// frame is keyed by it.
fn apply_tool_call_delta(
    accumulator: &mut ToolCallAccumulator,
    delta: ToolCallDelta,
    pending: &mut Vec<FrameEvent>,
) {
    let buffer = accumulator.entry(delta.index);

    if let Some(id) = delta.id {
        buffer.id = Some(id);
    }

    let Some(function) = delta.function else {
        maybe_start(buffer, pending);
        return;
    };

    if let Some(name) = function.name {
        buffer.name = Some(name);
    }
    maybe_start(buffer, pending);

    if let Some(arguments) = function.arguments {
        if !arguments.is_empty() {
            buffer.arguments.push_str(&arguments);
            if let Some(tool_call_id) = buffer.id.clone() {
                pending.push(FrameEvent::ToolInputDelta {
                    tool_call_id,
                    input_text_delta: arguments,
                });
            }
        }
    }
}

fn maybe_start(buffer: &mut ToolCallBuffer, pending: &mut Vec<FrameEvent>) {
    if buffer.started {
        return;
    }
    if let (Some(id), Some(name)) = (buffer.id.as_ref(), buffer.name.as_ref()) {
        pending.push(FrameEvent::ToolInputStart {
            tool_call_id: id.clone(),
            tool_name: name.clone(),
        });
        buffer.started = true;
    }
}

/// Build the `finish` metadata: finish reasons map underscores to
/// hyphens, and both fields are attached only when observed.
fn finish_metadata(session: &TurnSession) -> Option<FinishMetadata> {
    let finish_reason = session
        .finish_reason
        .as_ref()
        .map(|reason| reason.replace('_', "-"));
    let usage = session.usage.as_ref().map(|usage| FinishUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    });

    if finish_reason.is_none() && usage.is_none() {
        return None;
    }
    Some(FinishMetadata {
        finish_reason,
        usage,
    })
}
