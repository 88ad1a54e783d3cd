//! End-to-end tests for the streaming translator driving scripted
//! provider rounds.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use edital_chat::error::{ToolError, UpstreamError};
use edital_chat::protocol::frames::FrameEvent;
use edital_chat::protocol::openai_chat::{ChatMessage, ChatStreamChunk, ToolDefinition};
use edital_chat::stream::translator::drive_turn;
use edital_chat::tools::{Tool, ToolRegistry};
use edital_chat::upstream::{ChunkStream, CompletionBackend};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

type ScriptedRound = Vec<Result<ChatStreamChunk, UpstreamError>>;

/// Backend that replays scripted chunk rounds and records the message
/// list of every round it was asked for.
struct ScriptedBackend {
    rounds: Mutex<VecDeque<ScriptedRound>>,
    seen_messages: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    fn new(rounds: Vec<ScriptedRound>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
            seen_messages: Mutex::new(Vec::new()),
        })
    }

    fn round_count(&self) -> usize {
        self.seen_messages.lock().unwrap().len()
    }

    fn round_messages(&self, round: usize) -> Vec<ChatMessage> {
        self.seen_messages.lock().unwrap()[round].clone()
    }
}

impl CompletionBackend for ScriptedBackend {
    fn stream_completion(
        &self,
        messages: Vec<ChatMessage>,
        _tools: Arc<[ToolDefinition]>,
    ) -> BoxFuture<'_, Result<ChunkStream, UpstreamError>> {
        self.seen_messages.lock().unwrap().push(messages);
        let round = self.rounds.lock().unwrap().pop_front();
        async move {
            match round {
                Some(items) => Ok(futures_util::stream::iter(items).boxed()),
                None => Err(UpstreamError::Connect("no scripted round left".to_string())),
            }
        }
        .boxed()
    }
}

/// Tool that records invocations and returns a fixed payload.
struct StubSearchTool {
    invocations: AtomicUsize,
    result: Value,
}

impl StubSearchTool {
    fn new(result: Value) -> Arc<Self> {
        Arc::new(Self {
            invocations: AtomicUsize::new(0),
            result,
        })
    }
}

impl Tool for StubSearchTool {
    fn name(&self) -> &'static str {
        "search_edital"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "search_edital",
            "Busca trechos do edital.",
            json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        )
    }

    fn invoke(&self, _arguments: Value) -> BoxFuture<'_, Result<Value, ToolError>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let result = self.result.clone();
        async move { Ok(result) }.boxed()
    }
}

fn chunk(value: Value) -> Result<ChatStreamChunk, UpstreamError> {
    Ok(serde_json::from_value(value).expect("chunk"))
}

fn text_chunk(text: &str) -> Result<ChatStreamChunk, UpstreamError> {
    chunk(json!({
        "id": "chatcmpl-1",
        "model": "m1",
        "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
    }))
}

fn finish_chunk(reason: &str) -> Result<ChatStreamChunk, UpstreamError> {
    chunk(json!({
        "id": "chatcmpl-1",
        "model": "m1",
        "choices": [{"index": 0, "delta": {}, "finish_reason": reason}]
    }))
}

fn usage_chunk(prompt: u64, completion: u64, total: Option<u64>) -> Result<ChatStreamChunk, UpstreamError> {
    let mut usage = json!({"prompt_tokens": prompt, "completion_tokens": completion});
    if let Some(total) = total {
        usage["total_tokens"] = json!(total);
    }
    chunk(json!({
        "id": "chatcmpl-1",
        "model": "m1",
        "choices": [],
        "usage": usage
    }))
}

fn tool_call_chunk(index: u32, id: Option<&str>, name: Option<&str>, arguments: Option<&str>) -> Result<ChatStreamChunk, UpstreamError> {
    let mut call = json!({"index": index});
    if let Some(id) = id {
        call["id"] = json!(id);
        call["type"] = json!("function");
    }
    let mut function = json!({});
    if let Some(name) = name {
        function["name"] = json!(name);
    }
    if let Some(arguments) = arguments {
        function["arguments"] = json!(arguments);
    }
    call["function"] = function;
    chunk(json!({
        "id": "chatcmpl-1",
        "model": "m1",
        "choices": [{"index": 0, "delta": {"tool_calls": [call]}, "finish_reason": null}]
    }))
}

fn user_turn(text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("prompt"),
        ChatMessage {
            role: "user".to_string(),
            content: Some(edital_chat::protocol::openai_chat::MessageContent::Text(
                text.to_string(),
            )),
            tool_calls: None,
            tool_call_id: None,
        },
    ]
}

async fn collect_frames(
    backend: Arc<ScriptedBackend>,
    registry: Arc<ToolRegistry>,
    messages: Vec<ChatMessage>,
) -> Vec<FrameEvent> {
    let tools: Arc<[ToolDefinition]> = registry.definitions().into();
    let (tx, mut rx) = mpsc::channel(1);
    let driver = tokio::spawn(drive_turn(backend, registry, tools, messages, tx));
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }
    driver.await.expect("driver");
    frames
}

fn registry_with(tool: Arc<StubSearchTool>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(tool);
    Arc::new(registry)
}

fn frame_json(frame: &FrameEvent) -> Value {
    serde_json::to_value(frame).expect("frame json")
}

#[tokio::test]
async fn text_only_turn_produces_the_full_frame_sequence() {
    let backend = ScriptedBackend::new(vec![vec![
        text_chunk("Olá"),
        text_chunk(" mundo"),
        finish_chunk("stop"),
    ]]);
    let registry = Arc::new(ToolRegistry::new());

    let frames = collect_frames(Arc::clone(&backend), registry, user_turn("oi")).await;

    assert_eq!(frames.len(), 7);
    let FrameEvent::Start { message_id } = &frames[0] else {
        panic!("expected start frame, got {:?}", frames[0]);
    };
    assert!(message_id.starts_with("msg-"));
    assert_eq!(
        frames[1],
        FrameEvent::TextStart {
            id: "text-1".to_string()
        }
    );
    assert_eq!(
        frames[2],
        FrameEvent::TextDelta {
            id: "text-1".to_string(),
            delta: "Olá".to_string()
        }
    );
    assert_eq!(
        frames[3],
        FrameEvent::TextDelta {
            id: "text-1".to_string(),
            delta: " mundo".to_string()
        }
    );
    assert_eq!(
        frames[4],
        FrameEvent::TextEnd {
            id: "text-1".to_string()
        }
    );
    assert_eq!(
        frame_json(&frames[5]),
        json!({"type": "finish", "messageMetadata": {"finishReason": "stop"}})
    );
    assert_eq!(frames[6], FrameEvent::Done);

    assert_eq!(backend.round_count(), 1);
}

#[tokio::test]
async fn tool_call_turn_streams_two_rounds() {
    let backend = ScriptedBackend::new(vec![
        vec![
            tool_call_chunk(0, Some("call_1"), Some("search_edital"), None),
            tool_call_chunk(0, None, None, Some("{\"que")),
            tool_call_chunk(0, None, None, Some("ry\":\"abc\"}")),
            finish_chunk("tool_calls"),
        ],
        vec![text_chunk("Encontrei."), finish_chunk("stop")],
    ]);
    let tool = StubSearchTool::new(json!({"hits": []}));
    let registry = registry_with(Arc::clone(&tool));

    let frames = collect_frames(Arc::clone(&backend), registry, user_turn("vagas?")).await;

    assert!(matches!(frames[0], FrameEvent::Start { .. }));
    assert_eq!(
        frames[1],
        FrameEvent::ToolInputStart {
            tool_call_id: "call_1".to_string(),
            tool_name: "search_edital".to_string()
        }
    );
    assert_eq!(
        frames[2],
        FrameEvent::ToolInputDelta {
            tool_call_id: "call_1".to_string(),
            input_text_delta: "{\"que".to_string()
        }
    );
    assert_eq!(
        frames[3],
        FrameEvent::ToolInputDelta {
            tool_call_id: "call_1".to_string(),
            input_text_delta: "ry\":\"abc\"}".to_string()
        }
    );
    assert_eq!(
        frames[4],
        FrameEvent::TextStart {
            id: "text-1".to_string()
        }
    );
    assert_eq!(
        frames[5],
        FrameEvent::TextDelta {
            id: "text-1".to_string(),
            delta: "Encontrei.".to_string()
        }
    );
    assert_eq!(
        frames[6],
        FrameEvent::TextEnd {
            id: "text-1".to_string()
        }
    );
    assert_eq!(
        frame_json(&frames[7]),
        json!({"type": "finish", "messageMetadata": {"finishReason": "stop"}})
    );
    assert_eq!(frames[8], FrameEvent::Done);

    assert_eq!(tool.invocations.load(Ordering::SeqCst), 1);
    assert_eq!(backend.round_count(), 2);

    // Round two sees the assistant declaration and the tool result.
    let second = backend.round_messages(1);
    let assistant = &second[second.len() - 2];
    assert_eq!(assistant.role, "assistant");
    let calls = assistant.tool_calls.as_ref().expect("tool_calls");
    assert_eq!(calls[0].id, "call_1");
    assert_eq!(calls[0].function.arguments, "{\"query\":\"abc\"}");

    let result = &second[second.len() - 1];
    assert_eq!(result.role, "tool");
    assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));
    let result_json = serde_json::to_value(result).expect("serialize");
    assert_eq!(result_json["content"], "{\"hits\":[]}");
}

#[tokio::test]
async fn tool_results_are_appended_in_ascending_index_order() {
    let backend = ScriptedBackend::new(vec![
        vec![
            // Index 1 arrives before index 0.
            tool_call_chunk(1, Some("call_b"), Some("search_edital"), Some("{\"query\":\"b\"}")),
            tool_call_chunk(0, Some("call_a"), Some("search_edital"), Some("{\"query\":\"a\"}")),
            finish_chunk("tool_calls"),
        ],
        vec![text_chunk("ok"), finish_chunk("stop")],
    ]);
    let tool = StubSearchTool::new(json!({"hits": []}));
    let registry = registry_with(Arc::clone(&tool));

    let _ = collect_frames(Arc::clone(&backend), registry, user_turn("duas buscas")).await;

    assert_eq!(tool.invocations.load(Ordering::SeqCst), 2);
    let second = backend.round_messages(1);
    let results: Vec<&ChatMessage> = second.iter().filter(|m| m.role == "tool").collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].tool_call_id.as_deref(), Some("call_a"));
    assert_eq!(results[1].tool_call_id.as_deref(), Some("call_b"));

    // The assistant declaration keeps stream arrival order.
    let assistant = second
        .iter()
        .find(|m| m.tool_calls.is_some())
        .expect("assistant declaration");
    let calls = assistant.tool_calls.as_ref().unwrap();
    assert_eq!(calls[0].id, "call_b");
    assert_eq!(calls[1].id, "call_a");
}

#[tokio::test]
async fn second_round_tool_calls_finish_without_execution() {
    let backend = ScriptedBackend::new(vec![
        vec![
            tool_call_chunk(0, Some("call_1"), Some("search_edital"), Some("{}")),
            finish_chunk("tool_calls"),
        ],
        vec![
            tool_call_chunk(0, Some("call_2"), Some("search_edital"), Some("{}")),
            finish_chunk("tool_calls"),
        ],
    ]);
    let tool = StubSearchTool::new(json!({"hits": []}));
    let registry = registry_with(Arc::clone(&tool));

    let frames = collect_frames(Arc::clone(&backend), registry, user_turn("loop?")).await;

    // One orchestration round only: the tool ran once, two provider
    // rounds were issued, and the turn finalized with the second finish
    // reason mapped to hyphens.
    assert_eq!(tool.invocations.load(Ordering::SeqCst), 1);
    assert_eq!(backend.round_count(), 2);
    let finish = frames
        .iter()
        .find(|f| matches!(f, FrameEvent::Finish { .. }))
        .expect("finish frame");
    assert_eq!(
        frame_json(finish),
        json!({"type": "finish", "messageMetadata": {"finishReason": "tool-calls"}})
    );
    assert_eq!(frames.last(), Some(&FrameEvent::Done));
}

#[tokio::test]
async fn provider_failure_mid_stream_emits_error_then_terminator() {
    let backend = ScriptedBackend::new(vec![vec![
        text_chunk("par"),
        Err(UpstreamError::Decode("unexpected EOF".to_string())),
    ]]);
    let registry = Arc::new(ToolRegistry::new());

    let frames = collect_frames(Arc::clone(&backend), registry, user_turn("oi")).await;

    assert!(matches!(frames[0], FrameEvent::Start { .. }));
    assert!(matches!(frames[1], FrameEvent::TextStart { .. }));
    assert!(matches!(frames[2], FrameEvent::TextDelta { .. }));
    let FrameEvent::Error { error_text } = &frames[3] else {
        panic!("expected error frame, got {:?}", frames[3]);
    };
    assert!(error_text.contains("unexpected EOF"));
    assert_eq!(frames[4], FrameEvent::Done);
    assert_eq!(frames.len(), 5);
    assert!(!frames
        .iter()
        .any(|f| matches!(f, FrameEvent::Finish { .. })));
}

#[tokio::test]
async fn first_request_failure_emits_error_then_terminator() {
    let backend = ScriptedBackend::new(vec![]);
    let registry = Arc::new(ToolRegistry::new());

    let frames = collect_frames(Arc::clone(&backend), registry, user_turn("oi")).await;

    assert_eq!(frames.len(), 3);
    assert!(matches!(frames[0], FrameEvent::Start { .. }));
    assert!(matches!(frames[1], FrameEvent::Error { .. }));
    assert_eq!(frames[2], FrameEvent::Done);
}

#[tokio::test]
async fn usage_from_terminal_chunk_reaches_the_finish_frame() {
    let backend = ScriptedBackend::new(vec![vec![
        text_chunk("ok"),
        finish_chunk("stop"),
        usage_chunk(11, 7, Some(18)),
    ]]);
    let registry = Arc::new(ToolRegistry::new());

    let frames = collect_frames(Arc::clone(&backend), registry, user_turn("oi")).await;

    let finish = frames
        .iter()
        .find(|f| matches!(f, FrameEvent::Finish { .. }))
        .expect("finish frame");
    assert_eq!(
        frame_json(finish),
        json!({
            "type": "finish",
            "messageMetadata": {
                "finishReason": "stop",
                "usage": {"promptTokens": 11, "completionTokens": 7, "totalTokens": 18}
            }
        })
    );
}

#[tokio::test]
async fn usage_without_total_omits_the_field() {
    let backend = ScriptedBackend::new(vec![vec![
        text_chunk("ok"),
        finish_chunk("stop"),
        usage_chunk(3, 2, None),
    ]]);
    let registry = Arc::new(ToolRegistry::new());

    let frames = collect_frames(Arc::clone(&backend), registry, user_turn("oi")).await;
    let finish = frames
        .iter()
        .find(|f| matches!(f, FrameEvent::Finish { .. }))
        .expect("finish frame");
    let value = frame_json(finish);
    assert_eq!(
        value["messageMetadata"]["usage"],
        json!({"promptTokens": 3, "completionTokens": 2})
    );
}

#[tokio::test]
async fn frame_sequence_invariants_hold_across_scenarios() {
    let scenarios: Vec<Vec<ScriptedRound>> = vec![
        vec![vec![text_chunk("a"), finish_chunk("stop")]],
        vec![vec![finish_chunk("stop")]],
        vec![vec![Err(UpstreamError::Connect("down".to_string()))]],
        vec![
            vec![
                tool_call_chunk(0, Some("c"), Some("search_edital"), Some("{}")),
                finish_chunk("tool_calls"),
            ],
            vec![text_chunk("b"), finish_chunk("stop")],
        ],
    ];

    for rounds in scenarios {
        let backend = ScriptedBackend::new(rounds);
        let tool = StubSearchTool::new(json!({}));
        let registry = registry_with(tool);
        let frames = collect_frames(backend, registry, user_turn("oi")).await;

        let starts = frames
            .iter()
            .filter(|f| matches!(f, FrameEvent::Start { .. }))
            .count();
        assert_eq!(starts, 1, "exactly one start frame");

        let text_starts = frames
            .iter()
            .filter(|f| matches!(f, FrameEvent::TextStart { .. }))
            .count();
        let text_ends = frames
            .iter()
            .filter(|f| matches!(f, FrameEvent::TextEnd { .. }))
            .count();
        assert!(text_starts <= 1, "at most one text-start");
        assert_eq!(text_starts, text_ends, "text-start and text-end pair up");

        let dones = frames
            .iter()
            .filter(|f| matches!(f, FrameEvent::Done))
            .count();
        assert_eq!(dones, 1, "exactly one terminator");
        assert_eq!(frames.last(), Some(&FrameEvent::Done), "terminator is last");
    }
}

#[tokio::test]
async fn dropped_receiver_tears_the_turn_down_without_running_tools() {
    let backend = ScriptedBackend::new(vec![
        vec![
            tool_call_chunk(0, Some("call_1"), Some("search_edital"), Some("{}")),
            finish_chunk("tool_calls"),
        ],
        vec![text_chunk("never"), finish_chunk("stop")],
    ]);
    let tool = StubSearchTool::new(json!({}));
    let registry = registry_with(Arc::clone(&tool));
    let tools: Arc<[ToolDefinition]> = registry.definitions().into();

    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let driver = tokio::spawn(drive_turn(
        Arc::clone(&backend) as Arc<dyn CompletionBackend>,
        registry,
        tools,
        user_turn("oi"),
        tx,
    ));
    driver.await.expect("driver");

    // The very first send fails, so no provider round and no tool ran.
    assert_eq!(backend.round_count(), 0);
    assert_eq!(tool.invocations.load(Ordering::SeqCst), 0);
}
