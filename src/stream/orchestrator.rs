//! One-level tool orchestration between the two provider rounds.

use serde_json::{json, Value};

use crate::protocol::openai_chat::{ChatMessage, ToolCall};
use crate::stream::translator::ToolCallAccumulator;
use crate::tools::ToolRegistry;

/// Execute every accumulated tool call and build the messages appended to
/// the conversation before the second provider round: one assistant
/// message declaring the calls, then one tool-role result message per
/// call.
///
/// The assistant declaration lists calls in stream arrival order;
/// execution (and therefore result order) is ascending index, so the
/// result sequence is deterministic no matter how the provider
/// interleaved the fragments. Calls run one at a time: the provider
/// requires results in call order and nothing else reads the stream
/// while a tool runs.
///
/// Failures never abort the turn. A registry miss, an unparseable
/// argument buffer, or a tool error each become a structured
/// `{"error": ...}` result the model can react to.
pub async fn run_tool_calls(
    accumulator: &ToolCallAccumulator,
    registry: &ToolRegistry,
) -> (ChatMessage, Vec<ChatMessage>) {
    let declarations: Vec<ToolCall> = accumulator
        .iter_arrival()
        .map(|(_, buffer)| {
            ToolCall::function(
                buffer.id.clone().unwrap_or_default(),
                buffer.name.clone().unwrap_or_default(),
                buffer.arguments.clone(),
            )
        })
        .collect();
    let assistant = ChatMessage::assistant_tool_calls(declarations);

    let mut results = Vec::with_capacity(accumulator.len());
    for (index, buffer) in accumulator.iter_ascending() {
        let tool_call_id = buffer.id.clone().unwrap_or_default();
        let tool_name = buffer.name.as_deref().unwrap_or_default();
        let content = execute_call(registry, tool_name, &buffer.arguments).await;
        tracing::debug!(index, tool = tool_name, "tool call finished");
        results.push(ChatMessage::tool_result(tool_call_id, content));
    }

    (assistant, results)
}

async fn execute_call(registry: &ToolRegistry, tool_name: &str, raw_arguments: &str) -> String {
    let arguments = if raw_arguments.is_empty() {
        json!({})
    } else {
        match serde_json::from_str::<Value>(raw_arguments) {
            Ok(value) => value,
            Err(err) => return error_result(&err.to_string()),
        }
    };

    let Some(tool) = registry.get(tool_name) else {
        return error_result(&format!("Tool '{tool_name}' not found."));
    };

    match tool.invoke(arguments).await {
        Ok(value) => {
            serde_json::to_string(&value).unwrap_or_else(|err| error_result(&err.to_string()))
        }
        Err(err) => error_result(&err.to_string()),
    }
}

fn error_result(message: &str) -> String {
    serde_json::to_string(&json!({ "error": message }))
        .unwrap_or_else(|_| "{\"error\":\"tool failure\"}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::protocol::openai_chat::ToolDefinition;
    use crate::tools::Tool;
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;

    struct EchoTool;

    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition::function("echo", "Echoes its arguments.", json!({"type": "object"}))
        }

        fn invoke(&self, arguments: Value) -> BoxFuture<'_, Result<Value, ToolError>> {
            async move { Ok(json!({ "echo": arguments })) }.boxed()
        }
    }

    struct FailingTool;

    impl Tool for FailingTool {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition::function("broken", "Always fails.", json!({"type": "object"}))
        }

        fn invoke(&self, _arguments: Value) -> BoxFuture<'_, Result<Value, ToolError>> {
            async move { Err(ToolError::Execution("index unavailable".to_string())) }.boxed()
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(std::sync::Arc::new(EchoTool));
        registry.register(std::sync::Arc::new(FailingTool));
        registry
    }

    fn accumulator_with(calls: &[(u32, &str, &str, &str)]) -> ToolCallAccumulator {
        let mut accumulator = ToolCallAccumulator::new();
        for (index, id, name, arguments) in calls {
            let buffer = accumulator.entry(*index);
            buffer.id = Some((*id).to_string());
            buffer.name = Some((*name).to_string());
            buffer.arguments = (*arguments).to_string();
            buffer.started = true;
        }
        accumulator
    }

    #[tokio::test]
    async fn success_result_is_json_encoded() {
        let accumulator =
            accumulator_with(&[(0, "call_1", "echo", "{\"query\":\"abc\"}")]);
        let (assistant, results) = run_tool_calls(&accumulator, &registry()).await;

        let declared = assistant.tool_calls.as_ref().expect("tool_calls");
        assert_eq!(declared[0].function.arguments, "{\"query\":\"abc\"}");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].role, "tool");
        assert_eq!(results[0].tool_call_id.as_deref(), Some("call_1"));
        let content = serde_json::to_value(&results[0]).expect("serialize");
        assert_eq!(
            content["content"],
            "{\"echo\":{\"query\":\"abc\"}}"
        );
    }

    #[tokio::test]
    async fn registry_miss_produces_structured_error() {
        let accumulator = accumulator_with(&[(0, "call_1", "missing", "{}")]);
        let (_, results) = run_tool_calls(&accumulator, &registry()).await;
        let value = serde_json::to_value(&results[0]).expect("serialize");
        assert_eq!(
            value["content"],
            "{\"error\":\"Tool 'missing' not found.\"}"
        );
    }

    #[tokio::test]
    async fn unparseable_arguments_produce_structured_error() {
        let accumulator = accumulator_with(&[(0, "call_1", "echo", "{\"query\":")]);
        let (_, results) = run_tool_calls(&accumulator, &registry()).await;
        let value = serde_json::to_value(&results[0]).expect("serialize");
        let content = value["content"].as_str().expect("string content");
        let parsed: Value = serde_json::from_str(content).expect("error object");
        assert!(parsed["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn empty_argument_buffer_parses_as_empty_object() {
        let accumulator = accumulator_with(&[(0, "call_1", "echo", "")]);
        let (_, results) = run_tool_calls(&accumulator, &registry()).await;
        let value = serde_json::to_value(&results[0]).expect("serialize");
        assert_eq!(value["content"], "{\"echo\":{}}");
    }

    #[tokio::test]
    async fn tool_failure_continues_with_error_result() {
        let accumulator = accumulator_with(&[
            (1, "call_b", "broken", "{}"),
            (0, "call_a", "echo", "{}"),
        ]);
        let (assistant, results) = run_tool_calls(&accumulator, &registry()).await;

        // Declarations keep arrival order; results are ascending by index.
        let declared = assistant.tool_calls.as_ref().expect("tool_calls");
        assert_eq!(declared[0].id, "call_b");
        assert_eq!(declared[1].id, "call_a");

        assert_eq!(results[0].tool_call_id.as_deref(), Some("call_a"));
        assert_eq!(results[1].tool_call_id.as_deref(), Some("call_b"));
        let broken = serde_json::to_value(&results[1]).expect("serialize");
        assert_eq!(
            broken["content"],
            "{\"error\":\"tool execution failed: index unavailable\"}"
        );
    }
}
