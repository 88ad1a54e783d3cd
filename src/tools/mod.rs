pub mod search;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::ToolError;
use crate::protocol::openai_chat::ToolDefinition;

pub use search::SearchEditalTool;

/// A locally-executable tool the model can call.
///
/// Invocation is awaited inline by the turn driver, one call at a time;
/// implementations only need to be safe for concurrent use across turns.
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    /// The declaration sent to the provider with every request.
    fn definition(&self) -> ToolDefinition;

    /// Execute with already-parsed JSON arguments.
    fn invoke(&self, arguments: Value) -> BoxFuture<'_, Result<Value, ToolError>>;
}

/// Process-wide, read-only name-to-tool table shared across turns.
#[derive(Default)]
pub struct ToolRegistry {
    tools: FxHashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Declarations for every registered tool.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }
}
