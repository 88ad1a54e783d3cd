use std::sync::Arc;

use crate::config::AppConfig;
use crate::protocol::openai_chat::ToolDefinition;
use crate::store::ChatStore;
use crate::tools::ToolRegistry;
use crate::upstream::CompletionBackend;

/// Fixed instruction prompt for the edital assistant, used unless the
/// config overrides it.
const DEFAULT_SYSTEM_PROMPT: &str = "Você é um assistente especialista no edital do Vestibular Unicamp 2026.
Sua missão é responder perguntas sobre o vestibular.

REGRAS ESTABELECIDAS:
1.  Para perguntas sobre o vestibular, use a ferramenta `search_edital`.
2.  Se não encontrar a resposta, devolva: \"Não encontrei essa informação específica no edital.\"
3.  Procure ser direto ao ponto.
";

/// Shared application state accessible to all handlers.
///
/// Everything here is read-only during request handling: the backend,
/// tool registry and store are shared across concurrent turns without
/// synchronization.
pub struct AppState {
    pub config: AppConfig,
    pub backend: Arc<dyn CompletionBackend>,
    pub registry: Arc<ToolRegistry>,
    pub tool_definitions: Arc<[ToolDefinition]>,
    pub store: Arc<dyn ChatStore>,
    system_prompt: Arc<str>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn CompletionBackend>,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn ChatStore>,
    ) -> Self {
        let tool_definitions: Arc<[ToolDefinition]> = registry.definitions().into();
        let system_prompt: Arc<str> = config
            .features
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
            .into();
        Self {
            config,
            backend,
            registry,
            tool_definitions,
            store,
            system_prompt,
        }
    }

    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}
