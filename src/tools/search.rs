use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::RetrievalConfig;
use crate::error::ToolError;
use crate::protocol::openai_chat::ToolDefinition;

use super::Tool;

/// The `search_edital` tool: queries the retrieval sidecar for relevant
/// passages of the Edital Unicamp 2026 and returns its JSON payload
/// unchanged as the tool result.
pub struct SearchEditalTool {
    http: reqwest::Client,
    search_url: String,
}

#[derive(Deserialize)]
struct SearchArguments {
    query: String,
}

impl SearchEditalTool {
    /// # Errors
    ///
    /// Returns [`ToolError::Execution`] when the HTTP client cannot be
    /// built.
    pub fn new(config: &RetrievalConfig) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| ToolError::Execution(format!("failed to build HTTP client: {err}")))?;
        let search_url = format!("{}/search", config.base_url.trim_end_matches('/'));
        Ok(Self { http, search_url })
    }

    async fn search(&self, query: String) -> Result<Value, ToolError> {
        let response = self
            .http
            .post(&self.search_url)
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(|err| ToolError::Execution(format!("retrieval request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Execution(format!(
                "retrieval service returned status {status}"
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| ToolError::Execution(format!("invalid retrieval response: {err}")))
    }
}

impl Tool for SearchEditalTool {
    fn name(&self) -> &'static str {
        "search_edital"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "search_edital",
            "Busca trechos relevantes do Edital Unicamp 2026. Recebe {\"query\": \"texto de busca\"}.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Pergunta ou termo a buscar no edital"
                    }
                },
                "required": ["query"]
            }),
        )
    }

    fn invoke(&self, arguments: Value) -> BoxFuture<'_, Result<Value, ToolError>> {
        async move {
            let arguments: SearchArguments = serde_json::from_value(arguments)
                .map_err(|err| ToolError::Arguments(err.to_string()))?;
            self.search(arguments.query).await
        }
        .boxed()
    }
}
