//! HTTP client for the OpenAI-compatible completion provider.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, Stream, StreamExt};

use crate::config::UpstreamConfig;
use crate::error::{sanitize_upstream_error, UpstreamError};
use crate::protocol::openai_chat::{
    ChatCompletionRequest, ChatMessage, ChatStreamChunk, StreamOptions, ToolDefinition,
};
use crate::stream::sse::{feed_utf8, SseParser};
use crate::stream::{is_done_event, SseEvent};

/// A lazy, finite, non-restartable sequence of provider chunks.
pub type ChunkStream = BoxStream<'static, Result<ChatStreamChunk, UpstreamError>>;

/// Issues one streaming completion round. Abstracted so tests can script
/// chunk sequences without a live provider.
pub trait CompletionBackend: Send + Sync {
    fn stream_completion(
        &self,
        messages: Vec<ChatMessage>,
        tools: Arc<[ToolDefinition]>,
    ) -> BoxFuture<'_, Result<ChunkStream, UpstreamError>>;
}

/// Production backend speaking `POST {base_url}/chat/completions` with
/// `stream: true` and usage reporting enabled.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    completions_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsClient {
    /// # Errors
    ///
    /// Returns [`UpstreamError::Connect`] when the HTTP client cannot be
    /// built.
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| {
                UpstreamError::Connect(format!("failed to build HTTP client: {err}"))
            })?;
        let completions_url = format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        Ok(Self {
            http,
            completions_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn open_stream(
        &self,
        messages: Vec<ChatMessage>,
        tools: Arc<[ToolDefinition]>,
    ) -> Result<ChunkStream, UpstreamError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.to_vec())
            },
        };

        let mut builder = self.http.post(&self.completions_url).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| UpstreamError::Connect(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message: sanitize_upstream_error(&body),
            });
        }

        Ok(chunk_stream(response.bytes_stream()))
    }
}

impl CompletionBackend for ChatCompletionsClient {
    fn stream_completion(
        &self,
        messages: Vec<ChatMessage>,
        tools: Arc<[ToolDefinition]>,
    ) -> BoxFuture<'_, Result<ChunkStream, UpstreamError>> {
        self.open_stream(messages, tools).boxed()
    }
}

/// Decode an SSE byte stream into completion chunks.
///
/// Ends cleanly at the `[DONE]` marker or body end. Transport and JSON
/// decode failures surface as one `Err` item, after which the stream is
/// finished; callers abandon the turn on the first error.
pub fn chunk_stream<S, E>(byte_stream: S) -> ChunkStream
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            SseParser::new(),
            Vec::<u8>::new(),
            Vec::<SseEvent>::new(),
            VecDeque::<SseEvent>::new(),
            false,
        ),
        |(mut bytes, mut parser, mut carry, mut parsed, mut pending, mut finished)| async move {
            loop {
                if finished {
                    return None;
                }

                while let Some(event) = pending.pop_front() {
                    if is_done_event(&event) {
                        return None;
                    }
                    let item = match serde_json::from_str::<ChatStreamChunk>(&event.data) {
                        Ok(chunk) => Ok(chunk),
                        Err(err) => {
                            finished = true;
                            Err(UpstreamError::Decode(err.to_string()))
                        }
                    };
                    return Some((item, (bytes, parser, carry, parsed, pending, finished)));
                }

                match bytes.as_mut().next().await {
                    Some(Ok(chunk)) => {
                        feed_utf8(&mut parser, &mut carry, &chunk, &mut parsed);
                        pending.extend(parsed.drain(..));
                    }
                    Some(Err(err)) => {
                        finished = true;
                        let item = Err(UpstreamError::Connect(err.to_string()));
                        return Some((item, (bytes, parser, carry, parsed, pending, finished)));
                    }
                    None => return None,
                }
            }
        },
    )
    .boxed()
}
