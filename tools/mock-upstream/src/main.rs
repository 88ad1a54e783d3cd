//! Mock OpenAI-compatible upstream for manual end-to-end runs.
//!
//! Serves canned chat-completion chunk streams. Scenarios are picked via
//! `MOCK_SCENARIO`:
//! - `text` (default): a short streamed text answer.
//! - `tool`: a tool-call round first; once the request body carries a
//!   tool result message, a streamed text answer — so a full two-round
//!   turn works against it.
//! - `error`: a 503 with a JSON error body.

use std::convert::Infallible;
use std::env;
use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;

const DEFAULT_UPSTREAM_PORT: u16 = 19_001;

#[derive(Copy, Clone)]
enum MockScenario {
    Text,
    Tool,
    Error,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let port = env_u16("UPSTREAM_PORT", DEFAULT_UPSTREAM_PORT);
    let scenario = parse_scenario();
    let state = Arc::new(scenario);

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind mock upstream on 127.0.0.1:{port}: {err}"));

    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok((stream, remote_addr)) => (stream, remote_addr),
            Err(err) => {
                eprintln!("accept error: {err}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let service_state = Arc::clone(&state);
        let service = service_fn(move |request: Request<Incoming>| {
            let scenario = *service_state;
            async move { Ok::<_, Infallible>(handle_request(request, scenario).await) }
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, service).await {
                eprintln!("mock upstream connection error from {remote_addr}: {err}");
            }
        });
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

fn parse_scenario() -> MockScenario {
    match env::var("MOCK_SCENARIO").as_deref() {
        Ok("tool") => MockScenario::Tool,
        Ok("error") => MockScenario::Error,
        Ok("text") | Err(_) => MockScenario::Text,
        Ok(other) => {
            eprintln!("unknown MOCK_SCENARIO '{other}', fallback to text");
            MockScenario::Text
        }
    }
}

async fn handle_request(
    request: Request<Incoming>,
    scenario: MockScenario,
) -> Response<Full<Bytes>> {
    let (parts, body) = request.into_parts();
    let body_bytes = body
        .collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .unwrap_or_default();

    if parts.method != Method::POST {
        return simple_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "application/json",
            br#"{"error":"method_not_allowed"}"#,
        );
    }
    let path = parts.uri.path();
    if path != "/v1/chat/completions" && path != "/chat/completions" {
        return simple_response(
            StatusCode::NOT_FOUND,
            "application/json",
            br#"{"error":"not_found"}"#,
        );
    }

    match scenario {
        MockScenario::Error => simple_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "application/json",
            br#"{"error":{"message":"mock_injected_error","type":"server_error"}}"#,
        ),
        MockScenario::Text => streaming_response(STREAM_TEXT),
        MockScenario::Tool => {
            // A body carrying a tool result means this is round two.
            if body_contains(&body_bytes, br#""role":"tool""#) {
                streaming_response(STREAM_TEXT_AFTER_TOOL)
            } else {
                streaming_response(STREAM_TOOL_CALL)
            }
        }
    }
}

fn body_contains(body: &[u8], needle: &[u8]) -> bool {
    body.windows(needle.len()).any(|window| window == needle)
}

fn streaming_response(body: &'static [u8]) -> Response<Full<Bytes>> {
    let mut response = simple_response(StatusCode::OK, "text/event-stream", body);
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn simple_response(
    status: StatusCode,
    content_type: &'static str,
    body: &'static [u8],
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

const STREAM_TEXT: &[u8] = b"data: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Ol\xc3\xa1\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\" mundo\"},\"finish_reason\":\"stop\"}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[],\"usage\":{\"prompt_tokens\":12,\"completion_tokens\":2,\"total_tokens\":14}}\n\ndata: [DONE]\n\n";

const STREAM_TOOL_CALL: &[u8] = b"data: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"tool_calls\":[{\"index\":0,\"id\":\"call_mock\",\"type\":\"function\",\"function\":{\"name\":\"search_edital\",\"arguments\":\"\"}}]},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"que\"}}]},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"ry\\\":\\\"vagas\\\"}\"}}]},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\ndata: [DONE]\n\n";

const STREAM_TEXT_AFTER_TOOL: &[u8] = b"data: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Encontrei no edital.\"},\"finish_reason\":null}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\ndata: {\"id\":\"chatcmpl-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[],\"usage\":{\"prompt_tokens\":40,\"completion_tokens\":5,\"total_tokens\":45}}\n\ndata: [DONE]\n\n";
