use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use edital_chat::config::{load_config, AppConfig};
use edital_chat::dispatch::dispatch_request;
use edital_chat::observability::init_tracing;
use edital_chat::state::AppState;
use edital_chat::store::JsonlChatStore;
use edital_chat::tools::{SearchEditalTool, ToolRegistry};
use edital_chat::upstream::ChatCompletionsClient;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;

fn main() {
    let config = load_config("config.yaml").unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);
    let runtime = build_runtime(&config);

    runtime.block_on(async move {
        run(config).await;
    });
}

fn build_runtime(config: &AppConfig) -> tokio::runtime::Runtime {
    let mut builder = if config.server.runtime_worker_threads == Some(1) {
        tokio::runtime::Builder::new_current_thread()
    } else {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if let Some(threads) = config.server.runtime_worker_threads {
            builder.worker_threads(threads);
        }
        builder
    };
    builder.enable_io();
    builder.enable_time();
    builder.build().unwrap_or_else(|e| {
        eprintln!("Failed to initialize Tokio runtime: {e}");
        std::process::exit(1);
    })
}

async fn run(config: AppConfig) {
    let host = config.server.host.clone();
    let port = config.server.port;

    let backend = ChatCompletionsClient::new(&config.upstream).unwrap_or_else(|e| {
        eprintln!("Failed to build completion client: {e}");
        std::process::exit(1);
    });
    let search_tool = SearchEditalTool::new(&config.retrieval).unwrap_or_else(|e| {
        eprintln!("Failed to build retrieval client: {e}");
        std::process::exit(1);
    });
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(search_tool));
    let store = JsonlChatStore::new(&config.persistence.path);

    let state = Arc::new(AppState::new(
        config,
        Arc::new(backend),
        Arc::new(registry),
        Arc::new(store),
    ));

    tracing::info!(
        "edital-chat starting on {}:{} (model='{}')",
        host,
        port,
        state.config.upstream.model
    );

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}"))
        .await
        .unwrap_or_else(|err| {
            eprintln!("Failed to bind to {host}:{port}: {err}");
            std::process::exit(1);
        });

    tracing::info!("edital-chat is ready to accept connections");

    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok((stream, remote_addr)) => (stream, remote_addr),
            Err(err) => {
                eprintln!("Accept error: {err}");
                continue;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!("failed to enable TCP_NODELAY for {remote_addr}: {err}");
        }

        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let request_state = Arc::clone(&state);
        let hyper_service = service_fn(move |request: Request<Incoming>| {
            dispatch_request(Arc::clone(&request_state), request.map(Body::new))
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, hyper_service).await {
                tracing::debug!("failed to serve connection from {remote_addr}: {err:#}");
            }
        });
    }
}
