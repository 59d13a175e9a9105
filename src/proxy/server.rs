//! HTTP server setup and configuration.

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::handlers;
use crate::config::Config;
use crate::router::Router as ProviderRouter;

/// Response header: correlation ID (UUID v4).
pub const REQUEST_ID_HEADER: &str = "x-genproxy-request-id";

/// Request bodies may carry base64 media in the conversation history.
const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ProviderRouter>,
    pub config: Arc<Config>,
}

/// Correlation ID attached to every request.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    request.extensions_mut().insert(id);
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let max_concurrent = state.config.server.max_concurrent_requests;
    Router::new()
        // Generation endpoints, prefixed by provider name (or `auto`)
        .route("/api/:provider/chat", post(handlers::chat))
        .route("/api/:provider/responses", post(handlers::responses))
        .route("/api/:provider/embeddings", post(handlers::embeddings))
        .route("/api/:provider/images", post(handlers::images))
        .route("/api/:provider/speech", post(handlers::speech))
        .route("/api/:provider/video", post(handlers::video))
        .route("/api/:provider/video/jobs", post(handlers::submit_video_job))
        .route("/api/:provider/video/:job_id", get(handlers::video_job_status))
        .route("/api/:provider/session", get(handlers::realtime_session))
        // genproxy extensions
        .route("/api/progresstext", get(handlers::progress_text))
        .route("/health", get(handlers::health))
        .route("/providers", get(handlers::list_providers))
        // State and middleware
        .layer(middleware::from_fn(assign_request_id))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        // One semaphore shared by every route
        .layer(GlobalConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Build the shared HTTP client used by every provider.
pub fn build_http_client() -> reqwest::Result<Client> {
    // No overall timeout: streams and video downloads can run for minutes.
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let http_client = build_http_client()?;
    let provider_router = ProviderRouter::from_config(&config, http_client)?;

    for provider in provider_router.providers() {
        tracing::info!(
            provider = %provider.name,
            kind = %provider.kind.as_str(),
            default = provider.default,
            models = ?provider.models,
            "Provider ready"
        );
    }

    let state = AppState {
        router: Arc::new(provider_router),
        config: Arc::new(config),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting genproxy server");

    axum::serve(listener, app).await?;

    Ok(())
}
