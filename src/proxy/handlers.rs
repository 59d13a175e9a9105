//! HTTP request handlers.
//!
//! Input is validated before any provider call (400 on failure). Once a
//! handler returns a streaming body, every outcome travels as frames.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Extension, Path, Query, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use super::jobs::{self, JobCheck, PollSettings};
use super::server::{AppState, RequestId};
use super::stream::{self, GenerationRequest};
use super::types::{
    ChatRequest, EmbeddingRequest, ImageRequest, SessionQuery, SpeechRequest, VideoBody,
};
use crate::error::{Error, Result};
use crate::protocol::{unescape_job_id, FrameWriter, THINKING_MARKER};
use crate::provider::{ProviderClient, VideoRequest};
use crate::router::{ProviderHandle, AUTO_PROVIDER};

/// Response header: provider name that handled the request.
pub const PROVIDER_HEADER: &str = "x-genproxy-provider";

/// Model used for video requests that name none.
pub const DEFAULT_VIDEO_MODEL: &str = "sora";

const EVENT_STREAM: &str = "text/event-stream";
const JSON: &str = "application/json";

/// Wrap a frame channel as a response body.
fn frame_response(content_type: &'static str, provider: &str, frames: ReceiverStream<Bytes>) -> Response {
    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames.map(Ok::<_, Infallible>)),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(provider) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(PROVIDER_HEADER), value);
    }
    response
}

/// Spawn the producer task for a generation request and stream its frames.
fn spawn_generation(
    client: Arc<dyn ProviderClient>,
    request: GenerationRequest,
    streaming_enabled: bool,
    content_type: &'static str,
) -> Response {
    let (mut writer, frames) = FrameWriter::channel();
    let provider = client.name().to_string();
    tokio::spawn(async move {
        stream::run(&request, client.as_ref(), &mut writer, streaming_enabled).await;
    });
    frame_response(content_type, &provider, frames)
}

fn streaming_content_type(state: &AppState) -> &'static str {
    if state.config.streaming.enabled {
        EVENT_STREAM
    } else {
        JSON
    }
}

/// Handle POST /api/:provider/chat
pub async fn chat(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(provider): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Response> {
    tracing::info!(
        request_id = %request_id.0,
        provider = %provider,
        model = %request.model,
        "Received chat request"
    );

    let caps = state.router.capabilities(&request.model);
    let generation = GenerationRequest::chat(
        request,
        state.config.streaming.system_instructions.as_deref(),
        &caps,
    )?;
    let client = state.router.resolve(&provider, &generation.model)?.client()?.clone();

    Ok(spawn_generation(
        client,
        generation,
        state.config.streaming.enabled,
        streaming_content_type(&state),
    ))
}

/// Handle POST /api/:provider/responses
pub async fn responses(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(provider): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Response> {
    tracing::info!(
        request_id = %request_id.0,
        provider = %provider,
        model = %request.model,
        "Received responses request"
    );

    let caps = state.router.capabilities(&request.model);
    let generation = GenerationRequest::responses(
        request,
        state.config.streaming.system_instructions.as_deref(),
        &caps,
    )?;
    let client = state.router.resolve(&provider, &generation.model)?.client()?.clone();

    Ok(spawn_generation(
        client,
        generation,
        state.config.streaming.enabled,
        streaming_content_type(&state),
    ))
}

/// Handle POST /api/:provider/embeddings
pub async fn embeddings(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(request): Json<EmbeddingRequest>,
) -> Result<Response> {
    tracing::info!(provider = %provider, model = %request.model, "Received embeddings request");

    let generation = GenerationRequest::embedding(request)?;
    let client = state.router.resolve(&provider, &generation.model)?.client()?.clone();
    Ok(spawn_generation(client, generation, false, JSON))
}

/// Handle POST /api/:provider/images
pub async fn images(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(request): Json<ImageRequest>,
) -> Result<Response> {
    tracing::info!(provider = %provider, model = ?request.model, "Received image request");

    let generation = GenerationRequest::image(request)?;
    let client = state.router.resolve(&provider, &generation.model)?.client()?.clone();
    Ok(spawn_generation(client, generation, false, JSON))
}

/// Handle POST /api/:provider/speech
pub async fn speech(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(request): Json<SpeechRequest>,
) -> Result<Response> {
    tracing::info!(provider = %provider, model = %request.model, "Received speech request");

    let generation = GenerationRequest::speech(request)?;
    let client = state.router.resolve(&provider, &generation.model)?.client()?.clone();
    Ok(spawn_generation(client, generation, false, JSON))
}

fn video_request(body: VideoBody) -> Result<VideoRequest> {
    let prompt = body
        .prompt
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::BadRequest("No text input provided".to_string()))?;
    Ok(VideoRequest {
        model: body
            .model
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_VIDEO_MODEL.to_string()),
        prompt,
        params: body.params,
    })
}

/// Handle POST /api/:provider/video
///
/// Blocking mode: the connection stays open until the job finishes.
pub async fn video(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(body): Json<VideoBody>,
) -> Result<Response> {
    let request = video_request(body)?;
    tracing::info!(provider = %provider, model = %request.model, "Received video request");

    let handle = state.router.resolve(&provider, &request.model)?;
    let video = handle.video()?.clone();
    let settings = PollSettings::from(&state.config.video);

    let (mut writer, frames) = FrameWriter::channel();
    tokio::spawn(async move {
        jobs::run_blocking(&request, video.as_ref(), &mut writer, &settings).await;
    });
    Ok(frame_response(JSON, &handle.name, frames))
}

/// Handle POST /api/:provider/video/jobs
///
/// Decoupled mode: returns a thinking frame and the escaped job id.
pub async fn submit_video_job(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(body): Json<VideoBody>,
) -> Result<Response> {
    let request = video_request(body)?;
    tracing::info!(provider = %provider, model = %request.model, "Received video job submission");

    let handle = state.router.resolve(&provider, &request.model)?;
    let escaped = jobs::submit_job(&request, handle.video()?.as_ref()).await?;
    tracing::info!(provider = %handle.name, job_id = %escaped, "Video job submitted");

    let (mut writer, frames) = FrameWriter::channel();
    if writer.thinking().await.is_ok() {
        writer.job_id(escaped).await;
    }
    drop(writer);
    Ok(frame_response(JSON, &handle.name, frames))
}

/// Provider for a decoupled status check; `auto` routes by the job id,
/// which for Gemini operations embeds the model name.
fn job_provider<'a>(state: &'a AppState, provider: &str, job_id: &str) -> Result<&'a ProviderHandle> {
    if provider == AUTO_PROVIDER {
        state.router.route(&unescape_job_id(job_id))
    } else {
        state.router.provider(provider)
    }
}

/// Handle GET /api/:provider/video/:job_id
///
/// Empty 200 while the job runs, the base64 asset when it is done, and a
/// 500 carrying the failure reasons otherwise.
pub async fn video_job_status(
    State(state): State<AppState>,
    Path((provider, job_id)): Path<(String, String)>,
) -> Result<Response> {
    if job_id.trim().is_empty() {
        return Err(Error::BadRequest(
            "Invalid request parameters, .../:jobId expected".to_string(),
        ));
    }
    let video = job_provider(&state, &provider, &job_id)?.video()?.clone();
    let settings = PollSettings::from(&state.config.video);

    let text = |status: StatusCode, body: String| {
        (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
    };

    Ok(match jobs::check_job(&job_id, video.as_ref(), &settings).await {
        Ok(JobCheck::Pending) => StatusCode::OK.into_response(),
        Ok(JobCheck::Ready(encoded)) => text(StatusCode::OK, encoded),
        Ok(JobCheck::Failed(message)) => {
            tracing::warn!(job_id = %job_id, reason = %message, "Video job failed");
            text(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Video status check failed");
            text(StatusCode::INTERNAL_SERVER_ERROR, e.message)
        }
    })
}

/// Handle GET /api/:provider/session
pub async fn realtime_session(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<serde_json::Value>> {
    let caps = state.router.capabilities(&query.model);
    tracing::info!(
        provider = %provider,
        model = %query.model,
        generation = ?caps.api_generation,
        "Issuing realtime session"
    );
    let client = state.router.resolve(&provider, &query.model)?.client()?.clone();
    let session = client
        .realtime_session(&query.model, caps.api_generation)
        .await?;
    Ok(Json(session))
}

/// Handle GET /api/progresstext
pub async fn progress_text() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html")], THINKING_MARKER)
}

/// Handle GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "genproxy",
        "streaming": state.config.streaming.enabled,
        "providers": state.router.providers().len(),
    }))
}

/// Handle GET /providers
pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    let providers: Vec<serde_json::Value> = state
        .router
        .providers()
        .iter()
        .map(|p| {
            serde_json::json!({
                "name": p.name,
                "kind": p.kind,
                "models": p.models,
                "default": p.default,
                "chat": p.has_client(),
                "video": p.has_video(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "providers": providers
    }))
}
