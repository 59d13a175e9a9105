//! HTTP client for OpenAI and Azure OpenAI.
//!
//! Both flavors share request bodies and response shapes; they differ in
//! URL layout (Azure routes through a deployment and an `api-version`
//! query parameter) and in the authentication header.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    ensure_success, sse, AsyncJob, JobStatus, ProviderClient, ProviderError, StreamingResult,
    VideoJobs, VideoRequest,
};
use crate::config::ApiKey;
use crate::router::ApiGeneration;

/// Default Azure API version for the video jobs API.
const DEFAULT_VIDEO_API_VERSION: &str = "preview";

/// Voice used for realtime sessions.
const REALTIME_VOICE: &str = "verse";

/// Which URL layout and auth scheme to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAiFlavor {
    OpenAi,
    Azure,
}

/// Client for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    name: String,
    flavor: OpenAiFlavor,
    base_url: String,
    api_key: Option<ApiKey>,
    api_version: Option<String>,
    video_api_version: String,
    deployments: HashMap<String, String>,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(
        name: impl Into<String>,
        flavor: OpenAiFlavor,
        base_url: impl Into<String>,
        api_key: Option<ApiKey>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            flavor,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            api_version: None,
            video_api_version: DEFAULT_VIDEO_API_VERSION.to_string(),
            deployments: HashMap::new(),
            http,
        }
    }

    /// Azure `api-version` query parameter for inference calls.
    pub fn with_api_version(mut self, version: Option<String>) -> Self {
        self.api_version = version;
        self
    }

    /// Azure `api-version` for the video jobs API.
    pub fn with_video_api_version(mut self, version: Option<String>) -> Self {
        if let Some(version) = version {
            self.video_api_version = version;
        }
        self
    }

    /// Model name to Azure deployment name overrides.
    pub fn with_deployments(mut self, deployments: HashMap<String, String>) -> Self {
        self.deployments = deployments;
        self
    }

    fn deployment_for<'a>(&'a self, model: &'a str) -> &'a str {
        self.deployments
            .get(model)
            .map(String::as_str)
            .unwrap_or(model)
    }

    fn api_version_query(&self) -> String {
        match &self.api_version {
            Some(v) => format!("?api-version={}", v),
            None => String::new(),
        }
    }

    /// URL for a model-scoped inference operation (`chat/completions`, ...).
    fn inference_url(&self, path: &str, body: &Value) -> String {
        match self.flavor {
            OpenAiFlavor::OpenAi => format!("{}/{}", self.base_url, path),
            OpenAiFlavor::Azure => {
                let model = body.get("model").and_then(Value::as_str).unwrap_or_default();
                format!(
                    "{}/openai/deployments/{}/{}{}",
                    self.base_url,
                    self.deployment_for(model),
                    path,
                    self.api_version_query()
                )
            }
        }
    }

    fn responses_url(&self) -> String {
        match self.flavor {
            OpenAiFlavor::OpenAi => format!("{}/responses", self.base_url),
            OpenAiFlavor::Azure => {
                format!("{}/openai/responses{}", self.base_url, self.api_version_query())
            }
        }
    }

    fn video_url(&self, path: &str) -> String {
        match self.flavor {
            OpenAiFlavor::OpenAi => format!("{}/video/generations/{}", self.base_url, path),
            OpenAiFlavor::Azure => format!(
                "{}/openai/v1/video/generations/{}?api-version={}",
                self.base_url, path, self.video_api_version
            ),
        }
    }

    /// Video URL with each of `segments` appended as one encoded path segment.
    ///
    /// Job ids come back from clients, so `/`, `?` and `#` inside them are
    /// escaped rather than interpreted.
    fn video_job_url(&self, segments: &[&str]) -> Result<String, ProviderError> {
        if segments
            .iter()
            .any(|s| s.is_empty() || *s == "." || *s == "..")
        {
            return Err(ProviderError::new(format!(
                "Invalid video job reference '{}'",
                segments.join("/")
            ))
            .with_status(400));
        }
        let mut url = reqwest::Url::parse(&self.video_url(""))
            .map_err(|e| ProviderError::new(format!("Invalid provider URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::new("Provider URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url.into())
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.api_key, self.flavor) {
            (Some(key), OpenAiFlavor::OpenAi) => builder.bearer_auth(key.expose_secret()),
            (Some(key), OpenAiFlavor::Azure) => builder.header("api-key", key.expose_secret()),
            (None, _) => builder,
        }
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<reqwest::Response, ProviderError> {
        tracing::debug!(provider = %self.name, url = %url, "Calling provider");
        let response = self
            .authorize(self.http.post(url))
            .header(CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await?;
        ensure_success(response).await
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, ProviderError> {
        tracing::debug!(provider = %self.name, url = %url, "Polling provider");
        let response = self.authorize(self.http.get(url)).send().await?;
        ensure_success(response).await
    }

    /// POST with an explicit `stream` flag.
    ///
    /// Only an event-stream response is treated as a stream; anything else
    /// is a single payload even if streaming was requested.
    async fn call(
        &self,
        url: &str,
        mut body: Value,
        stream: bool,
    ) -> Result<StreamingResult, ProviderError> {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("stream".to_string(), Value::Bool(stream));
        }
        let response = self.post_json(url, &body).await?;

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if stream && is_event_stream {
            Ok(StreamingResult::Stream(sse::chunk_stream(
                response.bytes_stream(),
            )))
        } else {
            Ok(StreamingResult::Single(response.json().await?))
        }
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, body: Value, stream: bool) -> Result<StreamingResult, ProviderError> {
        let url = self.inference_url("chat/completions", &body);
        self.call(&url, body, stream).await
    }

    async fn responses(
        &self,
        body: Value,
        stream: bool,
    ) -> Result<StreamingResult, ProviderError> {
        let url = self.responses_url();
        self.call(&url, body, stream).await
    }

    async fn embeddings(&self, body: Value) -> Result<Value, ProviderError> {
        let url = self.inference_url("embeddings", &body);
        Ok(self.post_json(&url, &body).await?.json().await?)
    }

    async fn images(&self, body: Value) -> Result<Value, ProviderError> {
        let url = self.inference_url("images/generations", &body);
        Ok(self.post_json(&url, &body).await?.json().await?)
    }

    async fn speech(&self, body: Value) -> Result<Bytes, ProviderError> {
        let url = self.inference_url("audio/speech", &body);
        Ok(self.post_json(&url, &body).await?.bytes().await?)
    }

    async fn realtime_session(
        &self,
        model: &str,
        generation: ApiGeneration,
    ) -> Result<Value, ProviderError> {
        if self.flavor == OpenAiFlavor::Azure {
            return Err(ProviderError::unsupported("realtime sessions", &self.name));
        }
        let (url, body) = match generation {
            ApiGeneration::Ga => (
                format!("{}/realtime/client_secrets", self.base_url),
                json!({
                    "session": {
                        "type": "realtime",
                        "model": model,
                        "audio": { "output": { "voice": REALTIME_VOICE } }
                    }
                }),
            ),
            ApiGeneration::Preview => (
                format!("{}/realtime/sessions", self.base_url),
                json!({
                    "model": model,
                    "modalities": ["audio", "text"],
                    "voice": REALTIME_VOICE,
                    "input_audio_transcription": { "model": "whisper-1" },
                    "input_audio_noise_reduction": { "type": "far_field" }
                }),
            ),
        };
        Ok(self.post_json(&url, &body).await?.json().await?)
    }
}

#[derive(Deserialize)]
struct VideoJobCreated {
    id: String,
}

#[derive(Deserialize)]
struct VideoJobState {
    id: String,
    status: String,
    #[serde(default)]
    generations: Vec<VideoGeneration>,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[derive(Deserialize)]
struct VideoGeneration {
    id: String,
}

fn map_video_status(status: &str) -> JobStatus {
    match status {
        "queued" | "preprocessing" => JobStatus::Queued,
        "running" | "processing" | "in_progress" => JobStatus::Running,
        "succeeded" | "completed" => JobStatus::Succeeded,
        "failed" => JobStatus::Failed,
        "cancelled" | "canceled" => JobStatus::Cancelled,
        other => {
            tracing::warn!(status = %other, "Unknown video job status, treating as running");
            JobStatus::Running
        }
    }
}

/// Defaults applied to Sora-style job requests unless overridden.
fn video_job_body(request: &VideoRequest) -> Value {
    let mut body = serde_json::Map::new();
    body.insert("model".into(), json!(request.model));
    body.insert("prompt".into(), json!(request.prompt));
    body.insert("width".into(), json!(480));
    body.insert("height".into(), json!(480));
    body.insert("n_seconds".into(), json!(5));
    body.insert("n_variants".into(), json!(1));
    for (key, value) in &request.params {
        body.insert(key.clone(), value.clone());
    }
    Value::Object(body)
}

#[async_trait]
impl VideoJobs for OpenAiClient {
    async fn submit(&self, request: &VideoRequest) -> Result<String, ProviderError> {
        let url = self.video_url("jobs");
        let created: VideoJobCreated = self
            .post_json(&url, &video_job_body(request))
            .await?
            .json()
            .await?;
        tracing::info!(provider = %self.name, job_id = %created.id, "Video job created");
        Ok(created.id)
    }

    async fn status(&self, job_id: &str) -> Result<AsyncJob, ProviderError> {
        let url = self.video_job_url(&["jobs", job_id])?;
        let state: VideoJobState = self.get(&url).await?.json().await?;
        let mut job = AsyncJob::new(state.id, map_video_status(&state.status));
        job.result_refs = state.generations.into_iter().map(|g| g.id).collect();
        job.failure_reasons = state.failure_reason.into_iter().collect();
        Ok(job)
    }

    async fn fetch_asset(&self, result_ref: &str) -> Result<Bytes, ProviderError> {
        let url = self.video_job_url(&[result_ref, "content", "video"])?;
        Ok(self.get(&url).await?.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn azure() -> OpenAiClient {
        OpenAiClient::new(
            "azure",
            OpenAiFlavor::Azure,
            "https://example.openai.azure.com/",
            Some(ApiKey::from("k")),
            reqwest::Client::new(),
        )
        .with_api_version(Some("2025-01-01-preview".to_string()))
        .with_deployments(HashMap::from([(
            "gpt-4o".to_string(),
            "gpt4o-prod".to_string(),
        )]))
    }

    #[test]
    fn test_openai_inference_url() {
        let client = OpenAiClient::new(
            "openai",
            OpenAiFlavor::OpenAi,
            "https://api.openai.com/v1",
            None,
            reqwest::Client::new(),
        );
        let body = json!({"model": "gpt-4o-mini"});
        assert_eq!(
            client.inference_url("chat/completions", &body),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            client.video_url("jobs"),
            "https://api.openai.com/v1/video/generations/jobs"
        );
    }

    #[test]
    fn test_azure_inference_url_uses_deployment_map() {
        let client = azure();
        assert_eq!(
            client.inference_url("chat/completions", &json!({"model": "gpt-4o"})),
            "https://example.openai.azure.com/openai/deployments/gpt4o-prod/chat/completions?api-version=2025-01-01-preview"
        );
        assert_eq!(
            client.inference_url("embeddings", &json!({"model": "text-embedding-3-small"})),
            "https://example.openai.azure.com/openai/deployments/text-embedding-3-small/embeddings?api-version=2025-01-01-preview"
        );
    }

    #[test]
    fn test_azure_video_url() {
        assert_eq!(
            azure().video_url("jobs/task_1"),
            "https://example.openai.azure.com/openai/v1/video/generations/jobs/task_1?api-version=preview"
        );
        assert_eq!(
            azure().video_job_url(&["jobs", "task_1"]).unwrap(),
            "https://example.openai.azure.com/openai/v1/video/generations/jobs/task_1?api-version=preview"
        );
        assert_eq!(
            azure().video_job_url(&["gen_1", "content", "video"]).unwrap(),
            "https://example.openai.azure.com/openai/v1/video/generations/gen_1/content/video?api-version=preview"
        );
    }

    #[test]
    fn test_video_job_url_escapes_client_ids() {
        let url = azure()
            .video_job_url(&["jobs", "abc/../x?api-version=old#z"])
            .unwrap();
        assert_eq!(
            url,
            "https://example.openai.azure.com/openai/v1/video/generations/jobs/abc%2F..%2Fx%3Fapi-version=old%23z?api-version=preview"
        );

        for id in ["", ".", ".."] {
            let err = azure().video_job_url(&["jobs", id]).unwrap_err();
            assert_eq!(err.status, Some(400));
        }
    }

    #[test]
    fn test_video_status_mapping() {
        assert_eq!(map_video_status("preprocessing"), JobStatus::Queued);
        assert_eq!(map_video_status("processing"), JobStatus::Running);
        assert_eq!(map_video_status("succeeded"), JobStatus::Succeeded);
        assert_eq!(map_video_status("cancelled"), JobStatus::Cancelled);
        assert_eq!(map_video_status("mystery"), JobStatus::Running);
    }

    #[test]
    fn test_video_job_body_defaults_and_overrides() {
        let mut params = serde_json::Map::new();
        params.insert("width".into(), json!(854));
        let body = video_job_body(&VideoRequest {
            model: "sora".into(),
            prompt: "a cat".into(),
            params,
        });
        assert_eq!(body["width"], 854);
        assert_eq!(body["height"], 480);
        assert_eq!(body["n_seconds"], 5);
        assert_eq!(body["prompt"], "a cat");
    }
}
