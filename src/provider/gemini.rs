//! Gemini video generation (Veo).
//!
//! `models/{model}:predictLongRunning` returns a long-running operation
//! name (e.g. `models/veo-3.0-fast-generate-preview/operations/abc`) that
//! is polled via `GET /{name}`.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ensure_success, AsyncJob, JobStatus, ProviderError, VideoJobs, VideoRequest};
use crate::config::ApiKey;

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Reported when the provider filtered the output without giving reasons.
pub const FILTERED_MESSAGE: &str = "Given prompt is not allowed by the service policy";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Video job client for the Gemini API.
#[derive(Debug, Clone)]
pub struct VeoClient {
    name: String,
    base_url: String,
    api_key: Option<ApiKey>,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
    #[serde(default)]
    response: Option<Value>,
}

#[derive(Deserialize)]
struct OperationError {
    #[serde(default)]
    message: Option<String>,
}

impl VeoClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<ApiKey>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http,
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key.expose_secret()),
            None => builder,
        }
    }

    /// URL of an operation, relative to the configured base.
    ///
    /// Operation names arrive from clients in decoupled mode, so only plain
    /// `a/b/c` paths are accepted; anything that could leave the base URL
    /// (a scheme, `..`, a query or fragment) is rejected.
    fn operation_url(&self, name: &str) -> Result<String, ProviderError> {
        let trimmed = name.trim().trim_start_matches('/');
        if !is_operation_name(trimmed) {
            tracing::warn!(provider = %self.name, operation = %trimmed, "Rejected operation name");
            return Err(
                ProviderError::new(format!("Invalid operation name '{}'", trimmed)).with_status(400),
            );
        }
        Ok(format!("{}/{}", self.base_url, trimmed))
    }
}

fn is_operation_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('/').all(|segment| {
            !segment.is_empty()
                && segment != "."
                && segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        })
}

fn normalize_model_id(model: &str) -> &str {
    let trimmed = model.trim().trim_matches('/');
    trimmed.strip_prefix("models/").unwrap_or(trimmed)
}

/// Build the `predictLongRunning` body.
///
/// Veo 3 rejects `durationSeconds` (its clips are always 8s), so it is only
/// sent for Veo 2 models.
fn predict_body(request: &VideoRequest) -> Value {
    let param = |key: &str, default: Value| request.params.get(key).cloned().unwrap_or(default);

    let mut parameters = serde_json::Map::new();
    parameters.insert("aspectRatio".into(), param("aspectRatio", json!("16:9")));
    parameters.insert(
        "personGeneration".into(),
        param("personGeneration", json!("allow_all")),
    );
    if request.model.contains("veo-2") {
        parameters.insert("durationSeconds".into(), param("durationSeconds", json!(8)));
    }
    if let Some(negative) = request.params.get("negativePrompt") {
        parameters.insert("negativePrompt".into(), negative.clone());
    }

    json!({
        "instances": [{ "prompt": request.prompt }],
        "parameters": parameters,
    })
}

/// Extract generated video URIs from either the REST or SDK response shape.
fn video_uris(response: &Value) -> Vec<String> {
    let samples = response
        .pointer("/generateVideoResponse/generatedSamples")
        .or_else(|| response.get("generatedVideos"))
        .and_then(Value::as_array);

    samples
        .map(|items| {
            items
                .iter()
                .filter_map(|s| {
                    s.pointer("/video/uri")
                        .or_else(|| s.get("videoUri"))
                        .and_then(Value::as_str)
                        .map(String::from)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Content-filter outcome: `Some(reasons)` if any output was filtered.
fn filtered_reasons(response: &Value) -> Option<Vec<String>> {
    let root = response.get("generateVideoResponse").unwrap_or(response);
    let count = root
        .get("raiMediaFilteredCount")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if count == 0 {
        return None;
    }
    let reasons: Vec<String> = root
        .get("raiMediaFilteredReasons")
        .and_then(Value::as_array)
        .map(|r| {
            r.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    if reasons.is_empty() {
        Some(vec![FILTERED_MESSAGE.to_string()])
    } else {
        Some(reasons)
    }
}

fn operation_to_job(operation: Operation) -> AsyncJob {
    if let Some(error) = operation.error {
        let mut job = AsyncJob::new(operation.name, JobStatus::Failed);
        job.failure_reasons = error.message.into_iter().collect();
        return job;
    }
    if !operation.done {
        return AsyncJob::new(operation.name, JobStatus::Running);
    }

    let response = operation.response.unwrap_or(Value::Null);
    if let Some(reasons) = filtered_reasons(&response) {
        let mut job = AsyncJob::new(operation.name, JobStatus::Failed);
        job.failure_reasons = reasons;
        return job;
    }

    let mut job = AsyncJob::new(operation.name, JobStatus::Succeeded);
    job.result_refs = video_uris(&response);
    job
}

#[async_trait]
impl VideoJobs for VeoClient {
    async fn submit(&self, request: &VideoRequest) -> Result<String, ProviderError> {
        let url = format!(
            "{}/models/{}:predictLongRunning",
            self.base_url,
            normalize_model_id(&request.model)
        );
        let response = self
            .authorize(self.http.post(&url))
            .json(&predict_body(request))
            .send()
            .await?;
        let operation: Operation = ensure_success(response).await?.json().await?;
        if let Some(error) = operation.error {
            return Err(ProviderError::new(
                error
                    .message
                    .unwrap_or_else(|| "Video generation failed.".to_string()),
            ));
        }
        tracing::info!(provider = %self.name, operation = %operation.name, "Video operation started");
        Ok(operation.name)
    }

    async fn status(&self, job_id: &str) -> Result<AsyncJob, ProviderError> {
        let response = self
            .authorize(self.http.get(self.operation_url(job_id)?))
            .send()
            .await?;
        let operation: Operation = ensure_success(response).await?.json().await?;
        Ok(operation_to_job(operation))
    }

    async fn fetch_asset(&self, result_ref: &str) -> Result<Bytes, ProviderError> {
        tracing::info!(provider = %self.name, url = %result_ref, "Downloading video");
        let response = self.authorize(self.http.get(result_ref)).send().await?;
        Ok(ensure_success(response).await?.bytes().await?)
    }
}
