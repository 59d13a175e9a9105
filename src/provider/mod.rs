//! Provider client abstractions.
//!
//! The proxy core only ever sees a [`ProviderClient`] (request/response and
//! streaming endpoints) and, for asynchronous generation, a [`VideoJobs`]
//! implementation. Concrete clients speak HTTP to OpenAI-compatible and
//! Gemini endpoints.

mod error;
pub mod gemini;
pub mod openai;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::router::ApiGeneration;

pub use error::ProviderError;
pub use gemini::VeoClient;
pub use openai::{OpenAiClient, OpenAiFlavor};

/// A lazy, finite, non-restartable sequence of provider chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Value, ProviderError>> + Send>>;

/// What a provider returned for a call made with `stream: true`.
pub enum StreamingResult {
    /// The provider is streaming chunks.
    Stream(ChunkStream),
    /// The provider answered with one complete payload.
    Single(Value),
}

impl std::fmt::Debug for StreamingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamingResult::Stream(_) => write!(f, "StreamingResult::Stream(..)"),
            StreamingResult::Single(v) => write!(f, "StreamingResult::Single({})", v),
        }
    }
}

/// Request/response capabilities of a generative-AI provider.
///
/// Request bodies are provider-ready JSON; the proxy core decides `model`,
/// input and extra parameters before calling.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Name used in logs and routes.
    fn name(&self) -> &str;

    /// Chat completions. `stream` selects the streaming variant.
    async fn chat(&self, body: Value, stream: bool) -> Result<StreamingResult, ProviderError>;

    /// Responses API. `stream` selects the streaming variant.
    async fn responses(&self, body: Value, stream: bool)
        -> Result<StreamingResult, ProviderError>;

    async fn embeddings(&self, body: Value) -> Result<Value, ProviderError>;

    async fn images(&self, body: Value) -> Result<Value, ProviderError>;

    /// Text-to-speech. Returns the raw audio bytes.
    async fn speech(&self, body: Value) -> Result<Bytes, ProviderError>;

    /// Issue an ephemeral credential for a realtime session.
    async fn realtime_session(
        &self,
        model: &str,
        generation: ApiGeneration,
    ) -> Result<Value, ProviderError> {
        let _ = (model, generation);
        Err(ProviderError::unsupported("realtime sessions", self.name()))
    }
}

/// Lifecycle of an asynchronous generation job.
///
/// `Succeeded`, `Failed` and `Cancelled` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a job as reported by one status poll.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncJob {
    pub id: String,
    pub status: JobStatus,
    /// Provider references to the generated assets, in output order.
    pub result_refs: Vec<String>,
    /// Provider-supplied reasons for a rejection (e.g. content filtering).
    pub failure_reasons: Vec<String>,
}

impl AsyncJob {
    pub fn new(id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            id: id.into(),
            status,
            result_refs: Vec::new(),
            failure_reasons: Vec::new(),
        }
    }
}

/// A video generation request.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub model: String,
    pub prompt: String,
    /// Provider-specific parameters (dimensions, duration, aspect ratio, ...).
    pub params: serde_json::Map<String, Value>,
}

/// Job-based video generation.
#[async_trait]
pub trait VideoJobs: Send + Sync {
    /// Start a job and return its provider identifier.
    async fn submit(&self, request: &VideoRequest) -> Result<String, ProviderError>;

    /// Poll a job once.
    async fn status(&self, job_id: &str) -> Result<AsyncJob, ProviderError>;

    /// Download one generated asset.
    async fn fetch_asset(&self, result_ref: &str) -> Result<Bytes, ProviderError>;
}

/// Fail with the provider's error if the response is not 2xx.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = %status, body = %body, "Provider returned error");
    Err(ProviderError::from_response(status.as_u16(), &body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serde_lowercase() {
        let status: JobStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(status, JobStatus::Cancelled);
        assert_eq!(serde_json::to_string(&JobStatus::Running).unwrap(), "\"running\"");
    }
}
