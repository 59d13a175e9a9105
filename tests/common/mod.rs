//! Scripted provider doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

use genproxy::config::{Config, ProviderKind};
use genproxy::protocol::FrameWriter;
use genproxy::provider::{
    AsyncJob, ChunkStream, ProviderClient, ProviderError, StreamingResult, VideoJobs, VideoRequest,
};
use genproxy::proxy::{create_router, AppState};
use genproxy::router::{CapabilityTable, ProviderHandle, Router as ProviderRouter};

/// A scripted reply to a chat or responses call.
pub enum Reply {
    Stream(Vec<Result<Value, ProviderError>>),
    /// A stream the test controls, e.g. one that never ends.
    Live(ChunkStream),
    Single(Value),
}

/// One recorded provider call.
#[derive(Debug, Clone)]
pub struct Call {
    pub operation: &'static str,
    pub stream: bool,
    pub body: Value,
}

/// Provider that answers from queues and records every call.
#[derive(Default)]
pub struct MockProvider {
    name: String,
    replies: Mutex<VecDeque<Result<Reply, ProviderError>>>,
    payloads: Mutex<VecDeque<Result<Value, ProviderError>>>,
    speech: Mutex<VecDeque<Result<Bytes, ProviderError>>>,
    calls: Mutex<Vec<Call>>,
}

impl MockProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn reply(self, reply: Result<Reply, ProviderError>) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn payload(self, payload: Result<Value, ProviderError>) -> Self {
        self.payloads.lock().unwrap().push_back(payload);
        self
    }

    pub fn speech_reply(self, audio: Result<Bytes, ProviderError>) -> Self {
        self.speech.lock().unwrap().push_back(audio);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, operation: &'static str, stream: bool, body: &Value) {
        self.calls.lock().unwrap().push(Call {
            operation,
            stream,
            body: body.clone(),
        });
    }

    fn next_reply(&self) -> Result<StreamingResult, ProviderError> {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::new("no scripted reply")))?;
        Ok(match reply {
            Reply::Stream(chunks) => StreamingResult::Stream(Box::pin(futures::stream::iter(chunks))),
            Reply::Live(chunks) => StreamingResult::Stream(chunks),
            Reply::Single(payload) => StreamingResult::Single(payload),
        })
    }

    fn next_payload(&self) -> Result<Value, ProviderError> {
        self.payloads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::new("no scripted payload")))
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, body: Value, stream: bool) -> Result<StreamingResult, ProviderError> {
        self.record("chat", stream, &body);
        self.next_reply()
    }

    async fn responses(&self, body: Value, stream: bool) -> Result<StreamingResult, ProviderError> {
        self.record("responses", stream, &body);
        self.next_reply()
    }

    async fn embeddings(&self, body: Value) -> Result<Value, ProviderError> {
        self.record("embeddings", false, &body);
        self.next_payload()
    }

    async fn images(&self, body: Value) -> Result<Value, ProviderError> {
        self.record("images", false, &body);
        self.next_payload()
    }

    async fn speech(&self, body: Value) -> Result<Bytes, ProviderError> {
        self.record("speech", false, &body);
        self.speech
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::new("no scripted audio")))
    }
}

/// Video job double: a fixed sequence of status snapshots.
pub struct MockVideo {
    job_id: String,
    submit_error: Option<ProviderError>,
    statuses: Mutex<VecDeque<AsyncJob>>,
    asset: Bytes,
    pub submits: AtomicUsize,
    pub polls: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl MockVideo {
    pub fn new(job_id: &str, statuses: Vec<AsyncJob>) -> Self {
        Self {
            job_id: job_id.to_string(),
            submit_error: None,
            statuses: Mutex::new(statuses.into()),
            asset: Bytes::from_static(b"video-bytes"),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing_submit(error: ProviderError) -> Self {
        Self {
            submit_error: Some(error),
            ..Self::new("unused", Vec::new())
        }
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoJobs for MockVideo {
    async fn submit(&self, _request: &VideoRequest) -> Result<String, ProviderError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        match &self.submit_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.job_id.clone()),
        }
    }

    async fn status(&self, job_id: &str) -> Result<AsyncJob, ProviderError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(job_id, self.job_id, "status polled with the wrong job id");
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::new("no scripted status"))
    }

    async fn fetch_asset(&self, _result_ref: &str) -> Result<Bytes, ProviderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.asset.clone())
    }
}

/// Config with no providers; tests attach handles directly.
pub fn test_config(extra: &str) -> Config {
    Config::parse_str(&format!(
        "[server]\nlisten = \"127.0.0.1:0\"\n{}",
        extra
    ))
    .expect("test config parses")
}

/// Default OpenAI-style handle backed by `client`.
pub fn chat_handle(name: &str, client: Arc<dyn ProviderClient>) -> ProviderHandle {
    ProviderHandle::new(name, ProviderKind::Openai)
        .with_client(client)
        .as_default()
}

pub fn test_app(handles: Vec<ProviderHandle>, config: Config) -> axum::Router {
    let router = ProviderRouter::new(handles, CapabilityTable::default());
    create_router(AppState {
        router: Arc::new(router),
        config: Arc::new(config),
    })
}

/// Drain a frame channel into a string once the writer is gone.
pub async fn collect_frames(writer: FrameWriter, frames: ReceiverStream<Bytes>) -> String {
    drop(writer);
    let chunks: Vec<Bytes> = frames.collect().await;
    chunks
        .iter()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .collect()
}

/// Read a whole response body as text.
pub async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 16 * 1024 * 1024)
        .await
        .expect("read body");
    String::from_utf8_lossy(&bytes).into_owned()
}
