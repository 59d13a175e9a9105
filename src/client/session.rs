//! A cancellable conversation against a running proxy.

use futures::StreamExt;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::audio::PcmDecoder;
use super::history::{strip_thinking, Conversation};
use super::reader::{FrameDecoder, ReaderEvent};
use crate::protocol::ABANDONED_MESSAGE;
use crate::router::AUTO_PROVIDER;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request to proxy failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Progress of a turn in flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TurnEvent<'a> {
    Thinking,
    Text(&'a str),
    Audio(&'a [f32]),
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The stream reached `[DONE]`; the turn is now part of the history.
    Completed { text: String, audio: Vec<f32> },
    /// The proxy reported an error or the stream broke off.
    Failed(String),
    /// The caller aborted the turn.
    Cancelled,
}

/// Which generation endpoint a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatApi {
    #[default]
    Chat,
    Responses,
}

impl ChatApi {
    fn path(&self) -> &'static str {
        match self {
            ChatApi::Chat => "chat",
            ChatApi::Responses => "responses",
        }
    }
}

/// Conversation with one model through the proxy.
#[derive(Debug, Clone)]
pub struct ChatSession {
    http: reqwest::Client,
    base_url: String,
    provider: String,
    model: String,
    api: ChatApi,
    history: Conversation,
}

impl ChatSession {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            provider: AUTO_PROVIDER.to_string(),
            model: model.into(),
            api: ChatApi::default(),
            history: Conversation::new(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_api(mut self, api: ChatApi) -> Self {
        self.api = api;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn history(&self) -> &Conversation {
        &self.history
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    fn url(&self) -> String {
        format!("{}/api/{}/{}", self.base_url, self.provider, self.api.path())
    }

    /// Send a prompt and stream the reply through `on_event`.
    ///
    /// Cancelling the token drops the in-flight response, which closes the
    /// connection. Only a completed turn is committed to the history.
    pub async fn send<F>(
        &mut self,
        prompt: &str,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> Result<TurnOutcome, ClientError>
    where
        F: FnMut(TurnEvent<'_>),
    {
        let body = json!({
            "model": self.model,
            "messages": self.history.request_messages(prompt),
        });
        let url = self.url();
        tracing::debug!(url = %url, model = %self.model, turns = self.history.len(), "Sending turn");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(model = %self.model, "Turn cancelled");
                TurnOutcome::Cancelled
            }
            result = stream_turn(&self.http, &url, &body, &mut on_event) => result?,
        };

        if let TurnOutcome::Completed { text, .. } = &outcome {
            self.history.commit(prompt, text);
        }
        Ok(outcome)
    }
}

async fn stream_turn<F>(
    http: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
    on_event: &mut F,
) -> Result<TurnOutcome, ClientError>
where
    F: FnMut(TurnEvent<'_>),
{
    let response = http.post(url).json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Ok(TurnOutcome::Failed(error_detail(status, &text)));
    }

    let mut decoder = FrameDecoder::new();
    let mut turn = TurnState::default();
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        for event in decoder.push(&chunk?) {
            turn.apply(event, on_event);
        }
        if decoder.is_terminated() {
            break;
        }
    }
    for event in decoder.finish() {
        turn.apply(event, on_event);
    }
    Ok(turn.into_outcome())
}

/// Message for a rejected request; the proxy sends `{"error": {"message"}}`.
fn error_detail(status: reqwest::StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| "Network response was not ok".to_string());
    format!("{}, {}", status.as_u16(), message)
}

#[derive(Default)]
struct TurnState {
    output: String,
    audio: Vec<f32>,
    pcm: PcmDecoder,
    outcome: Option<TurnOutcome>,
}

impl TurnState {
    fn apply<F>(&mut self, event: ReaderEvent, on_event: &mut F)
    where
        F: FnMut(TurnEvent<'_>),
    {
        if self.outcome.is_some() {
            return;
        }
        match event {
            ReaderEvent::Thinking => on_event(TurnEvent::Thinking),
            ReaderEvent::Text(text) => {
                on_event(TurnEvent::Text(&text));
                self.output.push_str(&text);
            }
            ReaderEvent::Audio(data) => match self.pcm.push(&data) {
                Ok(samples) => self.play(samples, on_event),
                Err(e) => self.outcome = Some(TurnOutcome::Failed(e.to_string())),
            },
            ReaderEvent::Done => {
                self.outcome = Some(match self.pcm.finish() {
                    Ok(samples) => {
                        self.play(samples, on_event);
                        TurnOutcome::Completed {
                            text: strip_thinking(&self.output),
                            audio: std::mem::take(&mut self.audio),
                        }
                    }
                    Err(e) => TurnOutcome::Failed(e.to_string()),
                });
            }
            ReaderEvent::Error(detail) => {
                tracing::warn!(detail = %detail, "Proxy reported an error");
                self.outcome = Some(TurnOutcome::Failed(detail));
            }
            ReaderEvent::JobId(id) => {
                self.outcome = Some(TurnOutcome::Failed(format!(
                    "Unexpected job id in chat stream: {}",
                    id
                )));
            }
        }
    }

    fn play<F>(&mut self, samples: Vec<f32>, on_event: &mut F)
    where
        F: FnMut(TurnEvent<'_>),
    {
        if !samples.is_empty() {
            on_event(TurnEvent::Audio(&samples));
            self.audio.extend(samples);
        }
    }

    fn into_outcome(self) -> TurnOutcome {
        self.outcome
            .unwrap_or_else(|| TurnOutcome::Failed(ABANDONED_MESSAGE.to_string()))
    }
}
