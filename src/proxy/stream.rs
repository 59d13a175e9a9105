//! Stream multiplexer.
//!
//! Drives one generation request against a provider and writes the result
//! as frames: a thinking frame, then either parsed streaming chunks or a
//! single payload, then exactly one terminal frame. When the provider
//! rejects streaming for the model, the request is replayed without
//! streaming on the same writer.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::StreamExt;
use serde_json::{json, Value};

use super::fallback;
use super::parser::{self, Fragment};
use super::types::{
    ChatRequest, EmbeddingRequest, EndpointKind, ImageRequest, Message, SpeechRequest,
};
use crate::error::{Error, Result};
use crate::protocol::{Disconnected, FrameWriter};
use crate::provider::{ProviderClient, ProviderError, StreamingResult};
use crate::router::ModelCapabilities;

/// Input limit of older text-to-speech models.
pub const TTS_CHARACTER_LIMIT: usize = 4096;

/// Voice and sample format requested from audio-capable chat models.
const AUDIO_VOICE: &str = "verse";
const AUDIO_FORMAT: &str = "pcm16";

/// One provider call, fully prepared.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub kind: EndpointKind,
    /// Provider-ready body, without the `stream` flag.
    pub body: Value,
    /// Messages as the client sent them (no system prompt).
    pub messages: Vec<Message>,
}

fn with_system_prompt(
    messages: &[Message],
    instructions: Option<&str>,
    caps: &ModelCapabilities,
) -> Vec<Message> {
    let mut input = Vec::with_capacity(messages.len() + 1);
    if let Some(instructions) = instructions {
        input.push(Message::new(caps.system_role.as_str(), instructions));
    }
    input.extend_from_slice(messages);
    input
}

impl GenerationRequest {
    /// A chat completions request.
    pub fn chat(
        request: ChatRequest,
        system_instructions: Option<&str>,
        caps: &ModelCapabilities,
    ) -> Result<Self> {
        let messages = request
            .messages
            .ok_or_else(|| Error::BadRequest("No messages provided".to_string()))?;

        let mut body = json!({
            "model": request.model,
            "messages": with_system_prompt(&messages, system_instructions, caps),
            "store": false,
        });
        if caps.supports_audio {
            body["modalities"] = json!(["text", "audio"]);
            body["audio"] = json!({ "voice": AUDIO_VOICE, "format": AUDIO_FORMAT });
        }

        Ok(Self {
            model: request.model,
            kind: EndpointKind::Chat,
            body,
            messages,
        })
    }

    /// A Responses API request.
    pub fn responses(
        request: ChatRequest,
        system_instructions: Option<&str>,
        caps: &ModelCapabilities,
    ) -> Result<Self> {
        let messages = request
            .messages
            .ok_or_else(|| Error::BadRequest("No messages provided".to_string()))?;

        let mut body = json!({
            "model": request.model,
            "input": with_system_prompt(&messages, system_instructions, caps),
            "store": false,
        });
        if caps.supports_truncation {
            body["truncation"] = json!("auto");
        }

        Ok(Self {
            model: request.model,
            kind: EndpointKind::Responses,
            body,
            messages,
        })
    }

    pub fn embedding(request: EmbeddingRequest) -> Result<Self> {
        let input = request
            .input
            .filter(|v| !v.is_null() && v.as_str() != Some(""))
            .ok_or_else(|| Error::BadRequest("No text input provided".to_string()))?;

        let mut body = json!({
            "model": request.model,
            "input": input,
            "encoding_format": "float",
        });
        if let Some(dimensions) = request.dimensions {
            body["dimensions"] = json!(dimensions);
        }

        Ok(Self {
            model: request.model,
            kind: EndpointKind::Embedding,
            body,
            messages: Vec::new(),
        })
    }

    pub fn image(request: ImageRequest) -> Result<Self> {
        let model = request
            .model
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::BadRequest("No model provided".to_string()))?;
        let prompt = request
            .prompt
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::BadRequest("No text prompt provided".to_string()))?;

        let mut body = json!({
            "model": model,
            "prompt": prompt,
            "background": request.background,
            "moderation": request.moderation,
            "n": request.n,
            "output_format": request.output_format,
            "size": request.size,
            "quality": request.quality,
        });
        // PNG output takes no compression setting.
        if request.output_format != "png" {
            body["output_compression"] = json!(request.output_compression.unwrap_or(50));
        }

        Ok(Self {
            model,
            kind: EndpointKind::Image,
            body,
            messages: Vec::new(),
        })
    }

    pub fn speech(request: SpeechRequest) -> Result<Self> {
        let input = request
            .input
            .filter(|i| !i.is_empty())
            .ok_or_else(|| Error::BadRequest("No text input provided".to_string()))?;

        let mut body = json!({
            "model": request.model,
            "voice": request.voice,
            "input": input,
            "response_format": request.response_format,
        });
        if let Some(instructions) = request.instructions {
            body["instructions"] = json!(instructions);
        }

        Ok(Self {
            model: request.model,
            kind: EndpointKind::Speech,
            body,
            messages: Vec::new(),
        })
    }
}

/// Run a request to completion, writing every frame to `writer`.
///
/// Always leaves the writer terminated, unless the client disconnected
/// first; in that case the provider stream is dropped immediately.
pub async fn run(
    request: &GenerationRequest,
    client: &dyn ProviderClient,
    writer: &mut FrameWriter,
    streaming_enabled: bool,
) {
    tracing::info!(
        provider = %client.name(),
        model = %request.model,
        kind = %request.kind,
        streaming = streaming_enabled,
        "Running generation"
    );

    match request.kind {
        EndpointKind::Chat | EndpointKind::Responses => {
            run_generation(request, client, writer, streaming_enabled).await
        }
        EndpointKind::Embedding | EndpointKind::Image => {
            if writer.thinking().await.is_ok() {
                run_single(request, client, writer).await;
            }
        }
        EndpointKind::Speech => run_speech(request, client, writer).await,
        EndpointKind::Video => {
            writer
                .error("Video generation is handled by the video endpoints")
                .await
        }
    }
}

async fn run_generation(
    request: &GenerationRequest,
    client: &dyn ProviderClient,
    writer: &mut FrameWriter,
    streaming_enabled: bool,
) {
    if writer.thinking().await.is_err() {
        return;
    }

    if !streaming_enabled {
        run_non_streaming(request, client, writer).await;
        return;
    }

    let failure = match call(request, client, true).await {
        Ok(result) => match forward(result, request, writer).await {
            Forwarded::Completed => return writer.done().await,
            Forwarded::Disconnected => return,
            Forwarded::Failed(e) => e,
        },
        Err(e) => e,
    };

    if !fallback::is_streaming_unsupported(&failure) {
        return writer.error(failure.message).await;
    }

    tracing::info!(
        provider = %client.name(),
        model = %request.model,
        "Model does not support streaming, retrying without it"
    );
    if fallback::is_first_turn(&request.messages) {
        let notice = fallback::streaming_unsupported_notice(&request.model);
        if writer.text(notice).await.is_err() {
            return;
        }
    }
    run_non_streaming(request, client, writer).await;
}

async fn run_non_streaming(
    request: &GenerationRequest,
    client: &dyn ProviderClient,
    writer: &mut FrameWriter,
) {
    match call(request, client, false).await {
        Ok(result) => match forward(result, request, writer).await {
            Forwarded::Completed => writer.done().await,
            Forwarded::Disconnected => {}
            Forwarded::Failed(e) => writer.error(e.message).await,
        },
        Err(e) => writer.error(e.message).await,
    }
}

/// How forwarding a provider result ended.
enum Forwarded {
    Completed,
    Failed(ProviderError),
    Disconnected,
}

/// Write every fragment of `result` in order.
///
/// Returning drops the chunk stream, which closes the upstream connection.
async fn forward(
    result: StreamingResult,
    request: &GenerationRequest,
    writer: &mut FrameWriter,
) -> Forwarded {
    let mut chunks = match result {
        StreamingResult::Stream(chunks) => chunks,
        StreamingResult::Single(payload) => {
            if let Some(fragment) = parser::parse(&payload, request.kind) {
                if emit(writer, fragment).await.is_err() {
                    return Forwarded::Disconnected;
                }
            }
            return Forwarded::Completed;
        }
    };

    while let Some(item) = chunks.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => return Forwarded::Failed(e),
        };
        tracing::trace!(chunk = %chunk, "Provider chunk");
        if let Some(fragment) = parser::parse(&chunk, request.kind) {
            if emit(writer, fragment).await.is_err() {
                tracing::info!(model = %request.model, "Client disconnected, dropping provider stream");
                return Forwarded::Disconnected;
            }
        }
    }
    Forwarded::Completed
}

/// Embeddings and images: one call, one fragment.
async fn run_single(
    request: &GenerationRequest,
    client: &dyn ProviderClient,
    writer: &mut FrameWriter,
) {
    let result = match request.kind {
        EndpointKind::Embedding => client.embeddings(request.body.clone()).await,
        _ => client.images(request.body.clone()).await,
    };
    match result {
        Ok(payload) => {
            if let Some(fragment) = parser::parse(&payload, request.kind) {
                if emit(writer, fragment).await.is_err() {
                    return;
                }
            }
            writer.done().await;
        }
        Err(e) => writer.error(e.message).await,
    }
}

/// Text-to-speech, retried once with truncated input when the model
/// rejects the input length.
async fn run_speech(
    request: &GenerationRequest,
    client: &dyn ProviderClient,
    writer: &mut FrameWriter,
) {
    let audio = match client.speech(request.body.clone()).await {
        Ok(audio) => Ok(audio),
        Err(e) if is_input_too_long(&e, &request.body) => {
            tracing::warn!(
                model = %request.model,
                limit = TTS_CHARACTER_LIMIT,
                "Speech input too long, retrying truncated"
            );
            client.speech(truncated_speech_body(&request.body)).await
        }
        Err(e) => Err(e),
    };

    match audio {
        Ok(bytes) => {
            if writer.audio(STANDARD.encode(&bytes)).await.is_ok() {
                writer.done().await;
            }
        }
        Err(e) => writer.error(e.message).await,
    }
}

/// Whether `err` is the speech model rejecting the input length.
///
/// Older TTS models answer with no error code, only a validation message
/// such as `String should have at most 4096 characters`, so the limit is
/// matched in the text and only trusted when the input really exceeds it.
fn is_input_too_long(err: &ProviderError, body: &Value) -> bool {
    let over_limit = body
        .get("input")
        .and_then(Value::as_str)
        .is_some_and(|input| input.chars().count() > TTS_CHARACTER_LIMIT);
    over_limit && err.message.contains(&TTS_CHARACTER_LIMIT.to_string())
}

fn truncated_speech_body(body: &Value) -> Value {
    let mut body = body.clone();
    if let Some(input) = body.get("input").and_then(Value::as_str) {
        let truncated: String = input.chars().take(TTS_CHARACTER_LIMIT).collect();
        body["input"] = Value::String(truncated);
    }
    body
}

async fn call(
    request: &GenerationRequest,
    client: &dyn ProviderClient,
    stream: bool,
) -> std::result::Result<StreamingResult, ProviderError> {
    match request.kind {
        EndpointKind::Responses => client.responses(request.body.clone(), stream).await,
        _ => client.chat(request.body.clone(), stream).await,
    }
}

async fn emit(writer: &mut FrameWriter, fragment: Fragment) -> std::result::Result<(), Disconnected> {
    match fragment {
        Fragment::Text(text) => writer.text(text).await,
        Fragment::Audio(data) => writer.audio(data).await,
        Fragment::Bundle { transcript, audio } => {
            writer.text(transcript).await?;
            writer.audio(audio).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{CapabilityTable, SystemRole};

    fn chat_request(model: &str, messages: Option<Vec<Message>>) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages,
        }
    }

    #[test]
    fn test_chat_without_messages_is_bad_request() {
        let caps = ModelCapabilities::default();
        let err = GenerationRequest::chat(chat_request("gpt-4o", None), None, &caps).unwrap_err();
        assert!(matches!(err, Error::BadRequest(ref m) if m == "No messages provided"));
    }

    #[test]
    fn test_chat_body_injects_system_prompt() {
        let caps = ModelCapabilities::default();
        let req = GenerationRequest::chat(
            chat_request("gpt-4o", Some(vec![Message::new("user", "hi")])),
            Some("Be brief."),
            &caps,
        )
        .unwrap();
        assert_eq!(req.body["messages"][0]["role"], "system");
        assert_eq!(req.body["messages"][0]["content"], "Be brief.");
        assert_eq!(req.body["messages"][1]["content"], "hi");
        assert_eq!(req.body["store"], false);
        assert!(req.body.get("stream").is_none());
        // The first-turn check sees only what the client sent.
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn test_o1_system_prompt_uses_assistant_role() {
        let caps = CapabilityTable::default().resolve("o1-pro");
        assert_eq!(caps.system_role, SystemRole::Assistant);
        let req = GenerationRequest::responses(
            chat_request("o1-pro", Some(vec![Message::new("user", "hi")])),
            Some("sys"),
            &caps,
        )
        .unwrap();
        assert_eq!(req.body["input"][0]["role"], "assistant");
    }

    #[test]
    fn test_audio_model_requests_audio_modality() {
        let caps = CapabilityTable::default().resolve("gpt-4o-audio-preview");
        let req = GenerationRequest::chat(
            chat_request("gpt-4o-audio-preview", Some(vec![])),
            None,
            &caps,
        )
        .unwrap();
        assert_eq!(req.body["modalities"], json!(["text", "audio"]));
        assert_eq!(req.body["audio"]["format"], "pcm16");
    }

    #[test]
    fn test_computer_model_sets_truncation() {
        let caps = CapabilityTable::default().resolve("computer-use-preview");
        let req = GenerationRequest::responses(
            chat_request("computer-use-preview", Some(vec![])),
            None,
            &caps,
        )
        .unwrap();
        assert_eq!(req.body["truncation"], "auto");
    }

    #[test]
    fn test_image_validation_and_png_compression() {
        let image = |model: Option<&str>, prompt: Option<&str>, format: &str| ImageRequest {
            model: model.map(String::from),
            prompt: prompt.map(String::from),
            background: "transparent".into(),
            output_format: format.into(),
            moderation: "auto".into(),
            n: 1,
            output_compression: None,
            size: "auto".into(),
            quality: "auto".into(),
        };
        assert!(matches!(
            GenerationRequest::image(image(None, Some("fox"), "webp")),
            Err(Error::BadRequest(ref m)) if m == "No model provided"
        ));
        assert!(matches!(
            GenerationRequest::image(image(Some("gpt-image-1"), None, "webp")),
            Err(Error::BadRequest(ref m)) if m == "No text prompt provided"
        ));
        let webp = GenerationRequest::image(image(Some("gpt-image-1"), Some("fox"), "webp")).unwrap();
        assert_eq!(webp.body["output_compression"], 50);
        let png = GenerationRequest::image(image(Some("gpt-image-1"), Some("fox"), "png")).unwrap();
        assert!(png.body.get("output_compression").is_none());
    }

    #[test]
    fn test_embedding_requires_input() {
        let req = EmbeddingRequest {
            model: "text-embedding-3-small".into(),
            input: None,
            dimensions: None,
        };
        assert!(GenerationRequest::embedding(req).is_err());
    }

    #[test]
    fn test_truncated_speech_body() {
        let long: String = "é".repeat(TTS_CHARACTER_LIMIT + 10);
        let body = truncated_speech_body(&json!({"model": "tts-1", "input": long}));
        assert_eq!(
            body["input"].as_str().unwrap().chars().count(),
            TTS_CHARACTER_LIMIT
        );
        assert_eq!(body["model"], "tts-1");
    }

    #[test]
    fn test_input_too_long_needs_long_input() {
        let err = ProviderError::new(
            "[{'type': 'string_too_long', 'msg': 'String should have at most 4096 characters'}]",
        )
        .with_status(400);
        let long = json!({"input": "x".repeat(TTS_CHARACTER_LIMIT + 1)});
        let short = json!({"input": "hello"});

        assert!(is_input_too_long(&err, &long));
        assert!(!is_input_too_long(&err, &short));
        assert!(!is_input_too_long(&ProviderError::new("rate limited"), &long));
        assert!(!is_input_too_long(&err, &json!({})));
    }
}
