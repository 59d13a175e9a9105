//! Request types accepted by the proxy endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which provider operation a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Chat,
    Responses,
    Embedding,
    Image,
    Speech,
    Video,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Chat => "chat",
            EndpointKind::Responses => "responses",
            EndpointKind::Embedding => "embedding",
            EndpointKind::Image => "image",
            EndpointKind::Speech => "speech",
            EndpointKind::Video => "video",
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conversation message.
///
/// `content` is usually a string but multimodal clients send arrays, so it
/// is kept as raw JSON.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Message {
    pub role: String,
    pub content: Value,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Value::String(content.into()),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == "user"
    }
}

/// Body of `POST /api/:provider/chat` and `/responses`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Option<Vec<Message>>,
}

/// Body of `POST /api/:provider/embeddings`.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingRequest {
    #[serde(default)]
    pub model: String,
    /// A string or an array of strings.
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub dimensions: Option<u32>,
}

/// Body of `POST /api/:provider/images`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default = "default_auto")]
    pub moderation: String,
    #[serde(default = "default_n")]
    pub n: u32,
    #[serde(default)]
    pub output_compression: Option<u32>,
    #[serde(default = "default_auto")]
    pub size: String,
    #[serde(default = "default_auto")]
    pub quality: String,
}

fn default_background() -> String {
    "transparent".to_string()
}

fn default_output_format() -> String {
    "webp".to_string()
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_n() -> u32 {
    1
}

/// Body of `POST /api/:provider/speech`.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeechRequest {
    #[serde(default = "default_speech_model")]
    pub model: String,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_speech_format")]
    pub response_format: String,
    #[serde(default)]
    pub instructions: Option<String>,
}

fn default_speech_model() -> String {
    "gpt-4o-mini-tts".to_string()
}

fn default_voice() -> String {
    "coral".to_string()
}

fn default_speech_format() -> String {
    "pcm".to_string()
}

/// Body of `POST /api/:provider/video` and `/video/jobs`.
///
/// Everything besides `model` and `prompt` is passed to the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoBody {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(flatten)]
    pub params: serde_json::Map<String, Value>,
}

/// Query of `GET /api/:provider/session`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionQuery {
    #[serde(default = "default_realtime_model")]
    pub model: String,
}

fn default_realtime_model() -> String {
    "gpt-4o-mini-realtime-preview-2024-12-17".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_request_without_messages() {
        let req: ChatRequest = serde_json::from_value(json!({"model": "gpt-4o"})).unwrap();
        assert!(req.messages.is_none());
    }

    #[test]
    fn test_message_content_may_be_array() {
        let msg: Message = serde_json::from_value(json!({
            "role": "user",
            "content": [{"type": "text", "text": "hi"}]
        }))
        .unwrap();
        assert!(msg.is_user());
        assert!(msg.content.is_array());
    }

    #[test]
    fn test_image_defaults() {
        let req: ImageRequest =
            serde_json::from_value(json!({"model": "gpt-image-1", "prompt": "a fox"})).unwrap();
        assert_eq!(req.background, "transparent");
        assert_eq!(req.output_format, "webp");
        assert_eq!(req.moderation, "auto");
        assert_eq!(req.n, 1);
        assert_eq!(req.size, "auto");
        assert_eq!(req.quality, "auto");
    }

    #[test]
    fn test_speech_defaults() {
        let req: SpeechRequest = serde_json::from_value(json!({"input": "hello"})).unwrap();
        assert_eq!(req.model, "gpt-4o-mini-tts");
        assert_eq!(req.voice, "coral");
        assert_eq!(req.response_format, "pcm");
    }

    #[test]
    fn test_video_body_collects_extra_params() {
        let body: VideoBody = serde_json::from_value(json!({
            "model": "sora",
            "prompt": "waves",
            "width": 854,
            "n_seconds": 10
        }))
        .unwrap();
        assert_eq!(body.params.len(), 2);
        assert_eq!(body.params["width"], 854);
        assert!(!body.params.contains_key("model"));
    }
}
