//! Extracts displayable fragments from provider chunks.
//!
//! Each endpoint kind has its own chunk shape; the parser reduces them to
//! text, audio or a transcript+audio bundle. It never yields an empty
//! fragment: "nothing to show" is `None`.

use serde_json::Value;

use super::types::EndpointKind;

/// One piece of output to frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    /// Base64 audio, not yet wrapped.
    Audio(String),
    /// A complete non-streaming audio answer: transcript, then audio.
    Bundle { transcript: String, audio: String },
}

/// Parse one chunk (or one complete payload) of the given kind.
pub fn parse(chunk: &Value, kind: EndpointKind) -> Option<Fragment> {
    match kind {
        EndpointKind::Chat => parse_chat(chunk),
        EndpointKind::Responses => parse_responses(chunk),
        EndpointKind::Embedding => parse_embedding(chunk),
        EndpointKind::Image => non_empty(chunk.pointer("/data/0/b64_json")).map(Fragment::Text),
        EndpointKind::Speech | EndpointKind::Video => None,
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn parse_chat(chunk: &Value) -> Option<Fragment> {
    let choice = chunk.pointer("/choices/0")?;

    if let Some(delta) = choice.get("delta") {
        if let Some(audio) = delta.get("audio") {
            return non_empty(audio.get("transcript"))
                .map(Fragment::Text)
                .or_else(|| non_empty(audio.get("data")).map(Fragment::Audio));
        }
        return non_empty(delta.get("content")).map(Fragment::Text);
    }

    let message = choice.get("message")?;
    if let Some(audio) = message.get("audio") {
        let transcript = non_empty(audio.get("transcript"));
        let data = non_empty(audio.get("data"));
        return match (transcript, data) {
            (Some(transcript), Some(audio)) => Some(Fragment::Bundle { transcript, audio }),
            (Some(transcript), None) => Some(Fragment::Text(transcript)),
            (None, Some(audio)) => Some(Fragment::Audio(audio)),
            (None, None) => None,
        };
    }
    non_empty(message.get("content")).map(Fragment::Text)
}

/// Streaming event types whose `delta` is not answer text.
fn is_non_text_delta_event(chunk: &Value) -> bool {
    chunk
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| {
            t.ends_with(".delta")
                && t != "response.output_text.delta"
                && t != "response.refusal.delta"
        })
}

fn parse_responses(chunk: &Value) -> Option<Fragment> {
    if let Some(text) = non_empty(chunk.get("output_text")) {
        return Some(Fragment::Text(text));
    }
    if is_non_text_delta_event(chunk) {
        return None;
    }
    if let Some(delta) = non_empty(chunk.get("delta")) {
        return Some(Fragment::Text(delta));
    }
    if let Some(content) = non_empty(chunk.pointer("/message/content")) {
        return Some(Fragment::Text(content));
    }

    // Raw REST payloads carry the text inside `output[].content[]`.
    let text: String = chunk
        .get("output")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(Fragment::Text(text))
}

fn parse_embedding(chunk: &Value) -> Option<Fragment> {
    let embedding = chunk.pointer("/data/0/embedding")?;
    serde_json::to_string(embedding).ok().map(Fragment::Text)
}
