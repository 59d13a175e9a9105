//! Client-owned conversation history.

use crate::protocol::THINKING_MARKER;
use crate::proxy::Message;

/// Prefix of an inline video payload in assistant output.
pub const VIDEO_SOURCE_PREFIX: &str = "data:video/";

/// Placeholder sent upstream instead of a video payload.
pub const REMOVED_VIDEO: &str = "removed video";

/// Wrap a base64 video as an inline source.
pub fn format_video_source(encoded: &str, format: &str) -> String {
    format!("{}{};base64,{}", VIDEO_SOURCE_PREFIX, format, encoded)
}

/// Remove any thinking markers left in assistant output.
pub fn strip_thinking(text: &str) -> String {
    text.replace(THINKING_MARKER, "")
}

/// Ordered user/assistant turns. Only completed turns are stored.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Record a completed turn.
    pub fn commit(&mut self, prompt: &str, reply: &str) {
        self.turns.push(Message::new("user", prompt));
        self.turns.push(Message::new("assistant", strip_thinking(reply)));
    }

    /// Messages to send for a new prompt: the sanitized history followed by
    /// the prompt itself.
    pub fn request_messages(&self, prompt: &str) -> Vec<Message> {
        self.turns
            .iter()
            .map(sanitize)
            .chain(std::iter::once(Message::new("user", prompt)))
            .collect()
    }
}

fn sanitize(message: &Message) -> Message {
    match message.content.as_str() {
        Some(content) if content.starts_with(VIDEO_SOURCE_PREFIX) => {
            Message::new(message.role.clone(), REMOVED_VIDEO)
        }
        _ => message.clone(),
    }
}
