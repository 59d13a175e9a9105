//! Tells "this model cannot stream" apart from real failures.

use crate::protocol::THINKING_MARKER;
use crate::provider::ProviderError;

use super::types::Message;

/// Whether the provider rejected the request only because of `stream: true`.
pub fn is_streaming_unsupported(error: &ProviderError) -> bool {
    error.code.as_deref() == Some("unsupported_value") && error.param.as_deref() == Some("stream")
}

/// Whether this is the first turn of a conversation.
///
/// Checked against the client-supplied messages, before any system
/// prompt is injected: the first turn has no non-user message.
pub fn is_first_turn(messages: &[Message]) -> bool {
    messages.iter().all(Message::is_user)
}

/// Notice shown ahead of the non-streaming answer on a first turn.
pub fn streaming_unsupported_notice(model: &str) -> String {
    format!(
        "<b>The model {} does not support streaming response yet. {}</b><br/><br/>",
        model, THINKING_MARKER
    )
}
