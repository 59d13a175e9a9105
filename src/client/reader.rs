//! Decodes the `\r`-delimited frame stream produced by the proxy.

use crate::protocol::{
    unwrap_audio, DATA_PREFIX, DONE_MARKER, ERROR_MARKER, FRAME_DELIMITER, JOB_ID_PREFIX,
    THINKING_MARKER,
};

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    Thinking,
    Text(String),
    /// Base64 audio with the comment wrapper removed.
    Audio(String),
    JobId(String),
    Done,
    /// Failure detail (may be empty).
    Error(String),
}

impl ReaderEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReaderEvent::Done | ReaderEvent::Error(_) | ReaderEvent::JobId(_)
        )
    }
}

/// Incremental frame decoder.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence;
/// only complete lines are decoded. The `[DONE]` and error-detail lines
/// carry no trailing delimiter, so they surface from [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    awaiting_error_detail: bool,
    terminated: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal frame has been decoded.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feed raw bytes, returning every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<ReaderEvent> {
        let mut events = Vec::new();
        if self.terminated {
            return events;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == FRAME_DELIMITER as u8) {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            self.decode_line(&line, &mut events);
            if self.terminated {
                self.buffer.clear();
                break;
            }
        }
        events
    }

    /// End of stream: decode whatever is left.
    pub fn finish(&mut self) -> Vec<ReaderEvent> {
        let mut events = Vec::new();
        if !self.terminated {
            let line = std::mem::take(&mut self.buffer);
            if !line.is_empty() {
                self.decode_line(&line, &mut events);
            }
        }
        if self.awaiting_error_detail && !self.terminated {
            self.terminated = true;
            events.push(ReaderEvent::Error(String::new()));
        }
        events
    }

    fn decode_line(&mut self, raw: &[u8], events: &mut Vec<ReaderEvent>) {
        let line = String::from_utf8_lossy(raw);

        if self.awaiting_error_detail {
            let detail = line.strip_prefix("data:").unwrap_or(&line).trim_start();
            self.awaiting_error_detail = false;
            self.terminated = true;
            events.push(ReaderEvent::Error(detail.to_string()));
            return;
        }

        if let Some(id) = line.strip_prefix(JOB_ID_PREFIX) {
            self.terminated = true;
            events.push(ReaderEvent::JobId(id.trim().to_string()));
            return;
        }

        let content = line.strip_prefix(DATA_PREFIX).unwrap_or(&line);
        if content.is_empty() {
            return;
        }
        let event = match content {
            DONE_MARKER => {
                self.terminated = true;
                ReaderEvent::Done
            }
            ERROR_MARKER => {
                self.awaiting_error_detail = true;
                return;
            }
            THINKING_MARKER => ReaderEvent::Thinking,
            other => match unwrap_audio(other) {
                Some(data) => ReaderEvent::Audio(data.to_string()),
                None => ReaderEvent::Text(other.to_string()),
            },
        };
        events.push(event);
    }
}
