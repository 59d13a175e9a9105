//! Line-delimited wire protocol shared by the server and the client reader.
//!
//! Frames are separated by a single `\r`. Textual frames carry a `data: `
//! tag; audio payloads are wrapped in `<!--...-->` so a reader can tell
//! them apart from text lines in the same stream.

use bytes::Bytes;

/// Frame separator.
pub const FRAME_DELIMITER: char = '\r';

/// Tag prefixed to every data frame.
pub const DATA_PREFIX: &str = "data: ";

/// Tag prefixed to job identifier lines.
pub const JOB_ID_PREFIX: &str = "jobId: ";

/// Transient progress placeholder shown before any real output exists.
pub const THINKING_MARKER: &str = r#"<span class="gradient-text">Thinking...</span>"#;

/// Terminal success payload.
pub const DONE_MARKER: &str = "[DONE]";

/// Terminal failure payload.
pub const ERROR_MARKER: &str = "[ERROR]";

const AUDIO_OPEN: &str = "<!--";
const AUDIO_CLOSE: &str = "-->";

/// One unit of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Progress placeholder, removed by the reader before committing output.
    Thinking,
    /// A text fragment.
    Text(String),
    /// A base64 audio chunk.
    AudioDelta(String),
    /// Terminal success.
    Done,
    /// Terminal failure with a human-readable message.
    Error(String),
    /// Terminal marker for submit-only job endpoints.
    JobId(String),
}

impl StreamFrame {
    /// Whether this frame closes the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamFrame::Done | StreamFrame::Error(_) | StreamFrame::JobId(_)
        )
    }

    /// Encode the frame into its wire form.
    pub fn encode(&self) -> Bytes {
        let line = match self {
            StreamFrame::Thinking => format!("{DATA_PREFIX}{THINKING_MARKER}{FRAME_DELIMITER}"),
            StreamFrame::Text(text) => format!("{DATA_PREFIX}{text}{FRAME_DELIMITER}"),
            StreamFrame::AudioDelta(data) => {
                format!("{DATA_PREFIX}{}{FRAME_DELIMITER}", wrap_audio(data))
            }
            StreamFrame::Done => format!("{DATA_PREFIX}{DONE_MARKER}"),
            // The detail line keeps the double space the reader expects.
            StreamFrame::Error(message) => {
                format!("{DATA_PREFIX}{ERROR_MARKER}{FRAME_DELIMITER}{DATA_PREFIX} {message}")
            }
            StreamFrame::JobId(id) => format!("{JOB_ID_PREFIX}{id}{FRAME_DELIMITER}"),
        };
        Bytes::from(line)
    }
}

/// Wrap a base64 audio payload in comment markers.
pub fn wrap_audio(data: &str) -> String {
    format!("{AUDIO_OPEN}{data}{AUDIO_CLOSE}")
}

/// Strip comment markers from an audio payload.
///
/// Returns `None` if the value is not wrapped.
pub fn unwrap_audio(line: &str) -> Option<&str> {
    line.strip_prefix(AUDIO_OPEN)?.strip_suffix(AUDIO_CLOSE)
}

/// Escape a provider job identifier for use as a single URL path segment.
pub fn escape_job_id(id: &str) -> String {
    id.replace('/', "|")
}

/// Reverse [`escape_job_id`].
pub fn unescape_job_id(id: &str) -> String {
    id.replace('|', "/")
}
