//! Client side of the frame protocol.
//!
//! Decodes the proxy's `\r`-delimited stream, reassembles PCM audio and
//! keeps the conversation history that is resent with every turn.

pub mod audio;
pub mod history;
pub mod reader;
pub mod session;

pub use audio::{decode_pcm, AudioError, PcmDecoder, SAMPLE_RATE};
pub use history::{format_video_source, Conversation, REMOVED_VIDEO, VIDEO_SOURCE_PREFIX};
pub use reader::{FrameDecoder, ReaderEvent};
pub use session::{ChatApi, ChatSession, ClientError, TurnEvent, TurnOutcome};
