//! Wire protocol: frame encoding and the connection-bound frame writer.

pub mod frame;
pub mod writer;

pub use frame::{
    escape_job_id, unescape_job_id, unwrap_audio, wrap_audio, StreamFrame, DATA_PREFIX,
    DONE_MARKER, ERROR_MARKER, FRAME_DELIMITER, JOB_ID_PREFIX, THINKING_MARKER,
};
pub use writer::{Disconnected, FrameWriter, ABANDONED_MESSAGE};
