//! Push-model frame sink backed by a bounded channel.
//!
//! The receiving half becomes the HTTP response body. The writer enforces
//! the terminal-frame invariant: at most one of `Done`/`Error`/`JobId` is
//! ever written, and a writer dropped before writing one synthesizes an
//! `Error` so the reader never hangs.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::frame::StreamFrame;

/// Channel capacity between the producer task and the response body.
const FRAME_BUFFER: usize = 64;

/// Message used when a producer ends without a terminal frame.
pub const ABANDONED_MESSAGE: &str = "Stream ended unexpectedly";

/// The client side of the connection has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client disconnected")]
pub struct Disconnected;

/// Writes encoded frames to a live connection.
pub struct FrameWriter {
    tx: mpsc::Sender<Bytes>,
    terminated: bool,
}

impl FrameWriter {
    /// Create a writer and the byte stream that feeds the response body.
    pub fn channel() -> (Self, ReceiverStream<Bytes>) {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        (
            Self {
                tx,
                terminated: false,
            },
            ReceiverStream::new(rx),
        )
    }

    /// Whether a terminal frame has already been written.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Whether the response body has been dropped (client went away).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Write one frame.
    ///
    /// Frames after the terminal one are dropped with a warning.
    pub async fn send(&mut self, frame: StreamFrame) -> Result<(), Disconnected> {
        if self.terminated {
            tracing::warn!(frame = ?frame, "Dropping frame written after stream terminated");
            return Ok(());
        }
        if frame.is_terminal() {
            self.terminated = true;
        }
        self.tx.send(frame.encode()).await.map_err(|_| Disconnected)
    }

    pub async fn thinking(&mut self) -> Result<(), Disconnected> {
        self.send(StreamFrame::Thinking).await
    }

    pub async fn text(&mut self, text: impl Into<String>) -> Result<(), Disconnected> {
        self.send(StreamFrame::Text(text.into())).await
    }

    pub async fn audio(&mut self, data: impl Into<String>) -> Result<(), Disconnected> {
        self.send(StreamFrame::AudioDelta(data.into())).await
    }

    /// Terminal success. A disconnected client is not an error at this point.
    pub async fn done(&mut self) {
        if self.send(StreamFrame::Done).await.is_err() {
            tracing::debug!("Client disconnected before [DONE] was delivered");
        }
    }

    /// Terminal failure with a human-readable message.
    pub async fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(error = %message, "Stream terminated with error");
        if self.send(StreamFrame::Error(message)).await.is_err() {
            tracing::debug!("Client disconnected before [ERROR] was delivered");
        }
    }

    /// Terminal marker for submit-only endpoints.
    pub async fn job_id(&mut self, id: impl Into<String>) {
        if self.send(StreamFrame::JobId(id.into())).await.is_err() {
            tracing::debug!("Client disconnected before job id was delivered");
        }
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        if !self.terminated {
            self.terminated = true;
            let frame = StreamFrame::Error(ABANDONED_MESSAGE.to_string());
            // Best effort: the channel may be full or closed.
            let _ = self.tx.try_send(frame.encode());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(stream: ReceiverStream<Bytes>) -> String {
        let chunks: Vec<Bytes> = stream.collect().await;
        chunks
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_frames_written_in_order() {
        let (mut writer, stream) = FrameWriter::channel();
        writer.text("He").await.unwrap();
        writer.text("llo").await.unwrap();
        writer.done().await;
        drop(writer);

        assert_eq!(collect(stream).await, "data: He\rdata: llo\rdata: [DONE]");
    }

    #[tokio::test]
    async fn test_second_terminal_frame_is_dropped() {
        let (mut writer, stream) = FrameWriter::channel();
        writer.done().await;
        writer.error("late failure").await;
        writer.done().await;
        drop(writer);

        assert_eq!(collect(stream).await, "data: [DONE]");
    }

    #[tokio::test]
    async fn test_drop_without_terminal_synthesizes_error() {
        let (mut writer, stream) = FrameWriter::channel();
        writer.thinking().await.unwrap();
        drop(writer);

        let body = collect(stream).await;
        assert!(body.ends_with(&format!("data: [ERROR]\rdata:  {}", ABANDONED_MESSAGE)));
    }

    #[tokio::test]
    async fn test_send_reports_disconnect() {
        let (mut writer, stream) = FrameWriter::channel();
        drop(stream);
        assert_eq!(writer.text("x").await, Err(Disconnected));
    }
}
