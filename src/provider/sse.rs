//! SSE decoding for provider streaming responses.
//!
//! Provides [`SseDecoder`] for line-buffered extraction of JSON payloads
//! from `data:` lines, and [`chunk_stream`] to turn a raw byte stream into
//! a lazy stream of parsed chunks. Handles TCP chunk boundary reassembly.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;

use super::{ChunkStream, ProviderError};

/// Longest SSE line accepted from a provider.
///
/// Image and audio events carry whole base64 payloads on one line, so this
/// is sized for those rather than for text deltas.
pub const MAX_LINE_BUFFER: usize = 16 * 1024 * 1024;

/// Line-buffering SSE decoder.
///
/// Buffers raw bytes across chunk boundaries, reassembles complete SSE lines
/// and parses `data:` payloads. Stops producing output after `[DONE]`, or
/// after reporting a line that outgrew [`MAX_LINE_BUFFER`].
pub struct SseDecoder {
    buffer: Vec<u8>,
    done_received: bool,
    overflowed: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            done_received: false,
            overflowed: false,
        }
    }

    /// Whether `data: [DONE]` has been seen.
    pub fn done_received(&self) -> bool {
        self.done_received
    }

    /// Whether the decoder will produce no further output.
    pub fn is_finished(&self) -> bool {
        self.done_received || self.overflowed
    }

    /// Process a chunk of bytes, returning every chunk completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<Value, ProviderError>> {
        let mut out = Vec::new();
        if self.is_finished() {
            return out;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&line, &mut out);
            if self.done_received {
                self.buffer.clear();
                return out;
            }
        }

        if self.buffer.len() > MAX_LINE_BUFFER {
            tracing::warn!(
                buffered = self.buffer.len(),
                limit = MAX_LINE_BUFFER,
                "SSE line exceeded buffer cap, ending stream"
            );
            self.buffer = Vec::new();
            self.overflowed = true;
            out.push(Err(ProviderError::new(format!(
                "Provider sent an event larger than {} bytes",
                MAX_LINE_BUFFER
            ))));
        }
        out
    }

    /// Flush any remaining buffered content as a final line.
    pub fn finish(&mut self) -> Vec<Result<Value, ProviderError>> {
        let mut out = Vec::new();
        if !self.is_finished() && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut out);
        }
        out
    }

    fn process_line(&mut self, raw: &[u8], out: &mut Vec<Result<Value, ProviderError>>) {
        let Ok(line) = std::str::from_utf8(raw) else {
            tracing::warn!("Skipping non UTF-8 SSE line");
            return;
        };
        let line = line.trim_end_matches(['\n', '\r']);

        // event:, id:, retry: and comment lines carry nothing we forward.
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);
        if data.is_empty() {
            return;
        }
        if data == "[DONE]" {
            self.done_received = true;
            return;
        }

        match serde_json::from_str::<Value>(data) {
            Ok(value) => match ProviderError::from_value(&value) {
                Some(err) => out.push(Err(err)),
                None => out.push(Ok(value)),
            },
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed SSE data line");
            }
        }
    }
}

struct DecodeState<S> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<Value, ProviderError>>,
    finished: bool,
}

/// Turn a raw SSE byte stream into a lazy stream of parsed chunks.
///
/// The stream ends after `[DONE]`, at end of input, or after the first
/// error (transport failure or an oversized event). Dropping it drops the underlying byte stream.
pub fn chunk_stream<S, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ProviderError>,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let items = state.decoder.push(&chunk);
                    state.pending.extend(items);
                    if state.decoder.is_finished() {
                        state.finished = true;
                    }
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(e.into()));
                    state.finished = true;
                }
                None => {
                    let items = state.decoder.finish();
                    state.pending.extend(items);
                    state.finished = true;
                }
            }
        }
    }))
}
