//! PCM16 audio reassembly.
//!
//! Audio arrives as base64 fragments cut at arbitrary points. Fragments are
//! buffered until they form complete 4-character groups, and decoded bytes
//! are buffered to an even length before conversion to samples.

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine as _,
};
use thiserror::Error;

/// Sample rate of PCM16 audio returned by the providers.
pub const SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AudioError {
    #[error("Invalid base64 audio data: {0}")]
    Decode(String),

    #[error("Undecodable audio data at end of stream ({0} characters)")]
    Residue(usize),
}

/// Incremental base64 PCM16 decoder.
#[derive(Debug, Default)]
pub struct PcmDecoder {
    residue: String,
    odd_byte: Option<u8>,
}

impl PcmDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one base64 fragment, returning the samples it completes.
    pub fn push(&mut self, fragment: &str) -> Result<Vec<f32>, AudioError> {
        self.residue
            .extend(fragment.chars().filter(|c| !c.is_ascii_whitespace()));

        let complete = self.residue.len() / 4 * 4;
        if complete == 0 {
            return Ok(Vec::new());
        }
        let groups: String = self.residue.drain(..complete).collect();
        let bytes = decode_groups(&groups)?;
        Ok(self.samples(&bytes))
    }

    /// End of stream: decode what is left.
    ///
    /// A trailing odd byte is completed by duplicating it.
    pub fn finish(&mut self) -> Result<Vec<f32>, AudioError> {
        let mut samples = Vec::new();
        if !self.residue.is_empty() {
            let residue = std::mem::take(&mut self.residue);
            let bytes = STANDARD_NO_PAD
                .decode(residue.trim_end_matches('='))
                .map_err(|_| AudioError::Residue(residue.len()))?;
            samples = self.samples(&bytes);
        }
        if let Some(last) = self.odd_byte.take() {
            samples.push(sample(last, last));
        }
        Ok(samples)
    }

    fn samples(&mut self, bytes: &[u8]) -> Vec<f32> {
        let mut joined = Vec::with_capacity(bytes.len() + 1);
        joined.extend(self.odd_byte.take());
        joined.extend_from_slice(bytes);
        if joined.len() % 2 == 1 {
            self.odd_byte = joined.pop();
        }
        joined
            .chunks_exact(2)
            .map(|pair| sample(pair[0], pair[1]))
            .collect()
    }
}

fn sample(lo: u8, hi: u8) -> f32 {
    i16::from_le_bytes([lo, hi]) as f32 / 32768.0
}

/// Decode complete groups; padding may close a group mid-buffer when two
/// independently encoded fragments were concatenated.
fn decode_groups(groups: &str) -> Result<Vec<u8>, AudioError> {
    let mut bytes = Vec::with_capacity(groups.len() / 4 * 3);
    let mut start = 0;
    for end in (4..=groups.len()).step_by(4) {
        let group = &groups[end - 4..end];
        if group.ends_with('=') || end == groups.len() {
            let segment = &groups[start..end];
            STANDARD
                .decode_vec(segment, &mut bytes)
                .map_err(|e| AudioError::Decode(e.to_string()))?;
            start = end;
        }
    }
    Ok(bytes)
}

/// Decode a whole base64 PCM16 payload in one go.
pub fn decode_pcm(encoded: &str) -> Result<Vec<f32>, AudioError> {
    let mut decoder = PcmDecoder::new();
    let mut samples = decoder.push(encoded)?;
    samples.extend(decoder.finish()?);
    Ok(samples)
}
