//! 16-bit PCM WAV encoding and decoding.

use crate::error::{PodError, Result};
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

/// Decoded interleaved 16-bit PCM audio.
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl Pcm {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    /// Build from raw little-endian PCM bytes, as returned by the TTS API.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(PodError::Assembly(format!(
                "raw PCM payload has an odd length of {} bytes",
                bytes.len()
            )));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Self::new(sample_rate, channels, samples))
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Frames covering `duration` at this sample rate.
    pub fn frames_for(&self, duration: Duration) -> usize {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as usize
    }

    fn spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }

    /// Encode as a WAV file in memory.
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, self.spec())?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(cursor.into_inner())
    }

    /// Decode a WAV file held in memory. Empty or unreadable payloads are errors.
    pub fn from_wav(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(PodError::Assembly("audio payload is empty".to_string()));
        }
        let mut reader = hound::WavReader::new(Cursor::new(bytes))
            .map_err(|e| PodError::Assembly(format!("Failed to parse WAV data: {}", e)))?;

        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            return Err(PodError::Assembly(format!(
                "unsupported WAV format: {} bit {:?}",
                spec.bits_per_sample, spec.sample_format
            )));
        }

        let samples = reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PodError::Assembly(format!("Failed to read WAV samples: {}", e)))?;

        Ok(Self::new(spec.sample_rate, spec.channels, samples))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_wav(&bytes)
    }
}
