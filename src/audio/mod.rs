//! Audio segments and their assembly into the final episode.

mod assemble;
mod wav;

pub use assemble::Assembler;
pub use wav::Pcm;

use crate::analysis::Speaker;
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Synthesised audio for one script line.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub ordinal: usize,
    pub speaker: Speaker,
    pub duration: Duration,
    /// WAV file bytes.
    pub wav: Vec<u8>,
    pub path: Option<PathBuf>,
}

impl AudioSegment {
    /// Wrap WAV bytes, decoding them once to validate and measure.
    pub fn from_wav(ordinal: usize, speaker: Speaker, wav: Vec<u8>) -> Result<Self> {
        let duration = Pcm::from_wav(&wav)?.duration();
        Ok(Self {
            ordinal,
            speaker,
            duration,
            wav,
            path: None,
        })
    }

    /// Load a segment file written by the pipeline.
    pub fn load(ordinal: usize, speaker: Speaker, path: &Path) -> Result<Self> {
        let wav = std::fs::read(path)?;
        let mut segment = Self::from_wav(ordinal, speaker, wav)?;
        segment.path = Some(path.to_path_buf());
        Ok(segment)
    }
}

/// File name for a segment, e.g. `segment_003_expert.wav`.
pub fn segment_file_name(ordinal: usize, speaker: Speaker) -> String {
    format!("segment_{:03}_{}.wav", ordinal, speaker)
}
