//! Concatenation of segments with speaker-change crossfades.

use super::{AudioSegment, Pcm};
use crate::error::{PodError, Result};
use std::time::Duration;
use tracing::debug;

/// Assembles ordered segments into one recording.
#[derive(Debug, Clone)]
pub struct Assembler {
    crossfade: Duration,
}

impl Assembler {
    pub fn new(crossfade: Duration) -> Self {
        Self { crossfade }
    }

    /// Assemble `segments`, which must hold ordinals `0..expected` exactly once.
    pub fn assemble(&self, segments: &[AudioSegment], expected: usize) -> Result<Pcm> {
        assemble(segments, expected, self.crossfade)
    }
}

/// See [`Assembler::assemble`].
pub fn assemble(segments: &[AudioSegment], expected: usize, crossfade: Duration) -> Result<Pcm> {
    let ordered = order(segments, expected)?;

    let mut output: Option<Pcm> = None;
    let mut previous: Option<(&AudioSegment, usize)> = None;

    for segment in ordered {
        let pcm = Pcm::from_wav(&segment.wav).map_err(|e| {
            PodError::Assembly(format!("segment {} is not valid audio: {}", segment.ordinal, e))
        })?;
        if pcm.samples.is_empty() {
            return Err(PodError::Assembly(format!(
                "segment {} has no audio samples",
                segment.ordinal
            )));
        }

        let frames = pcm.frames();
        match output.as_mut() {
            None => output = Some(pcm),
            Some(out) => {
                if out.sample_rate != pcm.sample_rate || out.channels != pcm.channels {
                    return Err(PodError::Assembly(format!(
                        "segment {} is {} Hz/{} ch, expected {} Hz/{} ch",
                        segment.ordinal, pcm.sample_rate, pcm.channels, out.sample_rate, out.channels
                    )));
                }

                let overlap = match previous {
                    Some((prev, prev_frames)) if prev.speaker != segment.speaker => out
                        .frames_for(crossfade)
                        .min(prev_frames)
                        .min(frames),
                    _ => 0,
                };
                if overlap > 0 {
                    debug!(
                        "Crossfading {} frames into segment {}",
                        overlap, segment.ordinal
                    );
                }
                append_with_crossfade(out, &pcm, overlap);
            }
        }
        previous = Some((segment, frames));
    }

    output.ok_or_else(|| PodError::Assembly("no segments to assemble".to_string()))
}

fn order(segments: &[AudioSegment], expected: usize) -> Result<Vec<&AudioSegment>> {
    if expected == 0 {
        return Err(PodError::Assembly("no segments to assemble".to_string()));
    }
    let mut slots: Vec<Option<&AudioSegment>> = vec![None; expected];
    for segment in segments {
        let slot = slots.get_mut(segment.ordinal).ok_or_else(|| {
            PodError::Assembly(format!(
                "segment ordinal {} is outside the {} expected segment(s)",
                segment.ordinal, expected
            ))
        })?;
        if slot.is_some() {
            return Err(PodError::Assembly(format!(
                "duplicate segment ordinal {}",
                segment.ordinal
            )));
        }
        *slot = Some(segment);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| PodError::Assembly(format!("missing segment ordinal {}", i))))
        .collect()
}

/// Append `next` to `out`, overlapping the last `overlap` frames with linear fades.
fn append_with_crossfade(out: &mut Pcm, next: &Pcm, overlap: usize) {
    let channels = out.channels.max(1) as usize;
    let start = out.samples.len() - overlap * channels;

    for frame in 0..overlap {
        let fade_in = frame as f32 / overlap as f32;
        let fade_out = 1.0 - fade_in;
        for ch in 0..channels {
            let i = frame * channels + ch;
            let mixed = out.samples[start + i] as f32 * fade_out + next.samples[i] as f32 * fade_in;
            out.samples[start + i] = mixed.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
    }
    out.samples.extend_from_slice(&next.samples[overlap * channels..]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Speaker;

    const RATE: u32 = 24_000;

    fn tone(ordinal: usize, speaker: Speaker, seconds: f64, level: i16) -> AudioSegment {
        let frames = (seconds * RATE as f64) as usize;
        let wav = Pcm::new(RATE, 1, vec![level; frames]).to_wav().unwrap();
        AudioSegment::from_wav(ordinal, speaker, wav).unwrap()
    }

    #[test]
    fn test_crossfade_between_speakers() {
        let segments = vec![
            tone(0, Speaker::Host, 2.0, 1_000),
            tone(1, Speaker::Expert, 3.0, 2_000),
        ];
        let pcm = Assembler::new(Duration::from_millis(500))
            .assemble(&segments, 2)
            .unwrap();
        assert_eq!(pcm.duration(), Duration::from_millis(4_500));
    }

    #[test]
    fn test_same_speaker_concatenates() {
        let segments = vec![
            tone(0, Speaker::Host, 2.0, 1_000),
            tone(1, Speaker::Host, 3.0, 2_000),
        ];
        let pcm = assemble(&segments, 2, Duration::from_millis(500)).unwrap();
        assert_eq!(pcm.duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_crossfade_bounded_by_short_segment() {
        let segments = vec![
            tone(0, Speaker::Host, 0.2, 1_000),
            tone(1, Speaker::Expert, 1.0, 1_000),
        ];
        let pcm = assemble(&segments, 2, Duration::from_millis(500)).unwrap();
        assert_eq!(pcm.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_crossfade_mixes_linearly() {
        let segments = vec![
            tone(0, Speaker::Host, 1.0, 1_000),
            tone(1, Speaker::Expert, 1.0, 3_000),
        ];
        let pcm = assemble(&segments, 2, Duration::from_millis(500)).unwrap();
        let overlap_start = RATE as usize / 2;
        assert_eq!(pcm.samples[overlap_start], 1_000);
        let mid = pcm.samples[overlap_start + RATE as usize / 4];
        assert!((1_900..=2_100).contains(&mid));
        assert_eq!(*pcm.samples.last().unwrap(), 3_000);
    }

    #[test]
    fn test_segments_are_ordered_by_ordinal() {
        let segments = vec![
            tone(1, Speaker::Host, 0.5, 2),
            tone(0, Speaker::Host, 0.5, 1),
        ];
        let pcm = assemble(&segments, 2, Duration::ZERO).unwrap();
        assert_eq!(pcm.samples[0], 1);
        assert_eq!(*pcm.samples.last().unwrap(), 2);
    }

    #[test]
    fn test_missing_ordinal() {
        let segments = vec![tone(0, Speaker::Host, 0.5, 1), tone(2, Speaker::Host, 0.5, 1)];
        let err = assemble(&segments, 3, Duration::ZERO).unwrap_err();
        assert!(matches!(err, PodError::Assembly(ref m) if m.contains("missing segment ordinal 1")));
    }

    #[test]
    fn test_duplicate_ordinal() {
        let segments = vec![tone(0, Speaker::Host, 0.5, 1), tone(0, Speaker::Host, 0.5, 1)];
        assert!(matches!(assemble(&segments, 2, Duration::ZERO), Err(PodError::Assembly(_))));
    }

    #[test]
    fn test_corrupt_payload() {
        let mut bad = tone(1, Speaker::Expert, 0.5, 1);
        bad.wav = b"garbage".to_vec();
        let segments = vec![tone(0, Speaker::Host, 0.5, 1), bad];
        assert!(matches!(assemble(&segments, 2, Duration::ZERO), Err(PodError::Assembly(_))));
    }

    #[test]
    fn test_empty_audio() {
        let empty = AudioSegment {
            ordinal: 0,
            speaker: Speaker::Host,
            duration: Duration::ZERO,
            wav: Pcm::new(RATE, 1, Vec::new()).to_wav().unwrap(),
            path: None,
        };
        assert!(matches!(assemble(&[empty], 1, Duration::ZERO), Err(PodError::Assembly(_))));
    }

    #[test]
    fn test_sample_rate_mismatch() {
        let other = AudioSegment::from_wav(
            1,
            Speaker::Expert,
            Pcm::new(16_000, 1, vec![0; 1_600]).to_wav().unwrap(),
        )
        .unwrap();
        let segments = vec![tone(0, Speaker::Host, 0.5, 1), other];
        assert!(matches!(assemble(&segments, 2, Duration::ZERO), Err(PodError::Assembly(_))));
    }
}
