//! Text-to-speech.
//!
//! [`VoiceSynthesizer`] is the seam the pipeline calls; [`VoiceMapper`] picks the
//! voice and its settings for each script line.

mod elevenlabs;

pub use elevenlabs::ElevenLabsSynthesizer;

use crate::analysis::Speaker;
use crate::config::{VoiceRoleSettings, VoiceSettings};
use crate::error::Result;
use crate::script::Script;
use async_trait::async_trait;
use serde::Serialize;

/// Voice and delivery settings for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceProfile {
    pub voice_name: String,
    pub voice_id: Option<String>,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl From<&VoiceRoleSettings> for VoiceProfile {
    fn from(role: &VoiceRoleSettings) -> Self {
        Self {
            voice_name: role.voice_name.clone(),
            voice_id: role.voice_id.clone(),
            stability: role.stability,
            similarity_boost: role.similarity_boost,
            style: role.style,
            use_speaker_boost: role.use_speaker_boost,
        }
    }
}

/// Speech synthesis backend. Returns a complete WAV file.
#[async_trait]
pub trait VoiceSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, profile: &VoiceProfile) -> Result<Vec<u8>>;
}

/// Maps speakers and tones to voice profiles.
#[derive(Debug, Clone)]
pub struct VoiceMapper {
    host: VoiceProfile,
    expert: VoiceProfile,
    panelist: VoiceProfile,
}

impl Default for VoiceMapper {
    fn default() -> Self {
        Self::new(&VoiceSettings::default())
    }
}

impl VoiceMapper {
    pub fn new(settings: &VoiceSettings) -> Self {
        Self {
            host: VoiceProfile::from(&settings.host),
            expert: VoiceProfile::from(&settings.expert),
            panelist: VoiceProfile::from(&settings.panelist),
        }
    }

    /// Profile for `speaker`, adjusted for the requested tone.
    pub fn profile(&self, speaker: Speaker, tone: &str) -> VoiceProfile {
        let mut profile = match speaker {
            Speaker::Host => self.host.clone(),
            Speaker::Expert => self.expert.clone(),
            Speaker::Panelist => self.panelist.clone(),
        };

        match tone.trim().to_lowercase().as_str() {
            "authoritative" => {
                profile.stability = 0.8;
                profile.similarity_boost = 0.7;
            }
            "welcoming" => {
                profile.stability = 0.65;
                profile.style = 0.1;
            }
            _ => {}
        }
        profile
    }

    /// Voice assignment for every line of `script`, as CSV.
    pub fn segments_csv(&self, script: &Script) -> String {
        let mut csv = String::from(
            "segment_id,speaker,voice_name,voice_id,stability,similarity_boost,style,text\n",
        );
        for line in &script.lines {
            let profile = self.profile(line.speaker, &line.tone);
            let row = [
                format!("segment_{:03}", line.ordinal),
                line.speaker.to_string(),
                profile.voice_name,
                profile.voice_id.unwrap_or_default(),
                profile.stability.to_string(),
                profile.similarity_boost.to_string(),
                profile.style.to_string(),
                line.text.clone(),
            ];
            let fields: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
            csv.push_str(&fields.join(","));
            csv.push('\n');
        }
        csv
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
