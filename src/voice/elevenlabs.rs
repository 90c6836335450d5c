//! ElevenLabs text-to-speech client.

use super::{VoiceProfile, VoiceSynthesizer};
use crate::audio::Pcm;
use crate::config::VoiceSettings;
use crate::error::{PodError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, instrument};

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettingsBody,
}

#[derive(Debug, Serialize)]
struct VoiceSettingsBody {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
}

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    voices: Vec<VoiceEntry>,
}

#[derive(Debug, Deserialize)]
struct VoiceEntry {
    voice_id: String,
    name: String,
}

/// Synthesiser that requests raw PCM from ElevenLabs and wraps it in WAV.
pub struct ElevenLabsSynthesizer {
    client: Client,
    api_key: String,
    base_url: String,
    model_id: String,
    sample_rate: u32,
    voice_ids: Mutex<HashMap<String, String>>,
}

impl ElevenLabsSynthesizer {
    pub fn new(api_key: &str, settings: &VoiceSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| PodError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model_id: settings.model_id.clone(),
            sample_rate: settings.sample_rate,
            voice_ids: Mutex::new(HashMap::new()),
        })
    }

    /// Create from the `ELEVENLABS_API_KEY` environment variable.
    pub fn from_env(settings: &VoiceSettings) -> Result<Self> {
        let api_key = std::env::var("ELEVENLABS_API_KEY").map_err(|_| {
            PodError::Configuration("ELEVENLABS_API_KEY environment variable not set".to_string())
        })?;
        Self::new(&api_key, settings)
    }

    /// Fetch the voices available to this account, by name.
    pub async fn list_voices(&self) -> Result<HashMap<String, String>> {
        let response = self
            .client
            .get(format!("{}/voices", self.base_url))
            .header("xi-api-key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let voices: VoicesResponse = response.json().await?;
        Ok(voices
            .voices
            .into_iter()
            .map(|v| (v.name, v.voice_id))
            .collect())
    }

    async fn voice_id(&self, profile: &VoiceProfile) -> Result<String> {
        if let Some(id) = &profile.voice_id {
            return Ok(id.clone());
        }
        if let Some(id) = self.cached(&profile.voice_name) {
            return Ok(id);
        }

        let voices = self.list_voices().await?;
        debug!("Fetched {} voices", voices.len());
        if let Ok(mut cache) = self.voice_ids.lock() {
            cache.extend(voices);
        }

        self.cached(&profile.voice_name).ok_or_else(|| {
            PodError::PermanentApi(format!(
                "Voice '{}' is not available on this ElevenLabs account",
                profile.voice_name
            ))
        })
    }

    fn cached(&self, name: &str) -> Option<String> {
        let cache = self.voice_ids.lock().ok()?;
        cache
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, id)| id.clone())
    }
}

#[async_trait]
impl VoiceSynthesizer for ElevenLabsSynthesizer {
    #[instrument(skip(self, text, profile), fields(voice = %profile.voice_name, chars = text.len()))]
    async fn synthesize(&self, text: &str, profile: &VoiceProfile) -> Result<Vec<u8>> {
        let voice_id = self.voice_id(profile).await?;
        let url = format!(
            "{}/text-to-speech/{}?output_format=pcm_{}",
            self.base_url, voice_id, self.sample_rate
        );

        let request = SpeechRequest {
            text,
            model_id: &self.model_id,
            voice_settings: VoiceSettingsBody {
                stability: profile.stability,
                similarity_boost: profile.similarity_boost,
                style: profile.style,
                use_speaker_boost: profile.use_speaker_boost,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(PodError::TransientApi(
                "ElevenLabs returned no audio".to_string(),
            ));
        }

        let pcm = Pcm::from_le_bytes(&bytes, self.sample_rate, 1)?;
        info!("Synthesised {:.1}s of audio", pcm.duration().as_secs_f64());
        pcm.to_wav()
    }
}

/// Rate limits and server errors are transient; other failures are not.
fn classify_status(status: StatusCode, body: &str) -> PodError {
    let message = format!(
        "ElevenLabs request failed ({}): {}",
        status,
        body.chars().take(300).collect::<String>()
    );
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        PodError::TransientApi(message)
    } else {
        PodError::PermanentApi(message)
    }
}
