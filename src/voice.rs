use crate::scenario::PersonaDefinition;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{CreateSpeechRequestArgs, SpeechModel, Voice},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::collections::BTreeMap;

const OPENAI_VOICES: [&str; 6] = ["onyx", "nova", "echo", "shimmer", "fable", "alloy"];

/// Renders persona replies as speech. Absence or failure never affects the game.
#[async_trait]
pub trait VoiceSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Option<Vec<u8>>;

    fn voices(&self) -> Vec<String>;
}

// Hands out the available voices in persona order, wrapping around.
pub fn assign_voices(
    personas: &[PersonaDefinition],
    voices: &[String],
) -> BTreeMap<String, String> {
    if voices.is_empty() {
        return BTreeMap::new();
    }
    personas
        .iter()
        .zip(voices.iter().cycle())
        .map(|(persona, voice)| (persona.slug.clone(), voice.clone()))
        .collect()
}

pub fn encode_audio(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub struct OpenAIVoice {
    client: Client<OpenAIConfig>,
    speed: f32,
}

impl OpenAIVoice {
    pub fn new(api_key: &str) -> Self {
        let openai_config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(openai_config),
            speed: 1.1,
        }
    }

    fn voice(voice_id: &str) -> Option<Voice> {
        match voice_id {
            "alloy" => Some(Voice::Alloy),
            "echo" => Some(Voice::Echo),
            "fable" => Some(Voice::Fable),
            "onyx" => Some(Voice::Onyx),
            "nova" => Some(Voice::Nova),
            "shimmer" => Some(Voice::Shimmer),
            _ => None,
        }
    }
}

#[async_trait]
impl VoiceSynthesizer for OpenAIVoice {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Option<Vec<u8>> {
        let Some(voice) = Self::voice(voice_id) else {
            log::warn!("Unknown voice id {:?}, skipping audio", voice_id);
            return None;
        };

        let request = match CreateSpeechRequestArgs::default()
            .input(text)
            .voice(voice)
            .model(SpeechModel::Tts1)
            .speed(self.speed)
            .build()
        {
            Ok(request) => request,
            Err(e) => {
                log::error!("Failed to build speech request: {:#?}", e);
                return None;
            }
        };

        match self.client.audio().speech(request).await {
            Ok(response) => Some(response.bytes.to_vec()),
            Err(e) => {
                log::error!("Failed to synthesize speech with {}: {}", voice_id, e);
                None
            }
        }
    }

    fn voices(&self) -> Vec<String> {
        OPENAI_VOICES.iter().map(|v| v.to_string()).collect()
    }
}
