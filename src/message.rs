use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Persona,
}

// One entry of the append-only conversation log of a game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    // For user messages the addressee, for persona messages the author.
    pub persona_slug: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>, addressee: Option<&str>) -> Self {
        Message {
            role: MessageRole::User,
            persona_slug: addressee.map(String::from),
            content: content.into(),
            audio_base64: None,
            voice_id: None,
        }
    }

    pub fn persona(slug: &str, content: impl Into<String>) -> Self {
        Message {
            role: MessageRole::Persona,
            persona_slug: Some(slug.to_string()),
            content: content.into(),
            audio_base64: None,
            voice_id: None,
        }
    }

    pub fn with_audio(mut self, audio_base64: Option<String>, voice_id: Option<String>) -> Self {
        self.audio_base64 = audio_base64;
        self.voice_id = voice_id;
        self
    }

    /// Whether the persona `slug` is allowed to see this message.
    ///
    /// Player questions are visible to their addressee (or to anyone when
    /// unaddressed); persona replies only to their author.
    pub fn is_visible_to(&self, slug: &str) -> bool {
        match (self.role, self.persona_slug.as_deref()) {
            (MessageRole::User, None) => true,
            (_, Some(owner)) => owner == slug,
            (MessageRole::Persona, None) => false,
        }
    }
}
