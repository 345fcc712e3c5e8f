use super::{PromptKey, PromptTemplates, extract_notes};
use crate::completion::{ChatTurn, CompletionClient};
use crate::error::AIError;
use crate::game_state::{Clue, GameSession, PersonaState, TurnDelta};
use crate::message::{Message, MessageRole};
use crate::scenario::{PersonaDefinition, Scenario};
use crate::voice::{VoiceSynthesizer, encode_audio};
use std::sync::Arc;

pub const DEFAULT_HISTORY_WINDOW: usize = 10;
pub const NERVOUS_STRESS: f64 = 0.3;
pub const SLIP_STRESS: f64 = 0.6;
pub const FATIGUE_INTERROGATIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub language: String,
    pub history_window: usize,
    pub templates: Arc<PromptTemplates>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            language: "English".to_string(),
            history_window: DEFAULT_HISTORY_WINDOW,
            templates: Arc::new(PromptTemplates::default()),
        }
    }
}

// The stress-dependent tail of a persona's system prompt. Empty while calm.
pub fn stress_addendum(templates: &PromptTemplates, state: PersonaState) -> String {
    let mut addendum = String::new();

    if state.stress_level > NERVOUS_STRESS {
        addendum.push_str(&format!(
            "\n=== CURRENT STATE ===\nStress Level: {:.0}%\n{}\n",
            state.stress_level * 100.0,
            templates.get(PromptKey::NervousAddendum)
        ));
    }
    if state.stress_level > SLIP_STRESS {
        addendum.push_str(templates.get(PromptKey::SlipAddendum));
        addendum.push('\n');
    }
    if state.interrogation_count > FATIGUE_INTERROGATIONS {
        addendum.push('\n');
        addendum.push_str(
            &templates
                .get(PromptKey::FatigueAddendum)
                .replace("{count}", &state.interrogation_count.to_string()),
        );
        addendum.push('\n');
    }

    addendum
}

/// One suspect: its own knowledge, its own view of the conversation.
pub struct PersonaAgent {
    definition: PersonaDefinition,
    clue_keywords: Vec<String>,
    voice_id: Option<String>,
    completion: Arc<dyn CompletionClient>,
    voice: Option<Arc<dyn VoiceSynthesizer>>,
    config: AgentConfig,
}

impl PersonaAgent {
    pub fn new(
        definition: PersonaDefinition,
        clue_keywords: Vec<String>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            definition,
            clue_keywords,
            voice_id: None,
            completion,
            voice: None,
            config: AgentConfig::default(),
        }
    }

    pub fn with_voice(mut self, voice: Arc<dyn VoiceSynthesizer>, voice_id: String) -> Self {
        self.voice = Some(voice);
        self.voice_id = Some(voice_id);
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn slug(&self) -> &str {
        &self.definition.slug
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &PersonaDefinition {
        &self.definition
    }

    pub fn clue_keywords(&self) -> &[String] {
        &self.clue_keywords
    }

    pub fn voice_id(&self) -> Option<&str> {
        self.voice_id.as_deref()
    }

    pub fn build_system_prompt(&self, scenario: &Scenario, state: PersonaState) -> String {
        let persona = &self.definition;
        let templates = &self.config.templates;
        let rules = templates
            .get(PromptKey::PersonaRules)
            .replace("{name}", &persona.name)
            .replace("{language}", &self.config.language);

        format!(
            "You are {name}, {role}.\n\n\
YOUR PERSONALITY:\n{personality}\n\n\
YOUR SECRET KNOWLEDGE (never reveal it directly, but let it show through your behavior):\n{private}\n\n\
WHAT EVERYONE KNOWS:\n{shared}\n\n\
CASE TIMELINE:\n{timeline}\n\n\
WHAT YOU KNOW ABOUT OTHERS:\n{others}\n\n\
{rules}{addendum}",
            name = persona.name,
            role = persona.role,
            personality = persona.personality,
            private = persona.private_knowledge,
            shared = scenario.shared_knowledge,
            timeline = scenario.timeline,
            others = persona.knows_about_others,
            rules = rules,
            addendum = stress_addendum(templates, state),
        )
    }

    /// The slice of the game log this persona is allowed to remember.
    pub fn persona_history(&self, messages: &[Message]) -> Vec<ChatTurn> {
        let visible: Vec<&Message> = messages
            .iter()
            .filter(|m| m.is_visible_to(self.slug()))
            .collect();
        let start = visible.len().saturating_sub(self.config.history_window);

        visible[start..]
            .iter()
            .map(|m| match m.role {
                MessageRole::User => ChatTurn::User(m.content.clone()),
                MessageRole::Persona => ChatTurn::Assistant(m.content.clone()),
            })
            .collect()
    }

    // First keyword in list order wins.
    pub fn detect_clue(&self, response: &str) -> Option<Clue> {
        let response_lower = response.to_lowercase();
        self.clue_keywords
            .iter()
            .find(|keyword| response_lower.contains(&keyword.to_lowercase()))
            .map(|keyword| Clue {
                persona_slug: self.definition.slug.clone(),
                persona_name: self.definition.name.clone(),
                keyword: keyword.clone(),
            })
    }

    async fn render_voice(&self, text: &str) -> Option<String> {
        let (Some(voice), Some(voice_id)) = (&self.voice, &self.voice_id) else {
            return None;
        };
        let audio = voice.synthesize(text, voice_id).await?;
        log::info!("Generated audio for {}: {} bytes", self.name(), audio.len());
        Some(encode_audio(&audio))
    }

    /// Plays one turn and returns what it changes, without touching `session`.
    ///
    /// Fails only when the main completion fails; note extraction and voice
    /// rendering degrade to nothing.
    pub async fn respond(
        &self,
        scenario: &Scenario,
        session: &GameSession,
        question: &str,
    ) -> Result<TurnDelta, AIError> {
        let state = session.persona_state(self.slug());
        let system_prompt = self.build_system_prompt(scenario, state);
        let mut history = self.persona_history(&session.messages);
        history.push(ChatTurn::User(question.to_string()));

        log::info!(
            "{} questioned in game {} (count {}, stress {:.1}, {} history turns)",
            self.name(),
            session.game_id,
            state.interrogation_count,
            state.stress_level,
            history.len() - 1
        );

        let response = self.completion.complete(&system_prompt, &history).await?;
        log::debug!("{} answered: {}", self.name(), response);

        let clue = self.detect_clue(&response);
        let (notes, audio) = futures::join!(
            extract_notes(
                self.completion.as_ref(),
                &self.config.templates,
                &self.definition,
                scenario,
                question,
                &response,
            ),
            self.render_voice(&response)
        );

        Ok(TurnDelta {
            persona_slug: self.slug().to_string(),
            question: Message::user(question, Some(self.slug())),
            reply: Message::persona(self.slug(), response)
                .with_audio(audio, self.voice_id.clone()),
            state: state.interrogated(),
            clue,
            notes,
        })
    }
}
