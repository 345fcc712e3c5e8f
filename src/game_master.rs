use crate::agents::{AgentConfig, PersonaAgent, PromptTemplates, generate_hint};
use crate::completion::CompletionClient;
use crate::error::{GameError, StoreError};
use crate::game_state::{AutoNote, Clue, GameSession, PersonaState};
use crate::scenario::{Scenario, Victim};
use crate::session_store::{InMemorySessionStore, KeyedLocks, SessionStore};
use crate::telemetry::Telemetry;
use crate::voice::{VoiceSynthesizer, assign_voices};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

const MAX_LOCATION_CHARS: usize = 80;
const UNKNOWN_LOCATION: &str = "Unknown location";
const UNKNOWN_TIME: &str = "Time unknown";
const INCIDENT_KEYWORDS: [&str; 3] = ["time of death", "tatzeit", "incident"];

static TIME_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\d{1,2}:\d{2}(?:\s*[ap]m)?\s*[-–]\s*\d{1,2}:\d{2}(?:\s*[ap]m)?")
        .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub persona_slug: String,
    pub persona_name: String,
    pub response: String,
    pub revealed_clue: Option<Clue>,
    pub new_notes: Vec<AutoNote>,
    pub audio_base64: Option<String>,
    pub voice_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HintResponse {
    pub hint: String,
    pub hints_used: u32,
    pub clues_found: usize,
    pub total_critical_clues: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicPersona {
    pub slug: String,
    pub name: String,
    pub role: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameInfo {
    pub game_id: String,
    pub scenario_name: String,
    pub setting: String,
    pub victim: Victim,
    pub location: String,
    pub time_of_incident: String,
    pub timeline: String,
    pub personas: Vec<PublicPersona>,
    pub intro_message: String,
}

// Debug view of a persona, private knowledge included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaDebug {
    pub slug: String,
    pub name: String,
    pub role: String,
    pub personality: String,
    pub private_knowledge: String,
    pub knows_about_others: String,
    pub shared_knowledge: String,
    pub clue_keywords: Vec<String>,
    pub voice_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub game_id: String,
    pub revealed_clues: Vec<Clue>,
    pub persona_states: BTreeMap<String, PersonaState>,
    pub message_count: usize,
    pub hints_used: u32,
    pub auto_notes: BTreeMap<String, Vec<AutoNote>>,
}

impl From<GameSession> for SessionSnapshot {
    fn from(session: GameSession) -> Self {
        SessionSnapshot {
            message_count: session.messages.len(),
            game_id: session.game_id,
            revealed_clues: session.revealed_clues,
            persona_states: session.persona_states,
            hints_used: session.hints_used,
            auto_notes: session.auto_notes,
        }
    }
}

/// First sentence of the setting's first line.
pub fn extract_location(setting: &str) -> String {
    let first_line = setting.lines().next().unwrap_or_default().trim();
    if first_line.is_empty() {
        return UNKNOWN_LOCATION.to_string();
    }
    let sentence = match first_line.split_once('.') {
        Some((sentence, _)) => sentence,
        None => first_line,
    };
    let location: String = sentence.trim().chars().take(MAX_LOCATION_CHARS).collect();
    if location.is_empty() {
        UNKNOWN_LOCATION.to_string()
    } else {
        location
    }
}

pub fn extract_incident_time(timeline: &str) -> String {
    let incident_line = timeline.lines().find(|line| {
        let line = line.to_lowercase();
        INCIDENT_KEYWORDS.iter().any(|keyword| line.contains(keyword))
    });
    if let Some(line) = incident_line {
        return line.trim().trim_start_matches("- ").trim().to_string();
    }

    match TIME_RANGE.find(timeline) {
        Some(range) => format!("Estimated: {}", range.as_str()),
        None => UNKNOWN_TIME.to_string(),
    }
}

pub struct GameMasterBuilder {
    scenario: Scenario,
    completion: Arc<dyn CompletionClient>,
    store: Option<Arc<dyn SessionStore>>,
    voice: Option<Arc<dyn VoiceSynthesizer>>,
    telemetry: Telemetry,
    config: AgentConfig,
}

impl GameMasterBuilder {
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn voice(mut self, voice: Arc<dyn VoiceSynthesizer>) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<GameMaster, GameError> {
        if self.scenario.personas.is_empty() {
            return Err(GameError::NoPersonas);
        }
        self.scenario.validate_rules()?;

        let voices = match &self.voice {
            Some(voice) => assign_voices(&self.scenario.personas, &voice.voices()),
            None => BTreeMap::new(),
        };

        let agents = self
            .scenario
            .personas
            .iter()
            .map(|definition| {
                let keywords = self.scenario.clue_keywords_for(&definition.slug).to_vec();
                let mut agent =
                    PersonaAgent::new(definition.clone(), keywords, self.completion.clone())
                        .with_config(self.config.clone());
                if let (Some(voice), Some(voice_id)) = (&self.voice, voices.get(&definition.slug))
                {
                    agent = agent.with_voice(voice.clone(), voice_id.clone());
                }
                agent
            })
            .collect();

        log::info!(
            "GameMaster ready for {} with {} personas (voice {})",
            self.scenario.name,
            self.scenario.personas.len(),
            if voices.is_empty() { "off" } else { "on" }
        );

        Ok(GameMaster {
            scenario: Arc::new(self.scenario),
            agents,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemorySessionStore::new()) as Arc<dyn SessionStore>),
            completion: self.completion,
            templates: self.config.templates,
            telemetry: self.telemetry,
            turn_locks: KeyedLocks::new(),
        })
    }
}

/// Routes player questions to persona agents and keeps the sessions.
pub struct GameMaster {
    scenario: Arc<Scenario>,
    agents: Vec<PersonaAgent>,
    store: Arc<dyn SessionStore>,
    completion: Arc<dyn CompletionClient>,
    templates: Arc<PromptTemplates>,
    telemetry: Telemetry,
    turn_locks: KeyedLocks,
}

impl GameMaster {
    pub fn builder(scenario: Scenario, completion: Arc<dyn CompletionClient>) -> GameMasterBuilder {
        GameMasterBuilder {
            scenario,
            completion,
            store: None,
            voice: None,
            telemetry: Telemetry::disabled(),
            config: AgentConfig::default(),
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn agent(&self, slug: &str) -> Option<&PersonaAgent> {
        self.agents.iter().find(|agent| agent.slug() == slug)
    }

    // Unknown slugs go to the lead persona.
    fn resolve_agent(&self, slug: &str) -> Result<&PersonaAgent, GameError> {
        if let Some(agent) = self.agent(slug) {
            return Ok(agent);
        }
        let lead = self
            .scenario
            .lead_persona()
            .and_then(|persona| self.agent(&persona.slug))
            .ok_or(GameError::NoPersonas)?;
        log::warn!(
            "Unknown persona {:?}, routing to {} instead",
            slug,
            lead.slug()
        );
        self.telemetry.warning(
            "Unknown persona requested",
            json!({ "requested": slug, "fallback": lead.slug() }),
        );
        Ok(lead)
    }

    /// Returns the session for `game_id`, creating it on first use.
    pub async fn start_session(&self, game_id: &str) -> Result<GameSession, GameError> {
        Ok(self.store.get_or_create(game_id).await?)
    }

    /// Plays one turn of the addressed persona.
    ///
    /// Turns to the same persona in the same game run one after another; the
    /// session is only changed when the persona actually answered.
    pub async fn route(
        &self,
        game_id: &str,
        persona_slug: &str,
        question: &str,
    ) -> Result<TurnResponse, GameError> {
        let agent = self.resolve_agent(persona_slug)?;
        let _turn = self
            .turn_locks
            .acquire(&format!("{}/{}", game_id, agent.slug()))
            .await;
        let session = self.store.get_or_create(game_id).await?;

        let delta = match agent.respond(&self.scenario, &session, question).await {
            Ok(delta) => delta,
            Err(e) => {
                log::error!(
                    "Turn for {} in game {} failed: {}",
                    agent.slug(),
                    game_id,
                    e
                );
                self.telemetry.error(
                    "Persona turn failed",
                    json!({ "game_id": game_id, "persona": agent.slug(), "error": e.to_string() }),
                );
                return Err(e.into());
            }
        };

        let response = TurnResponse {
            persona_slug: agent.slug().to_string(),
            persona_name: agent.name().to_string(),
            response: delta.reply.content.clone(),
            revealed_clue: delta.clue.clone(),
            new_notes: delta.notes.clone(),
            audio_base64: delta.reply.audio_base64.clone(),
            voice_id: delta.reply.voice_id.clone(),
        };
        let state = delta.state;

        self.store
            .update(game_id, Box::new(move |session: &mut GameSession| session.apply(delta)))
            .await?;

        if let Some(clue) = &response.revealed_clue {
            log::info!("Clue detected in game {}: {}", game_id, clue);
        }
        self.telemetry.info(
            "Persona answered",
            json!({
                "game_id": game_id,
                "persona": response.persona_slug,
                "interrogation_count": state.interrogation_count,
                "stress_level": state.stress_level,
                "clue": response.revealed_clue.as_ref().map(|c| c.keyword.clone()),
                "notes": response.new_notes.len(),
            }),
        );

        Ok(response)
    }

    pub async fn game_info(&self, game_id: &str) -> Result<GameInfo, GameError> {
        self.start_session(game_id).await?;
        let scenario = &self.scenario;

        Ok(GameInfo {
            game_id: game_id.to_string(),
            scenario_name: scenario.name.clone(),
            setting: scenario.setting.clone(),
            victim: scenario.victim.clone(),
            location: extract_location(&scenario.setting),
            time_of_incident: extract_incident_time(&scenario.timeline),
            timeline: scenario.timeline.clone(),
            personas: scenario
                .personas
                .iter()
                .map(|p| PublicPersona {
                    slug: p.slug.clone(),
                    name: p.name.clone(),
                    role: p.role.clone(),
                    description: p.public_description.clone(),
                })
                .collect(),
            intro_message: scenario.intro_message.clone(),
        })
    }

    pub fn personas_debug(&self) -> Vec<PersonaDebug> {
        self.agents
            .iter()
            .map(|agent| {
                let definition = agent.definition();
                PersonaDebug {
                    slug: definition.slug.clone(),
                    name: definition.name.clone(),
                    role: definition.role.clone(),
                    personality: definition.personality.clone(),
                    private_knowledge: definition.private_knowledge.clone(),
                    knows_about_others: definition.knows_about_others.clone(),
                    shared_knowledge: self.scenario.shared_knowledge.clone(),
                    clue_keywords: agent.clue_keywords().to_vec(),
                    voice_id: agent.voice_id().map(String::from),
                }
            })
            .collect()
    }

    pub async fn session_debug(&self, game_id: &str) -> Result<Option<SessionSnapshot>, StoreError> {
        Ok(self.store.get(game_id).await?.map(SessionSnapshot::from))
    }

    pub async fn notes(&self, game_id: &str) -> Result<BTreeMap<String, Vec<AutoNote>>, StoreError> {
        Ok(self
            .store
            .get(game_id)
            .await?
            .map(|session| session.auto_notes)
            .unwrap_or_default())
    }

    /// Asks for one hint. Always counts as used, even when the service fails.
    pub async fn generate_hint(&self, game_id: &str) -> HintResponse {
        let total_critical_clues = self.scenario.solution.critical_clues.len();

        let session = match self
            .store
            .update(game_id, Box::new(|session: &mut GameSession| session.hints_used += 1))
            .await
        {
            Ok(session) => session,
            Err(e) => {
                log::error!("Could not record hint for game {}: {}", game_id, e);
                let mut session = GameSession::new(game_id);
                session.hints_used = 1;
                session
            }
        };

        let outcome = generate_hint(
            self.completion.as_ref(),
            &self.templates,
            &self.scenario,
            &session,
        )
        .await;
        if let Some(error) = &outcome.error {
            self.telemetry.warning(
                "Hint generation fell back",
                json!({ "game_id": game_id, "error": error }),
            );
        }

        HintResponse {
            hint: outcome.hint,
            hints_used: session.hints_used,
            clues_found: session.revealed_clues.len(),
            total_critical_clues,
            error: outcome.error,
        }
    }
}
