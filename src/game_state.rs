use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum_macros::{Display, EnumIter, EnumString};

pub const STRESS_STEP: f64 = 0.1;
pub const MAX_STRESS: f64 = 1.0;

// Behavioral state of one persona within one game.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PersonaState {
    pub stress_level: f64,
    pub interrogation_count: u32,
}

impl PersonaState {
    /// The state after one more round of questioning.
    ///
    /// Stress is kept on whole tenths so thresholds like 0.3 compare exactly.
    pub fn interrogated(self) -> Self {
        let stress = ((self.stress_level + STRESS_STEP) * 10.0).round() / 10.0;
        PersonaState {
            stress_level: stress.min(MAX_STRESS),
            interrogation_count: self.interrogation_count + 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clue {
    pub persona_slug: String,
    pub persona_name: String,
    pub keyword: String,
}

impl fmt::Display for Clue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "🔍 {} mentioned '{}'", self.persona_name, self.keyword)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum NoteCategory {
    Alibi,
    Motive,
    Relationship,
    Observation,
    Contradiction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoNote {
    pub text: String,
    pub category: NoteCategory,
    pub timestamp: DateTime<Utc>,
    pub source_message: String,
}

/// Everything one persona turn changes in a session, applied in one step.
#[derive(Debug, Clone)]
pub struct TurnDelta {
    pub persona_slug: String,
    pub question: Message,
    pub reply: Message,
    pub state: PersonaState,
    pub clue: Option<Clue>,
    pub notes: Vec<AutoNote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    pub game_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub persona_states: BTreeMap<String, PersonaState>,
    #[serde(default)]
    pub revealed_clues: Vec<Clue>,
    #[serde(default)]
    pub auto_notes: BTreeMap<String, Vec<AutoNote>>,
    #[serde(default)]
    pub hints_used: u32,
}

impl GameSession {
    pub fn new(game_id: impl Into<String>) -> Self {
        GameSession {
            game_id: game_id.into(),
            created_at: Utc::now(),
            messages: Vec::new(),
            persona_states: BTreeMap::new(),
            revealed_clues: Vec::new(),
            auto_notes: BTreeMap::new(),
            hints_used: 0,
        }
    }

    // Personas never questioned yet have the zero state.
    pub fn persona_state(&self, slug: &str) -> PersonaState {
        self.persona_states.get(slug).copied().unwrap_or_default()
    }

    /// Records a clue unless an identical one was already revealed.
    pub fn reveal_clue(&mut self, clue: Clue) -> bool {
        if self.revealed_clues.contains(&clue) {
            return false;
        }
        self.revealed_clues.push(clue);
        true
    }

    pub fn apply(&mut self, delta: TurnDelta) {
        self.messages.push(delta.question);
        self.messages.push(delta.reply);
        self.persona_states
            .insert(delta.persona_slug.clone(), delta.state);
        if let Some(clue) = delta.clue {
            self.reveal_clue(clue);
        }
        if !delta.notes.is_empty() {
            self.auto_notes
                .entry(delta.persona_slug)
                .or_default()
                .extend(delta.notes);
        }
    }
}
