use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use strum_macros::{Display, EnumIter, EnumString};

pub const PERSONA_RULES: &str = r#"IMPORTANT RULES:
1. ALWAYS stay in your role as {name}
2. Respond in {language}
3. Keep answers short (2-4 sentences), like in a real conversation
4. Never reveal your secrets directly, but:
   - Show nervousness or discomfort about sensitive topics
   - Become more detailed when asked repeatedly
   - Make small "slips" that give hints
5. When asked about other people, use your knowledge about them
6. You do NOT know who the murderer is (unless you are the murderer yourself)
7. Only answer what is asked, don't proactively tell everything

BEHAVIOR HINTS BASED ON NUMBER OF INTERROGATIONS:
- For the first questions: Be reserved, give basic information
- After 3+ questions: Become somewhat more open, show more emotions
- After 5+ questions: Under pressure you might "accidentally" mention important details
"#;

pub const NERVOUS_ADDENDUM: &str = "You are becoming noticeably more nervous. Your answers are getting shorter, you hesitate more.";

pub const SLIP_ADDENDUM: &str = "You are very stressed. You are making small mistakes in your statements.\nWhen confronted directly, you might slip up.";

pub const FATIGUE_ADDENDUM: &str =
    "You have already been questioned {count} times. You are getting tired and more careless.";

pub const NOTES_SYSTEM_PROMPT: &str =
    "You are a precise investigator assistant. Reply ONLY with valid JSON.";

pub const NOTES_TASK: &str = r#"TASK:
Extract ONLY relevant notes that could be important for the investigation. Ignore small talk and irrelevant statements.

Reply with a JSON object {"notes": [...]}. If there is no relevant information, reply with {"notes": []}.

Each note must have the following format:
{
  "text": "Short, concise note (max 100 characters)",
  "category": "alibi" | "motive" | "relationship" | "observation" | "contradiction"
}

Categories:
- alibi: Information about location/time
- motive: Possible motives, conflicts, secrets
- relationship: Relationships to the victim or other people
- observation: What the person saw/heard
- contradiction: Contradictions to known facts

IMPORTANT: Extract only NEW, relevant information. Maximum 2-3 notes per response."#;

pub const HINT_SYSTEM_PROMPT: &str = "You are a helpful GameMaster providing hints in a murder mystery game. Be mysterious but helpful.";

pub const HINT_TASK: &str = r#"YOUR TASK:
Generate ONE helpful hint that:
1. Points the player in the right direction WITHOUT revealing the murderer directly
2. Suggests a specific question to ask or a specific suspect to focus on
3. References evidence or inconsistencies they should look for
4. Is cryptic enough to feel like detective work, but clear enough to be useful

The hint should be 1-2 sentences, written as if from a mysterious informant or the detective's intuition.
Do NOT reveal who the murderer is directly!

HINT:"#;

pub const FALLBACK_HINT: &str = "Focus on the timeline. Someone's story doesn't add up...";

pub const SCENARIO_WRITER_PREAMBLE: &str = r#"You are a creative author of murder mystery games.

Create an exciting, logically consistent murder case scenario in {language}.

## Rules:
1. 4 or more suspects (personas), exactly one of them is the murderer
2. All clues, alibis and times must fit together
3. The murderer must be convictable through clever questioning
4. Every persona needs its own personality and secrets
5. The murderer's private_knowledge states "YOU ARE THE MURDERER" with the full details of the crime
6. solution.murderer is the slug of the murderer persona
7. solution.clue_keywords maps persona slugs to short lowercase phrases that would give away a clue when that persona says them

## Murderer behavior per difficulty:
- EASY: Nervous, breaks down quickly, shows guilt
- MEDIUM: Controlled but makes mistakes under pressure
- HARD: Perfect liar, only convictable through logic

## Creativity:
- Surprising settings (vineyard, cruise ship, theater, museum...)
- Complex relationships (affairs, blackmail, family secrets)
- Clever red herrings"#;

/// Names of the replaceable prompt texts. A template file is `<key>.txt`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PromptKey {
    PersonaRules,
    NervousAddendum,
    SlipAddendum,
    FatigueAddendum,
    NotesSystemPrompt,
    NotesTask,
    HintSystemPrompt,
    HintTask,
    FallbackHint,
    ScenarioGeneratorPrompt,
}

impl PromptKey {
    pub fn default_text(self) -> &'static str {
        match self {
            PromptKey::PersonaRules => PERSONA_RULES,
            PromptKey::NervousAddendum => NERVOUS_ADDENDUM,
            PromptKey::SlipAddendum => SLIP_ADDENDUM,
            PromptKey::FatigueAddendum => FATIGUE_ADDENDUM,
            PromptKey::NotesSystemPrompt => NOTES_SYSTEM_PROMPT,
            PromptKey::NotesTask => NOTES_TASK,
            PromptKey::HintSystemPrompt => HINT_SYSTEM_PROMPT,
            PromptKey::HintTask => HINT_TASK,
            PromptKey::FallbackHint => FALLBACK_HINT,
            PromptKey::ScenarioGeneratorPrompt => SCENARIO_WRITER_PREAMBLE,
        }
    }
}

/// Prompt texts by key. Anything not overridden uses the built-in text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplates {
    overrides: BTreeMap<PromptKey, String>,
}

impl PromptTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, key: PromptKey, text: impl Into<String>) -> Self {
        self.overrides.insert(key, text.into());
        self
    }

    pub fn get(&self, key: PromptKey) -> &str {
        self.overrides
            .get(&key)
            .map(String::as_str)
            .unwrap_or_else(|| key.default_text())
    }

    pub fn is_overridden(&self, key: PromptKey) -> bool {
        self.overrides.contains_key(&key)
    }

    /// Reads `<key>.txt` overrides from `dir`. A missing directory means defaults.
    ///
    /// Files whose stem is not a known key, and empty files, are skipped.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref();
        let mut templates = Self::default();
        if !dir.is_dir() {
            return Ok(templates);
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(key) = stem.parse::<PromptKey>() else {
                log::warn!("Ignoring unknown prompt template {}", path.display());
                continue;
            };
            let text = fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                log::warn!("Ignoring empty prompt template {}", path.display());
                continue;
            }
            log::info!("Loaded prompt template {} from {}", key, path.display());
            templates.overrides.insert(key, text.trim_end().to_string());
        }

        Ok(templates)
    }
}
