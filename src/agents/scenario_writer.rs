use super::{PromptKey, PromptTemplates};
use crate::completion::{CompletionClient, StructuredSchema};
use crate::error::ScenarioError;
use crate::scenario::{MIN_CRITICAL_CLUES, MIN_PERSONAS, Scenario};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use strum_macros::{Display, EnumString};

pub const DEFAULT_GENERATION_RETRIES: u32 = 1;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

pub fn scenario_schema() -> StructuredSchema {
    let text = json!({ "type": "string" });
    StructuredSchema {
        name: "murder_mystery_scenario".to_string(),
        description: Some("A complete murder mystery case".to_string()),
        schema: json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Case name, e.g. 'The Rosenberg Villa Case'" },
                "setting": { "type": "string", "description": "2-3 paragraphs: where, when, what happened, how the body was found" },
                "victim": {
                    "type": "object",
                    "properties": {
                        "name": text,
                        "role": text,
                        "description": { "type": "string", "description": "Age, background, personality" }
                    },
                    "required": ["name", "role", "description"]
                },
                "shared_knowledge": { "type": "string", "description": "Bullet points of facts everyone knows" },
                "timeline": { "type": "string", "description": "Timeline of events with times" },
                "personas": {
                    "type": "array",
                    "minItems": MIN_PERSONAS,
                    "items": {
                        "type": "object",
                        "properties": {
                            "slug": { "type": "string", "description": "Unique lowercase ascii id, e.g. 'elena'" },
                            "name": text,
                            "role": text,
                            "public_description": { "type": "string", "description": "What everyone knows about this person (1 sentence)" },
                            "personality": { "type": "string", "description": "How they speak, behave, react to pressure (2-3 sentences)" },
                            "private_knowledge": { "type": "string", "description": "Secrets, alibi, observations, motives" },
                            "knows_about_others": { "type": "string", "description": "What they know about the other suspects ('- Name: knowledge')" }
                        },
                        "required": ["slug", "name", "role", "public_description", "personality", "private_knowledge", "knows_about_others"]
                    }
                },
                "solution": {
                    "type": "object",
                    "properties": {
                        "murderer": { "type": "string", "description": "Slug of the murderer, must match a persona slug" },
                        "motive": text,
                        "weapon": text,
                        "critical_clues": {
                            "type": "array",
                            "minItems": MIN_CRITICAL_CLUES,
                            "items": text
                        },
                        "clue_keywords": {
                            "type": "object",
                            "additionalProperties": { "type": "array", "items": text }
                        }
                    },
                    "required": ["murderer", "motive", "weapon", "critical_clues", "clue_keywords"]
                },
                "intro_message": { "type": "string", "description": "Welcome message introducing the case to the player" }
            },
            "required": ["name", "setting", "victim", "shared_knowledge", "timeline", "personas", "solution", "intro_message"]
        }),
        strict: false,
    }
}

/// Writes new cases with the completion service.
pub struct ScenarioWriter {
    completion: Arc<dyn CompletionClient>,
    max_retries: u32,
    language: String,
    templates: Arc<PromptTemplates>,
}

impl ScenarioWriter {
    pub fn new(completion: Arc<dyn CompletionClient>) -> Self {
        Self {
            completion,
            max_retries: DEFAULT_GENERATION_RETRIES,
            language: "English".to_string(),
            templates: Arc::new(PromptTemplates::default()),
        }
    }

    pub fn with_templates(mut self, templates: Arc<PromptTemplates>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn user_prompt(&self, wish: &str, difficulty: Difficulty) -> String {
        let difficulty = difficulty.to_string().to_uppercase();
        if wish.trim().is_empty() {
            format!(
                "Create a random, creative murder mystery scenario.\n\nDifficulty: {}\nLanguage: {}\n\nSurprise me with an unusual setting!",
                difficulty, self.language
            )
        } else {
            format!(
                "Create a murder mystery scenario based on this wish:\n\n{}\n\nDifficulty: {}\nLanguage: {}",
                wish.trim(),
                difficulty,
                self.language
            )
        }
    }

    async fn attempt(&self, system_prompt: &str, user_prompt: &str) -> Result<Scenario, ScenarioError> {
        let value = self
            .completion
            .complete_structured(&scenario_schema(), system_prompt, user_prompt)
            .await?;
        let scenario: Scenario = serde_json::from_value(value)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Generates and validates a scenario.
    ///
    /// Unusable output is retried with the same prompt up to `max_retries`
    /// times; a case that breaks its own logic is rejected at once.
    pub async fn generate(&self, wish: &str, difficulty: Difficulty) -> Result<Scenario, ScenarioError> {
        let system_prompt = self
            .templates
            .get(PromptKey::ScenarioGeneratorPrompt)
            .replace("{language}", &self.language);
        let user_prompt = self.user_prompt(wish, difficulty);
        let attempts = self.max_retries + 1;
        let mut last_error = String::new();

        log::info!(
            "Generating scenario: difficulty={}, wish={:?}",
            difficulty,
            if wish.trim().is_empty() { "random" } else { wish.trim() }
        );

        for attempt in 1..=attempts {
            if attempt > 1 {
                log::warn!(
                    "Retry attempt {}/{} - previous error: {}",
                    attempt - 1,
                    self.max_retries,
                    last_error
                );
            }

            match self.attempt(&system_prompt, &user_prompt).await {
                Ok(scenario) => {
                    log::info!(
                        "Scenario generated and validated: {} ({} personas, murderer={})",
                        scenario.name,
                        scenario.personas.len(),
                        scenario.solution.murderer
                    );
                    return Ok(scenario);
                }
                Err(e) if e.is_retryable() => {
                    log::warn!("Attempt {} failed: {}", attempt, e);
                    last_error = e.to_string();
                }
                Err(e) => {
                    log::error!("Scenario rejected: {}", e);
                    return Err(e);
                }
            }
        }

        log::error!("All {} attempts failed", attempts);
        Err(ScenarioError::Generation {
            attempts,
            last_error,
        })
    }
}
