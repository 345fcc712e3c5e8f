use super::{PromptKey, PromptTemplates};
use crate::completion::{CompletionClient, StructuredSchema};
use crate::game_state::{AutoNote, NoteCategory};
use crate::scenario::{PersonaDefinition, Scenario};
use chrono::Utc;
use serde_json::{Value, json};
use strum::IntoEnumIterator;

pub const MAX_NOTES_PER_RESPONSE: usize = 3;
pub const MAX_NOTE_CHARS: usize = 150;
const SOURCE_EXCERPT_CHARS: usize = 100;

pub fn notes_schema() -> StructuredSchema {
    let categories: Vec<String> = NoteCategory::iter().map(|c| c.to_string()).collect();
    StructuredSchema {
        name: "investigation_notes".to_string(),
        description: Some("Notes an investigator would take from a statement".to_string()),
        schema: json!({
            "type": "object",
            "properties": {
                "notes": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "text": { "type": "string" },
                            "category": { "type": "string", "enum": categories }
                        },
                        "required": ["text", "category"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["notes"],
            "additionalProperties": false
        }),
        strict: true,
    }
}

pub fn notes_prompt(
    templates: &PromptTemplates,
    persona: &PersonaDefinition,
    scenario: &Scenario,
    question: &str,
    response: &str,
) -> String {
    format!(
        "You are an investigator assistant. Analyze the following statement from {name} ({role}) and extract relevant investigation notes.\n\n\
INVESTIGATOR'S QUESTION:\n{question}\n\n\
RESPONSE FROM {upper}:\n{response}\n\n\
KNOWN FACTS ABOUT THE CASE:\n- Victim: {victim} ({victim_role})\n- Timeline: {timeline}\n\n\
{task}",
        name = persona.name,
        role = persona.role,
        upper = persona.name.to_uppercase(),
        victim = scenario.victim.name,
        victim_role = scenario.victim.role,
        timeline = scenario.timeline,
        task = templates.get(PromptKey::NotesTask),
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

pub fn source_excerpt(response: &str) -> String {
    if response.chars().count() > SOURCE_EXCERPT_CHARS {
        format!("{}...", truncate_chars(response, SOURCE_EXCERPT_CHARS))
    } else {
        response.to_string()
    }
}

/// Turns the extractor's answer into notes.
///
/// Accepts either `{"notes": [...]}` or a bare array. Only the first three
/// entries are considered; entries without text are skipped and unknown
/// categories become [`NoteCategory::Observation`]. Anything else yields no
/// notes.
pub fn parse_notes(value: &Value, response: &str) -> Vec<AutoNote> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("notes") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let timestamp = Utc::now();
    let source_message = source_excerpt(response);

    items
        .iter()
        .take(MAX_NOTES_PER_RESPONSE)
        .filter_map(|note| {
            let text = note.get("text")?.as_str()?.trim();
            if text.is_empty() {
                return None;
            }
            let category = note
                .get("category")?
                .as_str()?
                .parse()
                .unwrap_or(NoteCategory::Observation);
            Some(AutoNote {
                text: truncate_chars(text, MAX_NOTE_CHARS),
                category,
                timestamp,
                source_message: source_message.clone(),
            })
        })
        .collect()
}

// Never fails: a broken extraction only costs the notes of this turn.
pub async fn extract_notes(
    completion: &dyn CompletionClient,
    templates: &PromptTemplates,
    persona: &PersonaDefinition,
    scenario: &Scenario,
    question: &str,
    response: &str,
) -> Vec<AutoNote> {
    let prompt = notes_prompt(templates, persona, scenario, question, response);
    match completion
        .complete_structured(
            &notes_schema(),
            templates.get(PromptKey::NotesSystemPrompt),
            &prompt,
        )
        .await
    {
        Ok(value) => {
            let notes = parse_notes(&value, response);
            log::info!("Extracted {} auto-notes for {}", notes.len(), persona.name);
            notes
        }
        Err(e) => {
            log::warn!("Failed to extract auto-notes for {}: {}", persona.name, e);
            Vec::new()
        }
    }
}
