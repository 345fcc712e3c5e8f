use super::{PromptKey, PromptTemplates};
use crate::completion::{ChatTurn, CompletionClient};
use crate::game_state::GameSession;
use crate::scenario::Scenario;

#[derive(Debug, Clone, PartialEq)]
pub struct HintOutcome {
    pub hint: String,
    pub error: Option<String>,
}

fn bullet_list(items: impl IntoIterator<Item = String>, empty: &str) -> String {
    let lines: Vec<String> = items.into_iter().map(|item| format!("- {}", item)).collect();
    if lines.is_empty() {
        empty.to_string()
    } else {
        lines.join("\n")
    }
}

/// Case progress as seen by the game master. Carries the solution, so it is
/// only ever sent to the completion service.
pub fn hint_prompt(templates: &PromptTemplates, scenario: &Scenario, session: &GameSession) -> String {
    let critical = bullet_list(scenario.solution.critical_clues.iter().cloned(), "None");
    let revealed = bullet_list(
        session.revealed_clues.iter().map(|clue| clue.to_string()),
        "None yet",
    );
    let progress = bullet_list(
        scenario.personas.iter().filter_map(|persona| {
            let count = session.persona_state(&persona.slug).interrogation_count;
            (count > 0).then(|| format!("{}: {} questions", persona.name, count))
        }),
        "No suspects interrogated yet",
    );
    let suspects = bullet_list(
        scenario
            .personas
            .iter()
            .map(|persona| format!("{} ({})", persona.name, persona.role)),
        "None",
    );

    format!(
        "You are the GameMaster of a murder mystery game. The player is stuck and needs a hint.\n\n\
CASE INFORMATION:\n- Scenario: {name}\n- Victim: {victim}\n- Murderer: {murderer}\n- Motive: {motive}\n\n\
CRITICAL CLUES TO SOLVE THE CASE:\n{critical}\n\n\
CLUES ALREADY DISCOVERED BY PLAYER:\n{revealed}\n\n\
INTERROGATION PROGRESS:\n{progress}\n\n\
SUSPECTS:\n{suspects}\n\n\
{task}",
        name = scenario.name,
        victim = scenario.victim.name,
        murderer = scenario.solution.murderer,
        motive = scenario.solution.motive,
        task = templates.get(PromptKey::HintTask),
    )
}

pub fn clean_hint(raw: &str) -> String {
    raw.trim().trim_matches('"').trim().to_string()
}

// Never fails: any problem is reported next to the fallback hint.
pub async fn generate_hint(
    completion: &dyn CompletionClient,
    templates: &PromptTemplates,
    scenario: &Scenario,
    session: &GameSession,
) -> HintOutcome {
    let history = [ChatTurn::User(hint_prompt(templates, scenario, session))];
    let fallback = templates.get(PromptKey::FallbackHint);
    match completion
        .complete(templates.get(PromptKey::HintSystemPrompt), &history)
        .await
    {
        Ok(raw) => {
            let hint = clean_hint(&raw);
            if hint.is_empty() {
                return HintOutcome {
                    hint: fallback.to_string(),
                    error: Some("empty hint".to_string()),
                };
            }
            log::info!("Generated hint for game {}: {}", session.game_id, hint);
            HintOutcome { hint, error: None }
        }
        Err(e) => {
            log::error!("Error generating hint for game {}: {}", session.game_id, e);
            HintOutcome {
                hint: fallback.to_string(),
                error: Some(e.to_string()),
            }
        }
    }
}
