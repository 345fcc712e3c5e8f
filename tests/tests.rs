// ../tests/tests.rs
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::fs;
use std::sync::{Arc, Mutex};
use whodunit::agents::{
    FALLBACK_HINT, NERVOUS_ADDENDUM, PromptKey, PromptTemplates, SLIP_ADDENDUM, clean_hint,
    parse_notes, stress_addendum,
};
use whodunit::game_master::{extract_incident_time, extract_location};
use whodunit::scenario::DEFAULT_SCENARIO_ID;
use whodunit::session_store::KeyedLocks;
use whodunit::*;

// Completion double: answers from scripted queues and records every persona call.
#[derive(Default)]
struct ScriptedCompletion {
    replies: Mutex<VecDeque<Option<String>>>,
    structured: Mutex<VecDeque<Value>>,
    calls: Mutex<Vec<(String, Vec<ChatTurn>)>>,
}

impl ScriptedCompletion {
    fn with_replies(replies: &[&str]) -> Self {
        let completion = ScriptedCompletion::default();
        for reply in replies {
            completion.push_reply(reply);
        }
        completion
    }

    fn push_reply(&self, reply: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Some(reply.to_string()));
    }

    fn push_failure(&self) {
        self.replies.lock().unwrap().push_back(None);
    }

    fn push_structured(&self, value: Value) {
        self.structured.lock().unwrap().push_back(value);
    }

    fn calls(&self) -> Vec<(String, Vec<ChatTurn>)> {
        self.calls.lock().unwrap().clone()
    }

    fn structured_left(&self) -> usize {
        self.structured.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<String, AIError> {
        self.calls
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), history.to_vec()));
        match self.replies.lock().unwrap().pop_front() {
            Some(Some(reply)) => Ok(reply),
            _ => Err(AIError::Timeout),
        }
    }

    async fn complete_structured(
        &self,
        _schema: &StructuredSchema,
        _system_prompt: &str,
        _user_prompt: &str,
    ) -> Result<Value, AIError> {
        self.structured
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(AIError::Timeout)
    }
}

struct FixedVoice;

#[async_trait]
impl VoiceSynthesizer for FixedVoice {
    async fn synthesize(&self, _text: &str, _voice_id: &str) -> Option<Vec<u8>> {
        Some(b"abc".to_vec())
    }

    fn voices(&self) -> Vec<String> {
        vec!["onyx".to_string(), "nova".to_string()]
    }
}

fn fixture_json() -> Value {
    let json_str = fs::read_to_string("tests/four_persona_scenario.json")
        .expect("Failed to read scenario fixture");
    serde_json::from_str(&json_str).expect("Failed to parse scenario fixture")
}

fn fixture_scenario() -> Scenario {
    serde_json::from_value(fixture_json()).expect("Fixture is not a scenario")
}

fn game_master(completion: &Arc<ScriptedCompletion>) -> GameMaster {
    GameMaster::builder(fixture_scenario(), completion.clone())
        .build()
        .expect("Fixture scenario should be accepted")
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn test_g1_end_to_end() {
    let completion = Arc::new(ScriptedCompletion::with_replies(&[
        "I was there at 9:15 PM, but only to fetch a bottle.",
        "I told you everything already.",
        "My father was a difficult man.",
    ]));
    let gm = game_master(&completion);

    // Step 1: first question to tom reveals his keyword
    let turn = gm.route("g1", "tom", "Where were you?").await.unwrap();
    let clue = turn.revealed_clue.expect("Expected a clue");
    assert_eq!(clue.persona_slug, "tom");
    assert_eq!(clue.keyword, "9:15 pm");
    assert_eq!(clue.to_string(), "🔍 Tom Berger mentioned '9:15 pm'");

    let snapshot = gm.session_debug("g1").await.unwrap().unwrap();
    let tom = snapshot.persona_states["tom"];
    assert_eq!(tom.interrogation_count, 1);
    assert!(approx(tom.stress_level, 0.1));
    assert_eq!(snapshot.revealed_clues.len(), 1);

    // Step 2: no keyword, no new clue
    let turn = gm.route("g1", "tom", "Anything else?").await.unwrap();
    assert!(turn.revealed_clue.is_none());
    let snapshot = gm.session_debug("g1").await.unwrap().unwrap();
    let tom = snapshot.persona_states["tom"];
    assert_eq!(tom.interrogation_count, 2);
    assert!(approx(tom.stress_level, 0.2));
    assert_eq!(snapshot.revealed_clues.len(), 1);

    // Step 3: elena leaves tom alone
    let turn = gm.route("g1", "elena", "How was dinner?").await.unwrap();
    assert_eq!(turn.persona_name, "Elena Hale");
    let snapshot = gm.session_debug("g1").await.unwrap().unwrap();
    assert_eq!(snapshot.persona_states["tom"], tom);
    assert_eq!(snapshot.persona_states["elena"].interrogation_count, 1);
    assert_eq!(snapshot.message_count, 6);
}

#[tokio::test]
async fn test_single_persona_changes_and_stress_caps() {
    let completion = Arc::new(ScriptedCompletion::default());
    for _ in 0..12 {
        completion.push_reply("I only carry the keys.");
    }
    let gm = game_master(&completion);

    let mut previous = PersonaState::default();
    for _ in 0..12 {
        gm.route("cap", "klaus", "What did you see?").await.unwrap();
        let snapshot = gm.session_debug("cap").await.unwrap().unwrap();
        assert_eq!(snapshot.persona_states.len(), 1);
        let state = snapshot.persona_states["klaus"];
        assert_eq!(state.interrogation_count, previous.interrogation_count + 1);
        assert!(state.stress_level >= previous.stress_level);
        assert!(state.stress_level <= 1.0);
        previous = state;
    }
    assert_eq!(previous.stress_level, 1.0);
}

#[tokio::test]
async fn test_prompts_never_carry_foreign_private_knowledge() {
    let completion = Arc::new(ScriptedCompletion::with_replies(&["a", "b", "c", "d"]));
    let gm = game_master(&completion);
    let scenario = fixture_scenario();

    for persona in &scenario.personas {
        gm.route("secrets", &persona.slug, "Tell me about last night.")
            .await
            .unwrap();
    }

    let calls = completion.calls();
    assert_eq!(calls.len(), scenario.personas.len());
    for (persona, (system_prompt, _)) in scenario.personas.iter().zip(calls.iter()) {
        assert!(system_prompt.contains(&persona.private_knowledge));
        assert!(system_prompt.contains(&scenario.shared_knowledge));
        for other in scenario.personas.iter().filter(|p| p.slug != persona.slug) {
            assert!(
                !system_prompt.contains(&other.private_knowledge),
                "{} sees the secret of {}",
                persona.slug,
                other.slug
            );
        }
    }
}

#[tokio::test]
async fn test_history_is_isolated_per_persona() {
    let completion = Arc::new(ScriptedCompletion::with_replies(&[
        "Tom answer one.",
        "Elena answer.",
        "Tom answer two.",
    ]));
    let gm = game_master(&completion);

    gm.route("iso", "tom", "Question for Tom").await.unwrap();
    gm.route("iso", "elena", "Question for Elena").await.unwrap();
    gm.route("iso", "tom", "Second question for Tom").await.unwrap();

    let calls = completion.calls();
    let (_, tom_history) = &calls[2];
    assert_eq!(
        tom_history,
        &vec![
            ChatTurn::User("Question for Tom".to_string()),
            ChatTurn::Assistant("Tom answer one.".to_string()),
            ChatTurn::User("Second question for Tom".to_string()),
        ]
    );

    let (_, elena_history) = &calls[1];
    assert_eq!(
        elena_history,
        &vec![ChatTurn::User("Question for Elena".to_string())]
    );

    // Every visible persona message is the persona's own
    let session = gm.start_session("iso").await.unwrap();
    for slug in ["tom", "elena", "lisa"] {
        let agent = gm.agent(slug).unwrap();
        for message in session.messages.iter().filter(|m| m.is_visible_to(slug)) {
            if message.role == MessageRole::Persona {
                assert_eq!(message.persona_slug.as_deref(), Some(agent.slug()));
            }
        }
    }
}

#[tokio::test]
async fn test_history_window_keeps_most_recent_turns() {
    let completion = Arc::new(ScriptedCompletion::default());
    for i in 0..4 {
        completion.push_reply(&format!("answer {}", i));
    }
    let gm = GameMaster::builder(fixture_scenario(), completion.clone())
        .config(AgentConfig {
            history_window: 3,
            ..AgentConfig::default()
        })
        .build()
        .unwrap();

    for i in 0..4 {
        gm.route("window", "lisa", &format!("question {}", i))
            .await
            .unwrap();
    }

    let calls = completion.calls();
    let (_, history) = calls.last().unwrap();
    assert_eq!(
        history,
        &vec![
            ChatTurn::Assistant("answer 1".to_string()),
            ChatTurn::User("question 2".to_string()),
            ChatTurn::Assistant("answer 2".to_string()),
            ChatTurn::User("question 3".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_revealed_clues_are_deduplicated() {
    let completion = Arc::new(ScriptedCompletion::with_replies(&[
        "At 9:15 PM I was in the cellar.",
        "9:15 pm, I said it already!",
    ]));
    let gm = game_master(&completion);

    let first = gm.route("dedup", "tom", "When?").await.unwrap();
    let second = gm.route("dedup", "tom", "When exactly?").await.unwrap();
    assert_eq!(first.revealed_clue, second.revealed_clue);

    let snapshot = gm.session_debug("dedup").await.unwrap().unwrap();
    assert_eq!(snapshot.revealed_clues.len(), 1);
}

#[tokio::test]
async fn test_start_session_is_idempotent() {
    let completion = Arc::new(ScriptedCompletion::with_replies(&["Nothing to say."]));
    let gm = game_master(&completion);

    let first = gm.start_session("idem").await.unwrap();
    let second = gm.start_session("idem").await.unwrap();
    assert_eq!(first, second);

    gm.route("idem", "klaus", "Hello?").await.unwrap();
    let third = gm.start_session("idem").await.unwrap();
    assert_eq!(third.messages.len(), 2);
    assert_eq!(third.created_at, first.created_at);
}

#[tokio::test]
async fn test_hint_counts_success_and_failure() {
    let completion = Arc::new(ScriptedCompletion::default());
    completion.push_reply("\"Who had the keys to the cellar?\"");
    completion.push_failure();
    let gm = game_master(&completion);

    let hint = gm.generate_hint("hints").await;
    assert_eq!(hint.hint, "Who had the keys to the cellar?");
    assert_eq!(hint.hints_used, 1);
    assert_eq!(hint.clues_found, 0);
    assert_eq!(hint.total_critical_clues, 3);
    assert!(hint.error.is_none());

    let hint = gm.generate_hint("hints").await;
    assert_eq!(hint.hint, FALLBACK_HINT);
    assert_eq!(hint.hints_used, 2);
    assert!(hint.error.is_some());

    let snapshot = gm.session_debug("hints").await.unwrap().unwrap();
    assert_eq!(snapshot.hints_used, 2);
}

#[tokio::test]
async fn test_hint_prompt_reports_progress_without_leaking_to_personas() {
    let completion = Arc::new(ScriptedCompletion::with_replies(&[
        "At 9:15 PM I was in the cellar.",
        "Look at the stairs.",
    ]));
    let gm = game_master(&completion);

    gm.route("progress", "tom", "Where?").await.unwrap();
    gm.generate_hint("progress").await;

    let calls = completion.calls();
    let (_, hint_history) = &calls[1];
    let ChatTurn::User(prompt) = &hint_history[0] else {
        panic!("Expected a user turn");
    };
    assert!(prompt.contains("Tom Berger: 1 questions"));
    assert!(!prompt.contains("Elena Hale: 0 questions"));
    assert!(prompt.contains("🔍 Tom Berger mentioned '9:15 pm'"));
    assert!(prompt.contains("Klaus saw Tom with a torch"));
}

#[test]
fn test_clean_hint_strips_quotes() {
    assert_eq!(clean_hint("  \"Follow the wine.\"\n"), "Follow the wine.");
    assert_eq!(clean_hint("plain"), "plain");
}

#[test]
fn test_validation_rejections() {
    let mut unknown_murderer = fixture_json();
    unknown_murderer["solution"]["murderer"] = json!("nobody");
    let err = Scenario::from_json(&unknown_murderer.to_string()).unwrap_err();
    assert!(matches!(err, ScenarioError::BusinessRule(_)));

    let mut duplicate = fixture_json();
    duplicate["personas"][1]["slug"] = json!("elena");
    let err = Scenario::from_json(&duplicate.to_string()).unwrap_err();
    assert!(matches!(err, ScenarioError::BusinessRule(_)));

    // Generated cases must be large enough; hand-written ones only consistent
    let mut too_few_personas = fixture_json();
    too_few_personas["personas"].as_array_mut().unwrap().pop();
    assert!(Scenario::from_json(&too_few_personas.to_string()).is_ok());
    let scenario: Scenario = serde_json::from_value(too_few_personas).unwrap();
    assert!(matches!(scenario.validate(), Err(ScenarioError::Invalid(_))));

    let mut too_few_clues = fixture_json();
    too_few_clues["solution"]["critical_clues"]
        .as_array_mut()
        .unwrap()
        .pop();
    assert!(Scenario::from_json(&too_few_clues.to_string()).is_ok());
    let scenario: Scenario = serde_json::from_value(too_few_clues).unwrap();
    assert!(matches!(scenario.validate(), Err(ScenarioError::Invalid(_))));

    let mut no_personas = fixture_json();
    no_personas["personas"] = json!([]);
    let err = Scenario::from_json(&no_personas.to_string()).unwrap_err();
    assert!(matches!(err, ScenarioError::Invalid(_)));

    let mut unknown_keywords = fixture_json();
    unknown_keywords["solution"]["clue_keywords"]["ghost"] = json!(["boo"]);
    let err = Scenario::from_json(&unknown_keywords.to_string()).unwrap_err();
    assert!(matches!(err, ScenarioError::BusinessRule(_)));

    assert!(Scenario::from_json(&fixture_json().to_string()).is_ok());
}

#[test]
fn test_game_master_rejects_invalid_scenario() {
    let mut scenario = fixture_scenario();
    scenario.solution.murderer = "nobody".to_string();
    let completion = Arc::new(ScriptedCompletion::default());
    let result = GameMaster::builder(scenario, completion).build();
    assert!(matches!(result, Err(GameError::Scenario(_))));
}

#[test]
fn test_solution_keywords_take_precedence() {
    let scenario = fixture_scenario();
    assert_eq!(scenario.clue_keywords_for("tom"), ["9:15 pm".to_string()]);
    assert_eq!(
        scenario.clue_keywords_for("lisa"),
        ["article".to_string(), "debts".to_string()]
    );
    assert!(scenario.clue_keywords_for("elena").is_empty());
}

#[tokio::test]
async fn test_failed_completion_commits_nothing() {
    let completion = Arc::new(ScriptedCompletion::default());
    completion.push_failure();
    let gm = game_master(&completion);

    let result = gm.route("fail", "tom", "Where were you?").await;
    assert!(matches!(result, Err(GameError::Completion(AIError::Timeout))));

    let snapshot = gm.session_debug("fail").await.unwrap().unwrap();
    assert_eq!(snapshot.message_count, 0);
    assert!(snapshot.persona_states.is_empty());
    assert!(snapshot.revealed_clues.is_empty());
}

#[tokio::test]
async fn test_auto_notes_are_parsed_and_stored() {
    let completion = Arc::new(ScriptedCompletion::with_replies(&[
        "I was at the bar with Klaus until ten.",
    ]));
    completion.push_structured(json!({
        "notes": [
            { "text": "Claims to have been at the bar until 10 PM", "category": "alibi" },
            { "text": "Mentions Klaus as a witness", "category": "gossip" },
            { "text": "   ", "category": "motive" },
            { "text": "Fourth note is ignored", "category": "motive" }
        ]
    }));
    let gm = game_master(&completion);

    let turn = gm.route("notes", "elena", "Where were you?").await.unwrap();
    assert_eq!(turn.new_notes.len(), 2);
    assert_eq!(turn.new_notes[0].category, NoteCategory::Alibi);
    assert_eq!(turn.new_notes[1].category, NoteCategory::Observation);
    assert_eq!(
        turn.new_notes[0].source_message,
        "I was at the bar with Klaus until ten."
    );

    let notes = gm.notes("notes").await.unwrap();
    assert_eq!(notes["elena"], turn.new_notes);
}

#[tokio::test]
async fn test_note_failures_keep_the_turn() {
    let completion = Arc::new(ScriptedCompletion::with_replies(&["First.", "Second."]));
    completion.push_structured(json!("not a list of notes"));
    let gm = game_master(&completion);

    // Malformed extractor output
    let turn = gm.route("quiet", "lisa", "Why are you here?").await.unwrap();
    assert!(turn.new_notes.is_empty());

    // Extractor call fails
    let turn = gm.route("quiet", "lisa", "Who are you?").await.unwrap();
    assert!(turn.new_notes.is_empty());
    assert_eq!(turn.response, "Second.");

    let snapshot = gm.session_debug("quiet").await.unwrap().unwrap();
    assert_eq!(snapshot.persona_states["lisa"].interrogation_count, 2);
    assert!(snapshot.auto_notes.is_empty());
}

#[test]
fn test_parse_notes_limits_and_truncates() {
    let long_text = "x".repeat(200);
    let long_response = "y".repeat(120);
    let notes = parse_notes(
        &json!([{ "text": long_text, "category": "CONTRADICTION" }]),
        &long_response,
    );
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].text.chars().count(), 150);
    assert_eq!(notes[0].category, NoteCategory::Contradiction);
    assert_eq!(notes[0].source_message, format!("{}...", "y".repeat(100)));

    assert!(parse_notes(&json!({ "notes": "nope" }), "r").is_empty());
}

#[tokio::test]
async fn test_unknown_persona_falls_back_to_lead() {
    let completion = Arc::new(ScriptedCompletion::with_replies(&["Who are you looking for?"]));
    let gm = game_master(&completion);

    let turn = gm.route("lost", "butler", "Did you do it?").await.unwrap();
    assert_eq!(turn.persona_slug, "elena");

    let snapshot = gm.session_debug("lost").await.unwrap().unwrap();
    assert!(snapshot.persona_states.contains_key("elena"));
    assert!(!snapshot.persona_states.contains_key("butler"));
}

#[tokio::test]
async fn test_game_info_public_view() {
    let completion = Arc::new(ScriptedCompletion::default());
    let gm = game_master(&completion);

    assert!(gm.session_debug("info").await.unwrap().is_none());
    let info = gm.game_info("info").await.unwrap();
    assert!(gm.session_debug("info").await.unwrap().is_some());

    assert_eq!(info.scenario_name, "The Harbor Lights Case");
    assert_eq!(
        info.location,
        "The Harbor Lights Hotel is a fading seaside hotel in Brighton"
    );
    assert_eq!(
        info.time_of_incident,
        "9:15 PM - 9:45 PM: Time of death (estimated)"
    );
    assert_eq!(info.personas.len(), 4);
    assert_eq!(info.personas[1].description, "Looks after the wine cellar.");

    let public = serde_json::to_string(&info).unwrap();
    assert!(!public.contains("TOM-SECRET"));
}

#[test]
fn test_location_and_time_extraction() {
    assert_eq!(extract_location(""), "Unknown location");
    assert_eq!(extract_location("A villa on the lake"), "A villa on the lake");
    assert_eq!(extract_location(&"a".repeat(120)).chars().count(), 80);

    assert_eq!(
        extract_incident_time("- 18:00: Dinner\n- 20:00-23:00: Tatzeit"),
        "20:00-23:00: Tatzeit"
    );
    assert_eq!(
        extract_incident_time("- Guests arrive\n- 8:00 PM - 11:00 PM nobody saw him"),
        "Estimated: 8:00 PM - 11:00 PM"
    );
    assert_eq!(
        extract_incident_time("- 20:00 – 21:30 the dinner"),
        "Estimated: 20:00 – 21:30"
    );
    assert_eq!(extract_incident_time("Nobody knows."), "Time unknown");
}

#[test]
fn test_builtin_scenario_loads() {
    let scenario = BuiltinScenarios.load(DEFAULT_SCENARIO_ID).unwrap();
    assert_eq!(scenario.personas.len(), 4);
    assert_eq!(scenario.solution.murderer, "tom");
    assert_eq!(
        extract_incident_time(&scenario.timeline),
        "Sunday 8:00 PM-11:00 PM: Estimated time of death"
    );
    assert!(matches!(
        BuiltinScenarios.load("missing"),
        Err(ScenarioError::NotFound(_))
    ));
}

#[test]
fn test_scenario_directory_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let source = ScenarioDirectory::new(dir.path());
    assert!(source.available().is_empty());

    fixture_scenario()
        .save_to_file(source.path_for("harbor"))
        .unwrap();
    assert_eq!(source.available(), vec!["harbor".to_string()]);
    assert_eq!(source.load("harbor").unwrap(), fixture_scenario());
    assert!(matches!(
        source.load("nothing"),
        Err(ScenarioError::NotFound(_))
    ));
}

#[test]
fn test_stress_addendum_thresholds() {
    let templates = PromptTemplates::default();
    let calm = stress_addendum(&templates, PersonaState {
        stress_level: 0.3,
        interrogation_count: 3,
    });
    assert!(calm.is_empty());

    let nervous = stress_addendum(&templates, PersonaState {
        stress_level: 0.4,
        interrogation_count: 4,
    });
    assert!(nervous.contains("40%"));
    assert!(nervous.contains(NERVOUS_ADDENDUM));
    assert!(!nervous.contains(SLIP_ADDENDUM));

    let slipping = stress_addendum(&templates, PersonaState {
        stress_level: 0.7,
        interrogation_count: 5,
    });
    assert!(slipping.contains(NERVOUS_ADDENDUM));
    assert!(slipping.contains(SLIP_ADDENDUM));

    let tired = stress_addendum(&templates, PersonaState {
        stress_level: 0.7,
        interrogation_count: 6,
    });
    assert!(tired.contains("6"));
    assert!(tired.len() > slipping.len());
}

#[tokio::test]
async fn test_generator_retries_structural_failures() {
    let completion = Arc::new(ScriptedCompletion::default());
    completion.push_structured(json!({ "name": "Half a case" }));
    completion.push_structured(fixture_json());
    let writer = ScenarioWriter::new(completion.clone()).with_max_retries(1);

    let scenario = writer.generate("a hotel in a storm", Difficulty::Hard).await.unwrap();
    assert_eq!(scenario.name, "The Harbor Lights Case");
    assert_eq!(completion.structured_left(), 0);
}

#[tokio::test]
async fn test_generator_aborts_on_business_rule() {
    let completion = Arc::new(ScriptedCompletion::default());
    let mut broken = fixture_json();
    broken["solution"]["murderer"] = json!("nobody");
    completion.push_structured(broken);
    completion.push_structured(fixture_json());
    let writer = ScenarioWriter::new(completion.clone()).with_max_retries(3);

    let err = writer.generate("", Difficulty::Easy).await.unwrap_err();
    assert!(matches!(err, ScenarioError::BusinessRule(_)));
    assert_eq!(completion.structured_left(), 1);
}

#[tokio::test]
async fn test_generator_gives_up_after_all_attempts() {
    let completion = Arc::new(ScriptedCompletion::default());
    let mut small = fixture_json();
    small["personas"].as_array_mut().unwrap().truncate(3);
    completion.push_structured(small.clone());
    completion.push_structured(small);
    let writer = ScenarioWriter::new(completion.clone());

    let err = writer.generate("", Difficulty::default()).await.unwrap_err();
    match err {
        ScenarioError::Generation {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 2);
            assert!(last_error.contains("personas"));
        }
        other => panic!("Unexpected error: {:?}", other),
    }
}

#[test]
fn test_difficulty_parsing() {
    assert_eq!("HARD".parse::<Difficulty>().unwrap(), Difficulty::Hard);
    assert_eq!(Difficulty::default().to_string(), "medium");
    assert!("impossible".parse::<Difficulty>().is_err());
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let completion = Arc::new(ScriptedCompletion::with_replies(&[
            "At 9:15 PM I was downstairs.",
        ]));
        let store = Arc::new(JsonFileSessionStore::new(dir.path()).unwrap());
        let gm = GameMaster::builder(fixture_scenario(), completion)
            .store(store)
            .build()
            .unwrap();
        gm.route("saved-game", "tom", "Where?").await.unwrap();
        gm.generate_hint("saved-game").await;
    }

    let store = JsonFileSessionStore::new(dir.path()).unwrap();
    let session = store.get("saved-game").await.unwrap().unwrap();
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.persona_state("tom").interrogation_count, 1);
    assert_eq!(session.revealed_clues.len(), 1);
    assert_eq!(session.hints_used, 1);

    assert!(store.get("unknown").await.unwrap().is_none());
    assert!(matches!(
        store.get_or_create("../escape").await,
        Err(StoreError::InvalidGameId(_))
    ));

    // Only finished files are left behind
    let files: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files, vec!["saved-game.json".to_string()]);

    fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
    assert!(matches!(
        store.get("broken").await,
        Err(StoreError::Serialization(_))
    ));
}

#[tokio::test]
async fn test_keyed_locks_drop_idle_keys() {
    let locks = KeyedLocks::new();
    {
        let _a = locks.acquire("a").await;
        let _b = locks.acquire("b").await;
        assert_eq!(locks.len().await, 2);
    }

    let held = locks.acquire("c").await;
    assert_eq!(locks.len().await, 1);

    // A held key survives the next acquire
    let _d = locks.acquire("d").await;
    assert_eq!(locks.len().await, 2);
    drop(held);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_persona_turns_are_not_lost() {
    const TURNS: u32 = 8;
    let completion = Arc::new(ScriptedCompletion::default());
    for _ in 0..TURNS {
        completion.push_reply("I was polishing glasses.");
    }
    let gm = Arc::new(game_master(&completion));

    let handles: Vec<_> = (0..TURNS)
        .map(|i| {
            let gm = gm.clone();
            tokio::spawn(async move {
                gm.route("rush", "tom", &format!("Question {}", i)).await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let snapshot = gm.session_debug("rush").await.unwrap().unwrap();
    assert_eq!(snapshot.persona_states["tom"].interrogation_count, TURNS);
    assert_eq!(snapshot.message_count, (TURNS * 2) as usize);
}

#[tokio::test]
async fn test_voice_assignment_and_audio() {
    let completion = Arc::new(ScriptedCompletion::with_replies(&["Good evening."]));
    let gm = GameMaster::builder(fixture_scenario(), completion)
        .voice(Arc::new(FixedVoice))
        .build()
        .unwrap();

    let voices: Vec<Option<String>> = gm
        .personas_debug()
        .into_iter()
        .map(|p| p.voice_id)
        .collect();
    assert_eq!(
        voices,
        vec![
            Some("onyx".to_string()),
            Some("nova".to_string()),
            Some("onyx".to_string()),
            Some("nova".to_string()),
        ]
    );

    let turn = gm.route("voice", "tom", "Hello").await.unwrap();
    assert_eq!(turn.voice_id.as_deref(), Some("nova"));
    assert_eq!(turn.audio_base64.as_deref(), Some("YWJj"));
}

#[test]
fn test_personas_debug_exposes_effective_keywords() {
    let completion = Arc::new(ScriptedCompletion::default());
    let gm = game_master(&completion);
    let debug = gm.personas_debug();
    let klaus = debug.iter().find(|p| p.slug == "klaus").unwrap();
    assert_eq!(klaus.clue_keywords, vec!["torch", "cellar stairs"]);
    assert!(klaus.private_knowledge.starts_with("KLAUS-SECRET"));
    assert!(klaus.voice_id.is_none());
}

#[test]
fn test_message_visibility() {
    let unaddressed = Message::user("Anyone?", None);
    let to_tom = Message::user("Tom?", Some("tom"));
    let from_tom = Message::persona("tom", "Yes.");

    assert!(unaddressed.is_visible_to("elena"));
    assert!(to_tom.is_visible_to("tom"));
    assert!(!to_tom.is_visible_to("elena"));
    assert!(from_tom.is_visible_to("tom"));
    assert!(!from_tom.is_visible_to("elena"));
}

#[tokio::test]
async fn test_stress_prompt_follows_turn_count() {
    let completion = Arc::new(ScriptedCompletion::default());
    for _ in 0..7 {
        completion.push_reply("I only carry the keys.");
    }
    let gm = game_master(&completion);

    for _ in 0..3 {
        gm.route("pressure", "klaus", "What did you see?").await.unwrap();
    }
    let snapshot = gm.session_debug("pressure").await.unwrap().unwrap();
    assert_eq!(snapshot.persona_states["klaus"].stress_level, 0.3);

    for _ in 0..4 {
        gm.route("pressure", "klaus", "What did you see?").await.unwrap();
    }

    let calls = completion.calls();
    assert_eq!(calls.len(), 7);
    let (fourth, _) = &calls[3];
    assert!(!fourth.contains(NERVOUS_ADDENDUM));
    assert!(!fourth.contains("CURRENT STATE"));
    let (fifth, _) = &calls[4];
    assert!(fifth.contains(NERVOUS_ADDENDUM));
    assert!(fifth.contains("Stress Level: 40%"));
    let (sixth, _) = &calls[5];
    assert!(!sixth.contains("You have already been questioned"));
    let (seventh, _) = &calls[6];
    assert!(seventh.contains("You have already been questioned 6 times"));
    assert!(!seventh.contains(SLIP_ADDENDUM));
}

#[tokio::test]
async fn test_two_persona_case_is_playable() {
    let mut small = fixture_json();
    small["personas"].as_array_mut().unwrap().truncate(2);
    small["solution"]["clue_keywords"]
        .as_object_mut()
        .unwrap()
        .remove("klaus");
    let scenario = Scenario::from_json(&small.to_string()).unwrap();
    assert!(matches!(scenario.validate(), Err(ScenarioError::Invalid(_))));

    let completion = Arc::new(ScriptedCompletion::with_replies(&[
        "I was there at 9:15 PM, but only to fetch a bottle.",
        "My father was a difficult man.",
    ]));
    let gm = GameMaster::builder(scenario, completion.clone())
        .build()
        .expect("Two suspects are enough to play");

    let turn = gm.route("g1", "tom", "Where were you?").await.unwrap();
    assert_eq!(turn.revealed_clue.unwrap().keyword, "9:15 pm");
    let turn = gm.route("g1", "klaus", "Did you see Tom?").await.unwrap();
    assert_eq!(turn.persona_slug, "elena");

    let info = gm.game_info("g1").await.unwrap();
    assert_eq!(info.personas.len(), 2);
    let snapshot = gm.session_debug("g1").await.unwrap().unwrap();
    assert_eq!(snapshot.persona_states["tom"].interrogation_count, 1);
    assert_eq!(snapshot.persona_states["elena"].interrogation_count, 1);
}

#[tokio::test]
async fn test_prompt_overrides_reach_the_completion() {
    let completion = Arc::new(ScriptedCompletion::default());
    completion.push_reply("Ja, ich war im Keller.");
    completion.push_failure();
    let templates = PromptTemplates::default()
        .with_override(PromptKey::PersonaRules, "HOUSE RULES for {name}: answer in {language}.")
        .with_override(PromptKey::FallbackHint, "Ask the porter.");
    let gm = GameMaster::builder(fixture_scenario(), completion.clone())
        .config(AgentConfig {
            language: "German".to_string(),
            templates: Arc::new(templates),
            ..AgentConfig::default()
        })
        .build()
        .unwrap();

    gm.route("house", "tom", "Wo waren Sie?").await.unwrap();
    let (system_prompt, _) = &completion.calls()[0];
    assert!(system_prompt.contains("HOUSE RULES for Tom Berger: answer in German."));
    assert!(!system_prompt.contains("IMPORTANT RULES"));

    let hint = gm.generate_hint("house").await;
    assert_eq!(hint.hint, "Ask the porter.");
    assert!(hint.error.is_some());
}

#[test]
fn test_prompt_templates_load_from_dir() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("persona_rules.txt"), "Stay in role as {name}.\n\n").unwrap();
    fs::write(dir.path().join("hint_task.txt"), "   \n").unwrap();
    fs::write(dir.path().join("unknown_prompt.txt"), "ignored").unwrap();
    fs::write(dir.path().join("notes.md"), "ignored").unwrap();

    let templates = PromptTemplates::load_from_dir(dir.path()).unwrap();
    assert_eq!(templates.get(PromptKey::PersonaRules), "Stay in role as {name}.");
    assert!(templates.is_overridden(PromptKey::PersonaRules));
    assert!(!templates.is_overridden(PromptKey::HintTask));
    assert_eq!(templates.get(PromptKey::FallbackHint), FALLBACK_HINT);

    let missing = PromptTemplates::load_from_dir(dir.path().join("missing")).unwrap();
    assert!(!missing.is_overridden(PromptKey::PersonaRules));
    assert_eq!("nervous_addendum".parse::<PromptKey>().unwrap(), PromptKey::NervousAddendum);
}

#[test]
fn test_logger_installs_once() {
    let dir = tempfile::tempdir().unwrap();
    let log_dir = dir.path().join("logs");

    logging::init(&log_dir).unwrap();
    assert!(log_dir.is_dir());
    log::info!("Logger ready");
    let written = fs::read_to_string(log_dir.join("log.txt")).unwrap();
    assert!(written.contains("INFO - Logger ready"));

    assert!(matches!(logging::init(&log_dir), Err(AppError::Logger(_))));
}
