use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use whodunit::agents::{AgentConfig, PromptTemplates};
use whodunit::error::{AppError, ScenarioError};
use whodunit::game_master::TurnResponse;
use whodunit::scenario::DEFAULT_SCENARIO_ID;
use whodunit::settings::data_dir;
use whodunit::{
    BuiltinScenarios, Difficulty, GameMaster, JsonFileSessionStore, OpenAICompletion,
    OpenAIVoice, Scenario, ScenarioDirectory, ScenarioSource, ScenarioWriter, Settings, Telemetry,
    logging,
};

const WRAP_WIDTH: usize = 90;

#[derive(Debug, Parser)]
#[command(name = "whodunit", version, about = "Interrogate the suspects of a murder case")]
struct Args {
    /// Scenario id: a built-in case or a `<id>.json` file in the scenario directory
    #[arg(long, default_value = DEFAULT_SCENARIO_ID)]
    scenario: String,

    /// Directory with scenario files (default: ~/whodunit/data/scenarios)
    #[arg(long)]
    scenario_dir: Option<PathBuf>,

    /// Resume a game by id instead of starting a new one
    #[arg(long)]
    game_id: Option<String>,

    /// Generate a new case from a wish ("" for a random one) and play it
    #[arg(long)]
    generate: Option<String>,

    #[arg(long, default_value = "medium")]
    difficulty: Difficulty,
}

fn print_wrapped(text: &str) {
    println!("{}", textwrap::fill(text, WRAP_WIDTH));
}

fn load_scenario(id: &str, directory: &ScenarioDirectory) -> Result<Scenario, ScenarioError> {
    match BuiltinScenarios.load(id) {
        Err(ScenarioError::NotFound(_)) => directory.load(id),
        other => other,
    }
}

fn save_audio(dir: &Path, game_id: &str, turn: &TurnResponse, index: usize) -> Result<PathBuf> {
    let audio = turn.audio_base64.as_deref().unwrap_or_default();
    let bytes = STANDARD.decode(audio).context("audio is not valid base64")?;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}-{}-{}.mp3", game_id, turn.persona_slug, index));
    std::fs::write(&path, bytes)?;
    Ok(path)
}

fn print_help() {
    println!("Commands:");
    println!("  <slug>: <question>   question a suspect (later lines go to the same suspect)");
    println!("  /personas            list the suspects");
    println!("  /hint                ask the game master for a hint");
    println!("  /notes               show your investigation notes");
    println!("  /status              show revealed clues and suspect states");
    println!("  /quit                leave the game (progress is kept)");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let data_dir = data_dir()?;
    logging::init(&data_dir)?;

    let settings = Settings::load()?;
    let api_key = settings.api_key().ok_or(AppError::MissingApiKey)?;
    let templates = Arc::new(
        PromptTemplates::load_from_dir(data_dir.join("prompts"))
            .context("could not read prompt overrides")?,
    );

    let completion = Arc::new(
        OpenAICompletion::new(&api_key, settings.model.clone())
            .with_temperature(settings.persona_temperature)
            .with_timeout(settings.request_timeout()),
    );

    let directory = ScenarioDirectory::new(
        args.scenario_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("scenarios")),
    );

    let scenario = match &args.generate {
        Some(wish) => {
            println!("Writing a new case, this can take a minute...");
            let generator = Arc::new(
                OpenAICompletion::new(&api_key, settings.model.clone())
                    .with_temperature(settings.generator_temperature)
                    .with_timeout(settings.request_timeout()),
            );
            let scenario = ScenarioWriter::new(generator)
                .with_max_retries(settings.generation_retries)
                .with_language(settings.language.clone())
                .with_templates(templates.clone())
                .generate(wish, args.difficulty)
                .await?;
            let id = format!("generated-{}", uuid::Uuid::new_v4().simple());
            scenario.save_to_file(directory.path_for(&id))?;
            println!("Saved as scenario {:?}.", id);
            scenario
        }
        None => load_scenario(&args.scenario, &directory)?,
    };

    let store = Arc::new(JsonFileSessionStore::new(data_dir.join("games"))?);
    let telemetry = match &settings.telemetry_url {
        Some(url) => Telemetry::spawn(url.clone()),
        None => Telemetry::disabled(),
    };
    let mut builder = GameMaster::builder(scenario, completion)
        .store(store)
        .telemetry(telemetry)
        .config(AgentConfig {
            language: settings.language.clone(),
            history_window: settings.history_window,
            templates,
        });
    if settings.audio_output_enabled {
        builder = builder.voice(Arc::new(OpenAIVoice::new(&api_key)));
    }
    let game_master = builder.build()?;

    let game_id = args
        .game_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let info = game_master.game_info(&game_id).await?;

    println!("\n=== {} ===", info.scenario_name);
    println!("Game id: {}", info.game_id);
    println!("Location: {}", info.location);
    println!("Time: {}", info.time_of_incident);
    println!("Victim: {} ({})\n", info.victim.name, info.victim.role);
    print_wrapped(&info.intro_message);
    println!("\nSuspects:");
    for persona in &info.personas {
        println!("  {:<10} {} - {}", persona.slug, persona.name, persona.role);
    }
    println!();
    print_help();

    let audio_dir = data_dir.join("audio");
    let mut current = info.personas.first().map(|p| p.slug.clone()).unwrap_or_default();
    let mut turns = 0usize;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("\n[{}] >", current);
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "/quit" | "/exit" => break,
            "/help" => print_help(),
            "/personas" => {
                for persona in &info.personas {
                    println!("  {:<10} {} - {}", persona.slug, persona.name, persona.role);
                    print_wrapped(&format!("    {}", persona.description));
                }
            }
            "/hint" => {
                let hint = game_master.generate_hint(&game_id).await;
                println!(
                    "💡 {} (hint {}, clues {}/{})",
                    hint.hint, hint.hints_used, hint.clues_found, hint.total_critical_clues
                );
            }
            "/notes" => {
                let notes = game_master.notes(&game_id).await?;
                if notes.is_empty() {
                    println!("No notes yet.");
                }
                for (slug, notes) in notes {
                    println!("{}:", slug);
                    for note in notes {
                        print_wrapped(&format!("  [{}] {}", note.category, note.text));
                    }
                }
            }
            "/status" => match game_master.session_debug(&game_id).await? {
                Some(snapshot) => {
                    println!(
                        "Messages: {}, hints used: {}",
                        snapshot.message_count, snapshot.hints_used
                    );
                    for clue in &snapshot.revealed_clues {
                        println!("  {}", clue);
                    }
                    for (slug, state) in &snapshot.persona_states {
                        println!(
                            "  {:<10} questioned {} times, stress {:.0}%",
                            slug,
                            state.interrogation_count,
                            state.stress_level * 100.0
                        );
                    }
                }
                None => println!("No progress yet."),
            },
            command if command.starts_with('/') => {
                println!("Unknown command {:?}", command);
            }
            question => {
                let question = match question.split_once(':') {
                    Some((slug, rest))
                        if info.personas.iter().any(|p| p.slug == slug.trim()) =>
                    {
                        current = slug.trim().to_string();
                        rest.trim()
                    }
                    _ => question,
                };

                match game_master.route(&game_id, &current, question).await {
                    Ok(turn) => {
                        turns += 1;
                        println!();
                        print_wrapped(&format!("{}: {}", turn.persona_name, turn.response));
                        if let Some(clue) = &turn.revealed_clue {
                            println!("{}", clue);
                        }
                        for note in &turn.new_notes {
                            print_wrapped(&format!("📝 [{}] {}", note.category, note.text));
                        }
                        if turn.audio_base64.is_some() {
                            match save_audio(&audio_dir, &game_id, &turn, turns) {
                                Ok(path) => println!("🔊 {}", path.display()),
                                Err(e) => log::warn!("Could not save audio: {}", e),
                            }
                        }
                    }
                    Err(e) => println!("The suspect does not answer: {}", e),
                }
            }
        }
    }

    println!("Game {} saved. Resume with --game-id {}", game_id, game_id);
    Ok(())
}
