pub mod agents;
pub mod completion;
pub mod error;
pub mod game_master;
pub mod game_state;
pub mod logging;
pub mod message;
pub mod scenario;
pub mod session_store;
pub mod settings;
pub mod telemetry;
pub mod voice;

// Re-export commonly used items for easier access
pub use agents::{AgentConfig, Difficulty, PersonaAgent, ScenarioWriter};
pub use completion::{ChatTurn, CompletionClient, OpenAICompletion, StructuredSchema};
pub use error::{AIError, AppError, GameError, ScenarioError, StoreError};
pub use game_master::{GameInfo, GameMaster, HintResponse, SessionSnapshot, TurnResponse};
pub use game_state::{AutoNote, Clue, GameSession, NoteCategory, PersonaState};
pub use message::{Message, MessageRole};
pub use scenario::{BuiltinScenarios, Scenario, ScenarioDirectory, ScenarioSource};
pub use session_store::{InMemorySessionStore, JsonFileSessionStore, SessionStore};
pub use settings::Settings;
pub use telemetry::Telemetry;
pub use voice::{OpenAIVoice, VoiceSynthesizer};
