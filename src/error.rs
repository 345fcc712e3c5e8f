use thiserror::Error;

// Enum for handling binary-level errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Game error: {0}")]
    Game(#[from] GameError), // Errors raised while playing a turn.

    #[error("Scenario error: {0}")]
    Scenario(#[from] ScenarioError), // Errors loading, validating or generating a case.

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("Logger error: {0}")]
    Logger(String), // The logger could not be installed.

    #[error("No OpenAI API key configured")]
    MissingApiKey,

    #[error("Home directory could not be resolved")]
    NoHomeDirectory,
}

// Errors from the external completion and voice services.
#[derive(Debug, Error)]
pub enum AIError {
    #[error("OpenAI API error: {0}")]
    OpenAI(#[from] async_openai::error::OpenAIError),

    #[error("Timeout occurred")]
    Timeout, // The service did not answer within the configured time.

    #[error("No message found")]
    NoMessageFound, // The service answered without any content.

    #[error("Failed to parse structured output: {0}")]
    StructuredOutput(String),
}

impl From<serde_json::Error> for AIError {
    fn from(err: serde_json::Error) -> AIError {
        AIError::StructuredOutput(err.to_string())
    }
}

// Errors surfaced to the caller of a turn.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("Completion service failed: {0}")]
    Completion(#[from] AIError),

    #[error("Session store failed: {0}")]
    Store(#[from] StoreError),

    #[error("Scenario rejected: {0}")]
    Scenario(#[from] ScenarioError),

    #[error("Scenario has no personas to route to")]
    NoPersonas,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid game id: {0:?}")]
    InvalidGameId(String),
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    // Structural problems a new attempt may fix.
    #[error("Invalid scenario: {0}")]
    Invalid(String),

    // Broken case logic, never repaired or retried.
    #[error("Scenario rule violated: {0}")]
    BusinessRule(String),

    #[error("Scenario generation failed after {attempts} attempts: {last_error}")]
    Generation { attempts: u32, last_error: String },

    #[error("Completion service failed: {0}")]
    Completion(#[from] AIError),

    #[error("Scenario not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScenarioError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScenarioError::Invalid(_)
                | ScenarioError::Completion(_)
                | ScenarioError::Serialization(_)
        )
    }
}
