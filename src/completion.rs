use crate::error::AIError;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
        ResponseFormatJsonSchema,
    },
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::{Duration, timeout};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// A prior conversation turn handed to the completion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTurn {
    User(String),
    Assistant(String),
}

// JSON schema the structured completion must satisfy.
#[derive(Debug, Clone)]
pub struct StructuredSchema {
    pub name: String,
    pub description: Option<String>,
    pub schema: Value,
    pub strict: bool,
}

/// The external text-completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, history: &[ChatTurn])
    -> Result<String, AIError>;

    async fn complete_structured(
        &self,
        schema: &StructuredSchema,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Value, AIError>;
}

/// Runs a structured completion and deserializes the answer into `T`.
pub async fn complete_as<T: DeserializeOwned>(
    client: &dyn CompletionClient,
    schema: &StructuredSchema,
    system_prompt: &str,
    user_prompt: &str,
) -> Result<T, AIError> {
    let value = client
        .complete_structured(schema, system_prompt, user_prompt)
        .await?;
    Ok(serde_json::from_value(value)?)
}

/// Removes a surrounding markdown code fence, with or without a language tag.
pub fn strip_code_fences(content: &str) -> &str {
    let mut content = content.trim();
    if let Some(rest) = content.strip_prefix("```") {
        content = rest.strip_prefix("json").unwrap_or(rest);
    }
    if let Some(rest) = content.strip_suffix("```") {
        content = rest;
    }
    content.trim()
}

pub struct OpenAICompletion {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAICompletion {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        let openai_config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(openai_config),
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request_messages(
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<Vec<ChatCompletionRequestMessage>, AIError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()?
                .into(),
        );
        for turn in history {
            let message = match turn {
                ChatTurn::User(text) => ChatCompletionRequestUserMessageArgs::default()
                    .content(text.as_str())
                    .build()?
                    .into(),
                ChatTurn::Assistant(text) => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(text.as_str())
                    .build()?
                    .into(),
            };
            messages.push(message);
        }
        Ok(messages)
    }

    async fn send(&self, request: CreateChatCompletionRequest) -> Result<String, AIError> {
        let response = match timeout(self.timeout, self.client.chat().create(request)).await {
            Ok(res) => res?,
            Err(_) => return Err(AIError::Timeout),
        };

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(AIError::NoMessageFound)
    }
}

#[async_trait]
impl CompletionClient for OpenAICompletion {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<String, AIError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages(Self::request_messages(system_prompt, history)?)
            .build()?;

        log::debug!(
            "Completion request: {} history turns, system prompt {} chars",
            history.len(),
            system_prompt.len()
        );
        self.send(request).await
    }

    async fn complete_structured(
        &self,
        schema: &StructuredSchema,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Value, AIError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: schema.description.clone(),
                name: schema.name.clone(),
                schema: Some(schema.schema.clone()),
                strict: Some(schema.strict),
            },
        };
        let history = [ChatTurn::User(user_prompt.to_string())];
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages(Self::request_messages(system_prompt, &history)?)
            .response_format(response_format)
            .build()?;

        let content = self.send(request).await?;
        Ok(serde_json::from_str(strip_code_fences(&content))?)
    }
}
