// Application settings, persisted as JSON next to the log file.
use crate::agents::{DEFAULT_GENERATION_RETRIES, DEFAULT_HISTORY_WINDOW};
use crate::completion::DEFAULT_MODEL;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::time::Duration;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub language: String, // Language every persona answers in.
    pub openai_api_key: Option<String>,
    pub model: String,
    pub persona_temperature: f32,
    pub generator_temperature: f32,
    pub history_window: usize, // Turns of visible history a persona remembers.
    pub request_timeout_secs: u64,
    pub generation_retries: u32,
    pub audio_output_enabled: bool,
    pub telemetry_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            language: "English".to_string(),
            openai_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            persona_temperature: 0.8,
            generator_temperature: 0.9,
            history_window: DEFAULT_HISTORY_WINDOW,
            request_timeout_secs: 60,
            generation_retries: DEFAULT_GENERATION_RETRIES,
            audio_output_enabled: false,
            telemetry_url: None,
        }
    }
}

/// `~/whodunit/data`, where settings, logs and saved games live.
pub fn data_dir() -> Result<PathBuf, AppError> {
    let home = dir::home_dir().ok_or(AppError::NoHomeDirectory)?;
    Ok(home.join("whodunit").join("data"))
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    // Missing file means defaults.
    pub fn load() -> Result<Self, AppError> {
        let path = data_dir()?.join("settings.json");
        if !path.is_file() {
            return Ok(Self::default());
        }
        Ok(Self::load_settings_from_file(path)?)
    }

    pub fn save(&self) -> Result<(), AppError> {
        let path = data_dir()?.join("settings.json");
        Ok(self.save_to_file(path)?)
    }

    pub fn load_settings_from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let data = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&data)?;
        Ok(settings)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(data.as_bytes())?;
        Ok(())
    }

    /// The configured key, or the `OPENAI_API_KEY` environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.openai_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
