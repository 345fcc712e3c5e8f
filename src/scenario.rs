use crate::error::ScenarioError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

pub const MIN_PERSONAS: usize = 4;
pub const MIN_CRITICAL_CLUES: usize = 3;

pub const DEFAULT_SCENARIO_ID: &str = "office_murder";
const OFFICE_MURDER: &str = include_str!("../assets/scenarios/office_murder.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Victim {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub murderer: String,
    pub motive: String,
    pub weapon: String,
    pub critical_clues: Vec<String>,
    // Keywords per persona slug whose mention counts as a disclosed clue.
    #[serde(default)]
    pub clue_keywords: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaDefinition {
    pub slug: String,
    pub name: String,
    pub role: String,
    pub public_description: String,
    pub personality: String,
    pub private_knowledge: String,
    pub knows_about_others: String,
    #[serde(default)]
    pub clue_keywords: Vec<String>,
}

/// A complete, immutable murder case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub setting: String,
    pub victim: Victim,
    pub shared_knowledge: String,
    pub timeline: String,
    pub personas: Vec<PersonaDefinition>,
    pub solution: Solution,
    #[serde(default)]
    pub intro_message: String,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = serde_json::from_str(json)?;
        scenario.validate_rules()?;
        Ok(scenario)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let file = File::open(path)?;
        let scenario: Scenario = serde_json::from_reader(file)?;
        scenario.validate_rules()?;
        Ok(scenario)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ScenarioError> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn persona(&self, slug: &str) -> Option<&PersonaDefinition> {
        self.personas.iter().find(|p| p.slug == slug)
    }

    /// The persona that receives questions addressed to an unknown slug.
    pub fn lead_persona(&self) -> Option<&PersonaDefinition> {
        self.personas.first()
    }

    /// Keywords from the solution win over the persona's own list.
    pub fn clue_keywords_for(&self, slug: &str) -> &[String] {
        match self.solution.clue_keywords.get(slug) {
            Some(keywords) if !keywords.is_empty() => keywords,
            _ => self
                .persona(slug)
                .map(|p| p.clue_keywords.as_slice())
                .unwrap_or_default(),
        }
    }

    /// Full check for a freshly written case: the content minimums first,
    /// then the case logic.
    ///
    /// Missing content comes back as [`ScenarioError::Invalid`] and may be
    /// fixed by generating again; broken case logic comes back as
    /// [`ScenarioError::BusinessRule`].
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.personas.len() < MIN_PERSONAS {
            return Err(ScenarioError::Invalid(format!(
                "expected at least {} personas, found {}",
                MIN_PERSONAS,
                self.personas.len()
            )));
        }
        if self.solution.critical_clues.len() < MIN_CRITICAL_CLUES {
            return Err(ScenarioError::Invalid(format!(
                "expected at least {} critical clues, found {}",
                MIN_CRITICAL_CLUES,
                self.solution.critical_clues.len()
            )));
        }
        self.validate_rules()
    }

    /// What every playable case must satisfy, whatever its size: non-empty
    /// unique slugs, a murderer among the personas, keywords only for known
    /// personas.
    pub fn validate_rules(&self) -> Result<(), ScenarioError> {
        if self.personas.is_empty() {
            return Err(ScenarioError::Invalid("scenario has no personas".to_string()));
        }
        if let Some(persona) = self.personas.iter().find(|p| p.slug.trim().is_empty()) {
            return Err(ScenarioError::Invalid(format!(
                "persona {:?} has an empty slug",
                persona.name
            )));
        }

        let mut slugs = HashSet::new();
        for persona in &self.personas {
            if !slugs.insert(persona.slug.as_str()) {
                return Err(ScenarioError::BusinessRule(format!(
                    "duplicate persona slug: {}",
                    persona.slug
                )));
            }
        }

        if !slugs.contains(self.solution.murderer.as_str()) {
            return Err(ScenarioError::BusinessRule(format!(
                "murderer '{}' not found among personas",
                self.solution.murderer
            )));
        }

        if let Some(slug) = self
            .solution
            .clue_keywords
            .keys()
            .find(|slug| !slugs.contains(slug.as_str()))
        {
            return Err(ScenarioError::BusinessRule(format!(
                "clue keywords reference unknown persona '{}'",
                slug
            )));
        }

        Ok(())
    }
}

/// Read access to scenario definitions keyed by id.
pub trait ScenarioSource {
    fn load(&self, id: &str) -> Result<Scenario, ScenarioError>;

    fn available(&self) -> Vec<String>;
}

// Scenarios compiled into the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinScenarios;

impl ScenarioSource for BuiltinScenarios {
    fn load(&self, id: &str) -> Result<Scenario, ScenarioError> {
        match id {
            DEFAULT_SCENARIO_ID => Scenario::from_json(OFFICE_MURDER),
            other => Err(ScenarioError::NotFound(other.to_string())),
        }
    }

    fn available(&self) -> Vec<String> {
        vec![DEFAULT_SCENARIO_ID.to_string()]
    }
}

// Scenarios stored as `<id>.json` files in a directory.
#[derive(Debug, Clone)]
pub struct ScenarioDirectory {
    dir: PathBuf,
}

impl ScenarioDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

impl ScenarioSource for ScenarioDirectory {
    fn load(&self, id: &str) -> Result<Scenario, ScenarioError> {
        let path = self.path_for(id);
        if !path.is_file() {
            return Err(ScenarioError::NotFound(id.to_string()));
        }
        Scenario::load_from_file(path)
    }

    fn available(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut ids: Vec<String> = entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let path = entry.path();
                if path.is_file() && path.extension()? == "json" {
                    path.file_stem()?.to_str().map(String::from)
                } else {
                    None
                }
            })
            .collect();
        ids.sort();
        ids
    }
}
