//! Settings consumed by the analysis pipeline, the model client and the merge gate.
//!
//! Loaded from a TOML file with three optional tables (`[llm]`, `[analysis]`,
//! `[merge_check]`). Every key has a default, so an empty or missing file is a
//! valid configuration.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable that overrides `llm.api_key`.
pub const API_KEY_ENV: &str = "REVGATE_LLM_API_KEY";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub analysis: AnalysisSettings,
    pub merge_check: MergeCheckSettings,
}

/// Model endpoint settings.
///
/// An endpoint containing `/api/chat` is spoken to in the Ollama dialect;
/// anything else is treated as OpenAI-compatible.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/chat".to_owned(),
            api_key: None,
            model: "codellama:13b".to_owned(),
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

impl LlmSettings {
    /// The API key, if one is configured and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// React to opened / updated lifecycle events at all.
    pub auto_enabled: bool,
    pub min_confidence: f64,
    /// Comma-separated. `*.ext` matches by suffix; anything else by suffix or substring.
    pub excluded_patterns: String,
    /// Comma-separated language tags as produced by `language::detect`.
    pub supported_languages: String,
    pub max_files: usize,
    pub max_file_size_kb: usize,
    /// Size of the background analysis pool.
    pub workers: usize,
    /// Attach the full new-file content as prompt context when extracting diffs.
    pub include_full_content: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            auto_enabled: true,
            min_confidence: 0.7,
            excluded_patterns: "*.min.js,*.min.css,*.map,*.lock,package-lock.json,yarn.lock"
                .to_owned(),
            supported_languages: "java,javascript,typescript,python,go,kotlin,scala,ruby,php,\
                                  csharp,cpp,c,rust,swift"
                .to_owned(),
            max_files: 50,
            max_file_size_kb: 500,
            workers: 2,
            include_full_content: false,
        }
    }
}

impl AnalysisSettings {
    pub fn excluded_patterns(&self) -> Vec<String> {
        split_csv(&self.excluded_patterns)
    }

    pub fn supported_languages(&self) -> Vec<String> {
        split_csv(&self.supported_languages)
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_kb.saturating_mul(1024)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MergeCheckSettings {
    pub enabled: bool,
    /// Merges are blocked once unresolved criticals exceed this count.
    pub max_critical: usize,
}

impl Settings {
    /// Parses settings from TOML text and validates them.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` on malformed TOML or a mistyped key, and
    /// `ConfigError::Invalid` when a value is out of range.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from `path`; a missing file yields the defaults.
    ///
    /// The `REVGATE_LLM_API_KEY` environment variable, when set and non-empty,
    /// replaces whatever API key the file holds.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut settings = match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                settings.llm.api_key = Some(key);
            }
        }
        Ok(settings)
    }

    /// Rejects values the pipeline cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));

        if self.llm.endpoint.trim().is_empty() {
            return invalid("llm.endpoint must not be empty");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return invalid("llm.temperature must be within [0, 2]");
        }
        if self.llm.max_tokens == 0 {
            return invalid("llm.max_tokens must be positive");
        }
        if !(0.0..=1.0).contains(&self.analysis.min_confidence) {
            return invalid("analysis.min_confidence must be within [0, 1]");
        }
        if self.analysis.max_files == 0 {
            return invalid("analysis.max_files must be positive");
        }
        if self.analysis.workers == 0 {
            return invalid("analysis.workers must be positive");
        }
        Ok(())
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
