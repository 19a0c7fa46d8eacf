use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::secrets::expand_home;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: String,
    /// Root directory of the filesystem blob store.
    pub storage_directory: String,
    /// SQLite database path; `~/.taxdoc/data/taxdoc.db` when unset.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
}

impl Config {
    /// `databasePath` with `~` expanded, or the per-user default location.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(expand_home(path))),
            None => crate::db::default_database_path(),
        }
    }

    pub fn resolved_storage_directory(&self) -> PathBuf {
        PathBuf::from(expand_home(&self.storage_directory))
    }
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tesseract language profile used for every page.
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

fn default_true() -> bool {
    true
}

fn default_language() -> String {
    "eng".to_string()
}

fn default_dpi() -> u32 {
    300
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: default_language(),
            dpi: default_dpi(),
        }
    }
}

/// Sampling bounds for one kind of model call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionSettings {
    pub fn extraction() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 2000,
        }
    }

    pub fn advice() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 2000,
        }
    }
}

/// Model provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    /// OpenAI-compatible endpoint; `/v1/chat/completions` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_api_key_env_var")]
    pub api_key_env_var: Option<String>,
    #[serde(default = "CompletionSettings::extraction")]
    pub extraction: CompletionSettings,
    #[serde(default = "CompletionSettings::advice")]
    pub advice: CompletionSettings,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_api_key_env_var() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: default_api_key_env_var(),
            extraction: CompletionSettings::extraction(),
            advice: CompletionSettings::advice(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Input limits enforced before a document is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsConfig {
    #[serde(default = "default_max_instruction_length")]
    pub max_instruction_length: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
}

fn default_max_instruction_length() -> usize {
    1000
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_instruction_length: default_max_instruction_length(),
            max_file_size_bytes: default_max_file_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingConfig {
    /// A document left in `processing` longer than this with no live task
    /// is considered abandoned.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

fn default_stale_after() -> u64 {
    900
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after(),
        }
    }
}
