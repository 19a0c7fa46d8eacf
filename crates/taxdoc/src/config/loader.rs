use std::path::Path;

use crate::config::schema::{CompletionSettings, Config};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.storage_directory.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "storageDirectory must not be empty".to_string(),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "workerCount must be at least 1".to_string(),
        });
    }

    if config.ocr.enabled && config.ocr.language.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "ocr.language must be set when OCR is enabled".to_string(),
        });
    }

    validate_completion("ai.extraction", &config.ai.extraction)?;
    validate_completion("ai.advice", &config.ai.advice)?;

    Ok(())
}

fn validate_completion(name: &str, settings: &CompletionSettings) -> Result<(), ConfigError> {
    if !(0.0..=2.0).contains(&settings.temperature) {
        return Err(ConfigError::Validation {
            message: format!(
                "{}.temperature must be between 0 and 2, got {}",
                name, settings.temperature
            ),
        });
    }
    if settings.max_tokens == 0 {
        return Err(ConfigError::Validation {
            message: format!("{}.maxTokens must be positive", name),
        });
    }
    Ok(())
}
