use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::config::AiConfig;
use crate::secrets::resolve_secret_optional;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One chat-completion call: a system and a user message plus sampling bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A language-model backend.
///
/// Implementations return the assistant's reply text verbatim; parsing is
/// the caller's concern.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no API key configured: {0}")]
    MissingCredential(String),

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error: {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to parse response: {0}")]
    InvalidResponse(String),
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
}

impl OpenAiProvider {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<SecretString>,
        request_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    /// Builds the provider from configuration. A key that cannot be resolved
    /// is logged and left unset, so every call fails with `MissingCredential`.
    pub fn from_config(config: &AiConfig) -> Result<Self, ProviderError> {
        let api_key = match resolve_secret_optional(
            config.api_key.as_deref(),
            config.api_key_file.as_deref(),
            config.api_key_env_var.as_deref(),
        ) {
            Ok(key) => key,
            Err(e) => {
                warn!("Model provider API key could not be resolved: {}", e);
                None
            }
        };
        if api_key.is_none() {
            warn!("No model provider API key configured; AI calls will fail until one is set");
        }

        Self::new(
            &config.base_url,
            &config.model,
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ProviderError::MissingCredential("set ai.apiKey, ai.apiKeyFile or ai.apiKeyEnvVar".into())
        })?;

        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        debug!(model = %self.model, "Chat completion request to {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: serde_json::Value = response.json().await?;
        reply_content(&payload)
    }
}

fn reply_content(payload: &serde_json::Value) -> Result<String, ProviderError> {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ProviderError::InvalidResponse("missing choices[0].message.content".into()))
}
