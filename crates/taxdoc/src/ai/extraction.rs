use std::sync::Arc;

use log::{info, warn};

use crate::ai::normalizer::normalize_reply;
use crate::ai::prompts::{build_extraction_prompt, extraction_system_prompt};
use crate::ai::provider::{CompletionRequest, ModelProvider, ProviderError};
use crate::config::CompletionSettings;
use crate::document::{DocumentType, FieldMap};
use crate::sanitize::truncate_for_log;

/// Fields pulled from one document, plus the raw reply kept for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOutcome {
    pub fields: FieldMap,
    pub raw_reply: String,
    pub degraded: bool,
}

/// Sends document text to the model and normalizes the reply.
pub struct FieldExtractionClient {
    provider: Arc<dyn ModelProvider>,
    settings: CompletionSettings,
}

impl FieldExtractionClient {
    pub fn new(provider: Arc<dyn ModelProvider>, settings: CompletionSettings) -> Self {
        Self { provider, settings }
    }

    /// Only a failed model call is an error. An unparseable reply still
    /// succeeds with degraded fields.
    pub async fn extract(
        &self,
        text: &str,
        document_type: DocumentType,
        instruction: &str,
    ) -> Result<ExtractionOutcome, ProviderError> {
        let request = CompletionRequest {
            system: extraction_system_prompt(document_type),
            user: build_extraction_prompt(instruction, text),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let raw_reply = self.provider.complete(request).await?;
        let normalized = normalize_reply(&raw_reply);

        if normalized.degraded {
            warn!(
                "No JSON object in model reply, kept {} line(s) at reduced confidence: {}",
                normalized.fields.len(),
                truncate_for_log(&raw_reply, 200)
            );
        } else {
            info!(
                "Extracted {} field(s) from {} document",
                normalized.fields.len(),
                document_type
            );
        }

        Ok(ExtractionOutcome {
            fields: normalized.fields,
            raw_reply,
            degraded: normalized.degraded,
        })
    }
}
