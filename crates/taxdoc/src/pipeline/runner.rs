use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::ai::{ExtractionOutcome, FieldExtractionClient};
use crate::ai::prompts::select_instruction;
use crate::db::{document_repo, Database};
use crate::document::Document;
use crate::error::ProcessError;
use crate::processor::{DocumentFormat, ExtractedText, TextExtractor};
use crate::sanitize;
use crate::storage::BlobStore;

use super::context::PassContext;
use super::error::PassError;

/// Terminal result of one processing pass, as observed by whoever awaits it.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    Completed { field_count: usize, degraded: bool },
    Failed { error: String },
    /// The pass ended but its result could not be saved. The document keeps
    /// whatever state was last persisted.
    Unrecorded { error: String },
}

impl PassOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, PassOutcome::Completed { .. })
    }
}

/// Fetch, extract, analyze, persist. One instance is shared by every pass.
pub struct ProcessingPipeline {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<TextExtractor>,
    extraction: FieldExtractionClient,
}

impl ProcessingPipeline {
    pub fn new(
        db: Database,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<TextExtractor>,
        extraction: FieldExtractionClient,
    ) -> Self {
        Self {
            db,
            blobs,
            extractor,
            extraction,
        }
    }

    /// Run a full pass for a document already in `processing`.
    ///
    /// Never returns an error: every failure is written to the document as
    /// `error` status, or reported as [`PassOutcome::Unrecorded`] when even
    /// that write fails.
    pub async fn run(&self, document: Document) -> PassOutcome {
        let span = info_span!("pipeline",
            document_id = %document.id,
            document_type = %document.document_type,
            filename = %sanitize::redact_file_name(&document.original_file_name),
        );

        async move {
            let mut ctx = PassContext::new(document);
            match self.execute(&mut ctx).await {
                Ok(outcome) => self.record_success(&ctx, outcome),
                Err(e) => self.record_failure(&ctx, e),
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, ctx: &mut PassContext) -> Result<ExtractionOutcome, PassError> {
        // Step 1: Fetch blob
        let content = self
            .step_fetch_blob(ctx)
            .instrument(info_span!("fetch_blob"))
            .await?;

        // Step 2: Extract text
        let text = self
            .step_extract_text(ctx, content)
            .instrument(info_span!("extract_text"))
            .await?;
        ctx.text = Some(text.clone());

        // Step 3: Analyze
        self.step_analyze(ctx, &text)
            .instrument(info_span!("analyze"))
            .await
    }

    async fn step_fetch_blob(&self, ctx: &mut PassContext) -> Result<Vec<u8>, PassError> {
        let content = self.blobs.fetch(&ctx.document.storage_key).await?;
        ctx.content_bytes = content.len();
        debug!("Fetched {} bytes", content.len());
        Ok(content)
    }

    async fn step_extract_text(
        &self,
        ctx: &PassContext,
        content: Vec<u8>,
    ) -> Result<ExtractedText, PassError> {
        let format = DocumentFormat::detect(&content, Some(&ctx.document.original_file_name))
            .ok_or_else(|| {
                ProcessError::UnsupportedFormat(sanitize::redact_file_name(
                    &ctx.document.original_file_name,
                ))
            })?;

        let extractor = Arc::clone(&self.extractor);
        let span = Span::current();
        let text = tokio::task::spawn_blocking(move || {
            let _guard = span.enter();
            extractor.extract(&content, format)
        })
        .await
        .map_err(|e| ProcessError::Aborted(e.to_string()))??;

        debug!(
            "Extracted {} characters via {:?}",
            text.text.len(),
            text.method
        );
        Ok(text)
    }

    async fn step_analyze(
        &self,
        ctx: &PassContext,
        text: &ExtractedText,
    ) -> Result<ExtractionOutcome, PassError> {
        let instruction = select_instruction(
            ctx.document.document_type,
            ctx.document.instruction_override(),
        );
        let outcome = self
            .extraction
            .extract(&text.text, ctx.document.document_type, &instruction)
            .await?;
        Ok(outcome)
    }

    // Step 4: Persist. The status change is applied to the current row in one
    // transaction, so edits made while the pass was running are kept.
    fn record_success(&self, ctx: &PassContext, outcome: ExtractionOutcome) -> PassOutcome {
        let _step = info_span!("persist").entered();
        let field_count = outcome.fields.len();
        let degraded = outcome.degraded;

        match self.persist_completion(&ctx.document.id, outcome) {
            Ok(()) => {
                info!(
                    "Document processed: {} field(s){} in {}ms",
                    field_count,
                    if degraded { " (degraded)" } else { "" },
                    ctx.started.elapsed().as_millis()
                );
                PassOutcome::Completed {
                    field_count,
                    degraded,
                }
            }
            Err(PassError::Vanished(id)) => {
                warn!("Document {} was deleted during processing", id);
                PassOutcome::Unrecorded {
                    error: PassError::Vanished(id).to_string(),
                }
            }
            Err(e) => self.record_failure(ctx, e),
        }
    }

    fn persist_completion(&self, id: &str, outcome: ExtractionOutcome) -> Result<(), PassError> {
        document_repo::modify(&self.db, id, |latest| {
            latest
                .complete(outcome.fields, outcome.raw_reply, Utc::now())
                .map_err(PassError::from)
        })?
        .map(|_| ())
        .ok_or_else(|| PassError::Vanished(id.to_string()))
    }

    fn record_failure(&self, ctx: &PassContext, err: PassError) -> PassOutcome {
        let message = err.to_string();
        warn!("Processing failed: {}", message);

        match self.persist_failure(&ctx.document.id, &message) {
            Ok(()) => PassOutcome::Failed { error: message },
            Err(save_err) => {
                error!("Failed to record processing error: {}", save_err);
                PassOutcome::Unrecorded {
                    error: format!("{} (not recorded: {})", message, save_err),
                }
            }
        }
    }

    fn persist_failure(&self, id: &str, message: &str) -> Result<(), PassError> {
        document_repo::modify(&self.db, id, |latest| {
            latest.fail(message, Utc::now()).map_err(PassError::from)
        })?
        .map(|_| ())
        .ok_or_else(|| PassError::Vanished(id.to_string()))
    }
}
