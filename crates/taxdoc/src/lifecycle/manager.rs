use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use serde_json::Value;

use crate::ai::{Advice, AdviceGenerator, FieldExtractionClient, ModelProvider, OpenAiProvider};
use crate::config::{Config, LimitsConfig};
use crate::db::document_repo::{self, DocumentFilter};
use crate::db::Database;
use crate::document::{Document, DocumentStatus, DocumentType, NewDocument, UnknownDocumentType};
use crate::error::{ConfigError, Result, TaxdocError};
use crate::pipeline::{PassOutcome, ProcessingPipeline};
use crate::processor::TextExtractor;
use crate::sanitize;
use crate::storage::{blob_key, BlobStore, FilesystemBlobStore};
use crate::worker::{Reservation, TaskHandle, TaskScheduler};

/// Input to [`DocumentManager::submit`].
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub owner: String,
    pub original_file_name: String,
    pub content: Vec<u8>,
    /// One of `W-2`, `1099`, `1040`, `Other`.
    pub document_type: String,
    pub custom_instruction: Option<String>,
}

/// Owns the document state machine and schedules processing passes.
pub struct DocumentManager {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    pipeline: Arc<ProcessingPipeline>,
    advice: AdviceGenerator,
    scheduler: TaskScheduler,
    limits: LimitsConfig,
    stale_after_secs: u64,
}

impl DocumentManager {
    /// Production wiring: SQLite database, filesystem blob store, lopdf +
    /// Tesseract extraction and the OpenAI-compatible provider.
    pub fn from_config(config: &Config) -> Result<Self> {
        let db_path = config
            .resolved_database_path()
            .ok_or_else(|| ConfigError::Validation {
                message: "databasePath is not set and no home directory was found".to_string(),
            })?;
        let db = Database::open(&db_path)?;
        let blobs = Arc::new(FilesystemBlobStore::new(config.resolved_storage_directory()));
        let extractor = Arc::new(TextExtractor::from_config(&config.ocr));
        let provider = Arc::new(OpenAiProvider::from_config(&config.ai)?);

        Ok(Self::new(db, blobs, extractor, provider, config))
    }

    /// Wires the manager from explicit collaborators.
    pub fn new(
        db: Database,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<TextExtractor>,
        provider: Arc<dyn ModelProvider>,
        config: &Config,
    ) -> Self {
        let extraction = FieldExtractionClient::new(Arc::clone(&provider), config.ai.extraction);
        let pipeline = ProcessingPipeline::new(db.clone(), Arc::clone(&blobs), extractor, extraction);

        Self {
            db,
            blobs,
            pipeline: Arc::new(pipeline),
            advice: AdviceGenerator::new(provider, config.ai.advice),
            scheduler: TaskScheduler::new(config.worker_count.max(1)),
            limits: config.limits.clone(),
            stale_after_secs: config.processing.stale_after_secs,
        }
    }

    /// Stores the upload, persists it as `uploaded` and schedules its first
    /// pass. Returns without waiting for the pass.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Document> {
        let (document, _handle) = self.submit_tracked(request).await?;
        Ok(document)
    }

    /// [`submit`](Self::submit), also returning a handle to the scheduled pass.
    pub async fn submit_tracked(&self, request: SubmitRequest) -> Result<(Document, TaskHandle)> {
        let owner = request.owner.trim();
        if owner.is_empty() {
            return Err(TaxdocError::Validation("owner is required".to_string()));
        }
        if request.original_file_name.trim().is_empty() {
            return Err(TaxdocError::Validation(
                "original file name is required".to_string(),
            ));
        }
        let document_type: DocumentType = request
            .document_type
            .parse()
            .map_err(|e: UnknownDocumentType| TaxdocError::Validation(e.to_string()))?;
        self.validate_content(&request.content)?;
        let custom_instruction = request.custom_instruction.unwrap_or_default();
        self.validate_instruction(&custom_instruction)?;

        let storage_key = blob_key(owner, &request.original_file_name);
        let storage_location = self.blobs.put(&storage_key, &request.content).await?;

        let document = Document::create(
            NewDocument {
                owner: owner.to_string(),
                original_file_name: request.original_file_name,
                storage_key,
                storage_location,
                document_type,
                custom_instruction,
                file_size_bytes: request.content.len() as u64,
            },
            Utc::now(),
        );

        if let Err(e) = document_repo::insert(&self.db, &document) {
            if let Err(cleanup) = self.blobs.delete(&document.storage_key).await {
                warn!("Failed to remove orphaned blob: {}", cleanup);
            }
            return Err(e.into());
        }

        info!(
            "Document {} submitted by {} ({}, {}, {} bytes)",
            document.id,
            sanitize::hash_id(&document.owner),
            document.document_type,
            sanitize::redact_file_name(&document.original_file_name),
            document.metadata.file_size_bytes
        );

        let reservation = self.scheduler.reserve(&document.id)?;
        let (_, handle) = self.start_pass(reservation, None)?;

        Ok((document, handle))
    }

    /// Schedules a new pass for an existing document. A non-`None`
    /// instruction replaces the stored one before the pass starts.
    ///
    /// Fails with [`TaxdocError::Conflict`] while a pass is still running.
    pub fn reprocess(&self, id: &str, custom_instruction: Option<String>) -> Result<Document> {
        let (document, _handle) = self.reprocess_tracked(id, custom_instruction)?;
        Ok(document)
    }

    /// [`reprocess`](Self::reprocess), also returning a handle to the scheduled pass.
    pub fn reprocess_tracked(
        &self,
        id: &str,
        custom_instruction: Option<String>,
    ) -> Result<(Document, TaskHandle)> {
        if let Some(instruction) = &custom_instruction {
            self.validate_instruction(instruction)?;
        }

        let reservation = self.scheduler.reserve(id)?;
        info!("Reprocessing document {}", id);
        self.start_pass(reservation, custom_instruction)
    }

    pub fn get_status(&self, id: &str) -> Result<Document> {
        self.load(id)
    }

    /// Records a human correction at confidence 1.0. Status is unchanged.
    pub fn edit_field(&self, id: &str, field: &str, value: &str) -> Result<Document> {
        let mut edits = BTreeMap::new();
        edits.insert(field.to_string(), value.to_string());
        self.patch_fields(id, edits)
    }

    /// Merges several human corrections at once; untouched fields are kept.
    pub fn patch_fields(&self, id: &str, edits: BTreeMap<String, String>) -> Result<Document> {
        if edits.is_empty() {
            return Err(TaxdocError::Validation("no fields to update".to_string()));
        }
        if edits.keys().any(|name| name.trim().is_empty()) {
            return Err(TaxdocError::Validation(
                "field name must not be empty".to_string(),
            ));
        }

        let count = edits.len();
        let document = self.modify(id, |document| {
            document.apply_edits(edits, Utc::now());
            Ok(())
        })?;

        info!("Applied {} human edit(s) to document {}", count, id);
        Ok(document)
    }

    /// Stores a new custom instruction without reprocessing. An empty
    /// instruction restores the per-type default.
    pub fn update_instruction(&self, id: &str, instruction: &str) -> Result<Document> {
        self.validate_instruction(instruction)?;

        self.modify(id, |document| {
            document.custom_instruction = instruction.to_string();
            document.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Deletes the blob, then the document. Refused while a pass is running.
    pub async fn purge(&self, id: &str) -> Result<()> {
        // Held until return so no pass can start mid-purge.
        let _reservation = self.scheduler.reserve(id)?;
        let document = self.load(id)?;

        self.blobs.delete(&document.storage_key).await?;
        if !document_repo::delete(&self.db, id)? {
            return Err(TaxdocError::NotFound(id.to_string()));
        }

        info!("Purged document {}", id);
        Ok(())
    }

    /// Newest first. Returns the page and the total number of matches.
    pub fn list(&self, owner: &str, filter: DocumentFilter) -> Result<(Vec<Document>, u64)> {
        if owner.trim().is_empty() {
            return Err(TaxdocError::Validation("owner is required".to_string()));
        }
        let filter = DocumentFilter {
            owner: Some(owner.trim().to_string()),
            ..filter
        };
        Ok(document_repo::query(&self.db, &filter)?)
    }

    /// Turns arbitrary structured data into advice. Only an unreachable
    /// model is an error; an unparseable reply yields fallback advice.
    pub async fn generate_advice(
        &self,
        data: &Value,
        custom_instruction: Option<&str>,
    ) -> Result<Advice> {
        let empty = match data {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        };
        if empty {
            return Err(TaxdocError::Validation(
                "advice input must not be empty".to_string(),
            ));
        }
        if let Some(instruction) = custom_instruction {
            self.validate_instruction(instruction)?;
        }

        Ok(self.advice.generate(data, custom_instruction).await?)
    }

    /// Re-schedules documents left in `processing` longer than the stale
    /// threshold with no live pass. Returns the ids that were restarted.
    pub fn recover_stale(&self) -> Result<Vec<String>> {
        let Some(cutoff) = i64::try_from(self.stale_after_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(Vec::new());
        };
        let stale = document_repo::find_stale_processing(&self.db, &cutoff)?;
        if stale.is_empty() {
            return Ok(Vec::new());
        }
        info!(
            "{} of {} processing document(s) are stale",
            stale.len(),
            document_repo::count_by_status(&self.db, DocumentStatus::Processing)?
        );

        let mut restarted = Vec::new();
        for document in stale {
            let reservation = match self.scheduler.reserve(&document.id) {
                Ok(reservation) => reservation,
                Err(_) => continue,
            };
            warn!(
                "Document {} stuck in processing since {}, restarting",
                document.id, document.updated_at
            );
            match self.start_pass(reservation, None) {
                Ok(_) => restarted.push(document.id),
                Err(e) => error!("Failed to restart document {}: {}", document.id, e),
            }
        }

        Ok(restarted)
    }

    pub fn is_processing(&self, id: &str) -> bool {
        self.scheduler.is_active(id)
    }

    /// Waits for the running pass of `id`; `None` when nothing is running.
    pub async fn wait_for(&self, id: &str) -> Option<PassOutcome> {
        self.scheduler.wait(id).await
    }

    pub async fn wait_idle(&self) {
        self.scheduler.wait_all().await
    }

    /// Moves the reserved document to `processing`, optionally replacing its
    /// instruction in the same write, then spawns the pass. The status write
    /// happens before the task exists.
    fn start_pass(
        &self,
        reservation: Reservation,
        custom_instruction: Option<String>,
    ) -> Result<(Document, TaskHandle)> {
        let id = reservation.document_id().to_string();
        let mut previous = DocumentStatus::Processing;
        let document = self.modify(&id, |document| {
            previous = document.status;
            if let Some(instruction) = custom_instruction {
                document.custom_instruction = instruction;
            }
            document.begin_processing(Utc::now()).map_err(|e| {
                warn!("Document {} cannot start processing: {}", document.id, e);
                TaxdocError::Conflict(document.id.clone())
            })
        })?;
        debug!("Document {} moved from {} to processing", id, previous);

        let pipeline = Arc::clone(&self.pipeline);
        let snapshot = document.clone();
        let handle = reservation.spawn(async move { pipeline.run(document).await });

        Ok((snapshot, handle))
    }

    fn load(&self, id: &str) -> Result<Document> {
        document_repo::find_by_id(&self.db, id)?.ok_or_else(|| TaxdocError::NotFound(id.to_string()))
    }

    /// Applies `mutate` to the stored document in one transaction.
    fn modify<F>(&self, id: &str, mutate: F) -> Result<Document>
    where
        F: FnOnce(&mut Document) -> Result<()>,
    {
        document_repo::modify(&self.db, id, mutate)?
            .map(|(document, ())| document)
            .ok_or_else(|| TaxdocError::NotFound(id.to_string()))
    }

    fn validate_content(&self, content: &[u8]) -> Result<()> {
        if content.is_empty() {
            return Err(TaxdocError::Validation("file is empty".to_string()));
        }
        if content.len() as u64 > self.limits.max_file_size_bytes {
            return Err(TaxdocError::Validation(format!(
                "file is {} bytes, limit is {}",
                content.len(),
                self.limits.max_file_size_bytes
            )));
        }
        Ok(())
    }

    fn validate_instruction(&self, instruction: &str) -> Result<()> {
        let length = instruction.chars().count();
        if length > self.limits.max_instruction_length {
            return Err(TaxdocError::Validation(format!(
                "custom instruction is {} characters, limit is {}",
                length, self.limits.max_instruction_length
            )));
        }
        Ok(())
    }
}
