//! Isolated environment for lifecycle tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use taxdoc::config::Config;
use taxdoc::db::Database;
use taxdoc::processor::TextExtractor;
use taxdoc::storage::FilesystemBlobStore;
use taxdoc::{Document, DocumentManager, PassOutcome, SubmitRequest};

use super::fakes::{CountingNative, FakeProvider, FixedOcr, SinglePageRasterizer};

pub const OWNER: &str = "owner-1";

/// Long enough that the text layer is used without OCR.
pub const W2_TEXT: &str = "Form W-2 Wage and Tax Statement 2023\n\
    Employer: Acme Co, 100 Main Street, Springfield\n\
    Employee: Jane Doe\n\
    Wages, tips, other compensation: 55000.00\n\
    Federal income tax withheld: 6200.00\n";

/// Text OCR "reads" from rendered pages.
pub const OCR_TEXT: &str = "W-2 scanned copy. Employer Acme Co. Wages 55000.00. Federal tax withheld 6200.00.";

pub struct TestHarness {
    dir: TempDir,
    pub db: Database,
    pub blobs: Arc<FilesystemBlobStore>,
    pub provider: Arc<FakeProvider>,
    pub native: Arc<CountingNative>,
    pub rasterizer: Arc<SinglePageRasterizer>,
    pub ocr: Arc<FixedOcr>,
    pub manager: DocumentManager,
}

impl TestHarness {
    pub fn new(provider: FakeProvider) -> Self {
        Self::with_config(provider, json!({}))
    }

    /// `overrides` is merged over a minimal config at the top level.
    pub fn with_config(provider: FakeProvider, overrides: serde_json::Value) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");

        let mut config = json!({
            "version": "1.0",
            "storageDirectory": dir.path().join("blobs").to_string_lossy(),
            "workerCount": 2,
        });
        if let (Some(base), Some(extra)) = (config.as_object_mut(), overrides.as_object()) {
            for (key, value) in extra {
                base.insert(key.clone(), value.clone());
            }
        }
        let config: Config = serde_json::from_value(config).expect("valid test config");

        let db = Database::open_in_memory().expect("in-memory database");
        let blobs = Arc::new(FilesystemBlobStore::new(config.resolved_storage_directory()));
        let provider = Arc::new(provider);
        let native = Arc::new(CountingNative::default());
        let rasterizer = Arc::new(SinglePageRasterizer::default());
        let ocr = Arc::new(FixedOcr::reading(OCR_TEXT));

        let extractor = TextExtractor::new(
            native.clone(),
            rasterizer.clone(),
            Some(ocr.clone()),
            config.ocr.language.clone(),
        );
        let manager = DocumentManager::new(
            db.clone(),
            blobs.clone(),
            Arc::new(extractor),
            provider.clone(),
            &config,
        );

        Self {
            dir,
            db,
            blobs,
            provider,
            native,
            rasterizer,
            ocr,
            manager,
        }
    }

    pub fn request(&self, document_type: &str, content: &str) -> SubmitRequest {
        SubmitRequest {
            owner: OWNER.to_string(),
            original_file_name: "w2.txt".to_string(),
            content: content.as_bytes().to_vec(),
            document_type: document_type.to_string(),
            custom_instruction: None,
        }
    }

    /// Submits a W-2 text document and waits for its first pass.
    pub async fn submit_and_wait(&self, content: &str) -> (Document, PassOutcome) {
        let (submitted, handle) = self
            .manager
            .submit_tracked(self.request("W-2", content))
            .await
            .expect("submit");
        let outcome = handle.wait().await;
        let document = self.manager.get_status(&submitted.id).expect("document exists");
        (document, outcome)
    }
}
