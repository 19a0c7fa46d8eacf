use std::path::PathBuf;
use thiserror::Error;

/// Top-level error returned by the synchronous lifecycle operations.
///
/// Errors raised inside a background processing pass never reach a caller;
/// they are captured into the document's `status` and `error_message`.
#[derive(Error, Debug)]
pub enum TaxdocError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Text extraction failed: {0}")]
    ExtractionFailed(#[from] ProcessError),

    #[error("AI service unavailable: {0}")]
    AiServiceUnavailable(#[from] crate::ai::ProviderError),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] crate::db::DatabaseError),

    #[error("Document {0} is already being processed")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TaxdocError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TaxdocError::AiServiceUnavailable(_)
                | TaxdocError::Persistence(_)
                | TaxdocError::Conflict(_)
                | TaxdocError::Storage(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Failed to rasterize document: {0}")]
    Rasterize(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("No readable text: {0}")]
    NoText(String),

    #[error("Text extraction task aborted: {0}")]
    Aborted(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write blob '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read blob '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete blob '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, TaxdocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(TaxdocError::Conflict("doc".into()).is_transient());
        assert!(TaxdocError::Storage(StorageError::NotFound("k".into())).is_transient());
        assert!(!TaxdocError::Validation("bad".into()).is_transient());
        assert!(!TaxdocError::NotFound("doc".into()).is_transient());
        assert!(!TaxdocError::ExtractionFailed(ProcessError::NoText("x".into())).is_transient());
    }

    #[test]
    fn test_error_messages_carry_cause() {
        let err = TaxdocError::ExtractionFailed(ProcessError::OcrFailed("engine missing".into()));
        assert_eq!(
            err.to_string(),
            "Text extraction failed: OCR failed: engine missing"
        );
    }
}
