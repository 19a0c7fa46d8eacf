use thiserror::Error;

use crate::document::InvalidTransition;

/// Why a processing pass could not complete. The display text is what a
/// failed document records as its error message.
#[derive(Error, Debug)]
pub enum PassError {
    #[error("Failed to read document content: {0}")]
    Storage(#[from] crate::error::StorageError),

    #[error("Text extraction failed: {0}")]
    Extraction(#[from] crate::error::ProcessError),

    #[error("AI service unavailable: {0}")]
    AiUnavailable(#[from] crate::ai::ProviderError),

    #[error("Failed to save processing result: {0}")]
    Persistence(#[from] crate::db::DatabaseError),

    #[error("Document {0} was deleted during processing")]
    Vanished(String),

    #[error("Illegal status change: {0}")]
    Transition(#[from] InvalidTransition),
}
