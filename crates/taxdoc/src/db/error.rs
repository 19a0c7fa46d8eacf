use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// The field map of a document could not be serialized.
    #[error("Failed to encode extracted fields: {0}")]
    Encode(#[from] serde_json::Error),

    /// A stored row no longer describes a valid document.
    #[error("Corrupt document row '{id}': {reason}")]
    CorruptRow { id: String, reason: String },

    #[error("Document store lock poisoned")]
    LockPoisoned,
}
