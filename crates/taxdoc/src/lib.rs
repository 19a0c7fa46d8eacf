pub mod ai;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod pipeline;
pub mod processor;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod worker;

pub use ai::{Advice, ModelProvider, OpenAiProvider, ProviderError};
pub use config::{load_config, Config};
pub use db::Database;
pub use document::{Document, DocumentStatus, DocumentType, FieldMap, FieldValue};
pub use error::{ConfigError, ProcessError, Result, StorageError, TaxdocError};
pub use lifecycle::{DocumentManager, SubmitRequest};
pub use pipeline::PassOutcome;
pub use processor::{DocumentFormat, TextExtractor};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use storage::{BlobStore, FilesystemBlobStore};
