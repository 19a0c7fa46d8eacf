//! Model-backed field extraction and advice generation.

pub mod advice;
pub mod extraction;
pub mod normalizer;
pub mod prompts;
pub mod provider;

pub use advice::{Advice, AdviceGenerator};
pub use extraction::{ExtractionOutcome, FieldExtractionClient};
pub use normalizer::{normalize_reply, NormalizedReply};
pub use provider::{CompletionRequest, ModelProvider, OpenAiProvider, ProviderError};
