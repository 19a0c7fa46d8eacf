pub mod context;
pub mod error;
pub mod runner;

pub use context::PassContext;
pub use error::PassError;
pub use runner::{PassOutcome, ProcessingPipeline};
