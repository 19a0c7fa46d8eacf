use std::time::Instant;

use crate::document::Document;
use crate::processor::ExtractedText;

/// State threaded through the steps of one processing pass.
pub struct PassContext {
    /// Snapshot taken when the pass was scheduled.
    pub document: Document,
    pub started: Instant,

    // fetch_blob
    pub content_bytes: usize,

    // extract_text
    pub text: Option<ExtractedText>,
}

impl PassContext {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            started: Instant::now(),
            content_bytes: 0,
            text: None,
        }
    }
}
