//! Test doubles for the collaborators the lifecycle manager consumes.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use taxdoc::ai::{CompletionRequest, ModelProvider, ProviderError};
use taxdoc::processor::{DocumentFormat, NativeTextSource, OcrEngine, PageRasterizer};
use taxdoc::ProcessError;

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Unreachable,
}

/// Model provider returning a scripted reply and recording every request.
///
/// A gated provider holds each call until [`FakeProvider::release`] is called.
pub struct FakeProvider {
    reply: Mutex<Reply>,
    gate: Option<Semaphore>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeProvider {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Mutex::new(Reply::Text(text.to_string())),
            gate: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        let provider = Self::replying("");
        provider.set_unreachable();
        provider
    }

    pub fn gated(text: &str) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::replying(text)
        }
    }

    pub fn set_reply(&self, text: &str) {
        *self.reply.lock().unwrap() = Reply::Text(text.to_string());
    }

    pub fn set_unreachable(&self) {
        *self.reply.lock().unwrap() = Reply::Unreachable;
    }

    /// Lets one held call through.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ModelProvider for FakeProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let reply = self.reply.lock().unwrap().clone();
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Unreachable => Err(ProviderError::Api {
                status: 503,
                body: "upstream connect error".to_string(),
            }),
        }
    }
}

/// Treats the document bytes as UTF-8 text.
#[derive(Default)]
pub struct CountingNative {
    calls: AtomicUsize,
}

impl CountingNative {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl NativeTextSource for CountingNative {
    fn extract_text(&self, content: &[u8], _format: DocumentFormat) -> Result<String, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(String::from_utf8_lossy(content).into_owned())
    }
}

/// Renders every document as a single page holding the original bytes.
#[derive(Default)]
pub struct SinglePageRasterizer {
    calls: AtomicUsize,
}

impl SinglePageRasterizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PageRasterizer for SinglePageRasterizer {
    fn rasterize(&self, content: &[u8], _format: DocumentFormat) -> Result<Vec<Vec<u8>>, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![content.to_vec()])
    }
}

/// OCR engine that always "reads" the same text.
pub struct FixedOcr {
    text: Option<String>,
    calls: AtomicUsize,
}

impl FixedOcr {
    pub fn reading(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            text: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for FixedOcr {
    fn recognize(&self, _image: &[u8], _language: &str) -> Result<String, ProcessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.text
            .clone()
            .ok_or_else(|| ProcessError::OcrFailed("engine unavailable".to_string()))
    }
}
