//! Text extraction with OCR fallback.
//!
//! Native extraction runs first. When it yields fewer than
//! [`MIN_NATIVE_TEXT_CHARS`] non-whitespace characters, the document is
//! rasterized and run through OCR, and the more informative of the two
//! results wins. The extractor is stateless and safe to retry.

pub mod ocr;
pub mod pdf;

use std::sync::Arc;

use tracing::{debug, info_span, warn};

use crate::config::OcrConfig;
use crate::error::ProcessError;

/// Native text shorter than this (non-whitespace characters) triggers OCR.
pub const MIN_NATIVE_TEXT_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Image,
    Text,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "png" | "jpg" | "jpeg" | "tiff" | "tif" | "bmp" | "gif" | "webp" => {
                Some(DocumentFormat::Image)
            }
            "txt" | "text" => Some(DocumentFormat::Text),
            _ => None,
        }
    }

    /// Sniffs magic bytes first, then falls back to the file name.
    pub fn detect(content: &[u8], file_name: Option<&str>) -> Option<Self> {
        if content.starts_with(b"%PDF") {
            return Some(DocumentFormat::Pdf);
        }
        if image::guess_format(content).is_ok() {
            return Some(DocumentFormat::Image);
        }

        let name = file_name?;
        let from_mime = mime_guess::from_path(name).first().and_then(|mime| {
            match (mime.type_().as_str(), mime.subtype().as_str()) {
                ("application", "pdf") => Some(DocumentFormat::Pdf),
                ("image", _) => Some(DocumentFormat::Image),
                ("text", "plain") => Some(DocumentFormat::Text),
                _ => None,
            }
        });

        from_mime.or_else(|| {
            std::path::Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .and_then(Self::from_extension)
        })
    }
}

/// Reads a document's embedded text layer.
pub trait NativeTextSource: Send + Sync {
    fn extract_text(&self, content: &[u8], format: DocumentFormat) -> Result<String, ProcessError>;
}

/// Renders a document into page images suitable for OCR.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, content: &[u8], format: DocumentFormat)
        -> Result<Vec<Vec<u8>>, ProcessError>;
}

/// Optical character recognition over a single page image.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &[u8], language: &str) -> Result<String, ProcessError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    Native,
    Ocr,
}

#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub method: ExtractionMethod,
}

pub fn non_whitespace_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

pub struct TextExtractor {
    native: Arc<dyn NativeTextSource>,
    rasterizer: Arc<dyn PageRasterizer>,
    ocr: Option<Arc<dyn OcrEngine>>,
    language: String,
}

impl TextExtractor {
    pub fn new(
        native: Arc<dyn NativeTextSource>,
        rasterizer: Arc<dyn PageRasterizer>,
        ocr: Option<Arc<dyn OcrEngine>>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            native,
            rasterizer,
            ocr,
            language: language.into(),
        }
    }

    /// Production wiring: lopdf text layer, poppler rasterizer, Tesseract OCR.
    pub fn from_config(config: &OcrConfig) -> Self {
        let ocr: Option<Arc<dyn OcrEngine>> = if config.enabled {
            Some(Arc::new(ocr::TesseractEngine::new()))
        } else {
            None
        };

        Self::new(
            Arc::new(pdf::LopdfTextSource::new()),
            Arc::new(pdf::PopplerRasterizer::new(config.dpi)),
            ocr,
            config.language.clone(),
        )
    }

    pub fn extract(
        &self,
        content: &[u8],
        format: DocumentFormat,
    ) -> Result<ExtractedText, ProcessError> {
        let _span = info_span!("processor.extract", ?format, bytes = content.len()).entered();

        let native = match self.native.extract_text(content, format) {
            Ok(text) => {
                let len = non_whitespace_len(&text);
                if len >= MIN_NATIVE_TEXT_CHARS {
                    debug!("Native extraction produced {} characters", len);
                    return Ok(ExtractedText {
                        text,
                        method: ExtractionMethod::Native,
                    });
                }
                debug!("Native extraction inconclusive ({} characters)", len);
                Some(text)
            }
            Err(e) => {
                warn!("Native text extraction failed: {}", e);
                None
            }
        };

        let ocr_result = {
            let _ocr_span = info_span!("processor.ocr_fallback").entered();
            self.run_ocr(content, format)
        };

        match (native, ocr_result) {
            (native, Ok(ocr_text)) => {
                let native_len = native.as_deref().map(non_whitespace_len).unwrap_or(0);
                let ocr_len = non_whitespace_len(&ocr_text);

                if native_len == 0 && ocr_len == 0 {
                    return Err(ProcessError::NoText(
                        "neither the text layer nor OCR produced any text".to_string(),
                    ));
                }

                match native {
                    Some(text) if native_len > ocr_len => Ok(ExtractedText {
                        text,
                        method: ExtractionMethod::Native,
                    }),
                    _ => Ok(ExtractedText {
                        text: ocr_text,
                        method: ExtractionMethod::Ocr,
                    }),
                }
            }
            (Some(text), Err(e)) if non_whitespace_len(&text) > 0 => {
                warn!("OCR fallback failed, keeping short native text: {}", e);
                Ok(ExtractedText {
                    text,
                    method: ExtractionMethod::Native,
                })
            }
            (Some(_), Err(e)) => Err(ProcessError::NoText(format!(
                "text layer is empty and OCR failed: {}",
                e
            ))),
            (None, Err(e)) => Err(e),
        }
    }

    fn run_ocr(&self, content: &[u8], format: DocumentFormat) -> Result<String, ProcessError> {
        let ocr = self
            .ocr
            .as_ref()
            .ok_or_else(|| ProcessError::OcrFailed("OCR is disabled".to_string()))?;

        let pages = self.rasterizer.rasterize(content, format)?;
        let mut all_text = String::new();
        let mut last_error = None;
        let mut recognized = 0usize;

        for (index, page) in pages.iter().enumerate() {
            match ocr.recognize(page, &self.language) {
                Ok(text) => {
                    all_text.push_str(&text);
                    all_text.push('\n');
                    recognized += 1;
                }
                Err(e) => {
                    warn!("OCR failed on page {}: {}", index + 1, e);
                    last_error = Some(e);
                }
            }
        }

        if recognized == 0 {
            return Err(last_error.unwrap_or_else(|| {
                ProcessError::OcrFailed("document rendered no pages".to_string())
            }));
        }

        Ok(all_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedNative {
        result: Result<String, String>,
        calls: AtomicUsize,
    }

    impl NativeTextSource for FixedNative {
        fn extract_text(&self, _: &[u8], _: DocumentFormat) -> Result<String, ProcessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(ProcessError::PdfProcessing)
        }
    }

    struct OnePage;

    impl PageRasterizer for OnePage {
        fn rasterize(&self, _: &[u8], _: DocumentFormat) -> Result<Vec<Vec<u8>>, ProcessError> {
            Ok(vec![b"page".to_vec()])
        }
    }

    struct FixedOcr {
        result: Result<String, String>,
        calls: AtomicUsize,
    }

    impl OcrEngine for FixedOcr {
        fn recognize(&self, _: &[u8], language: &str) -> Result<String, ProcessError> {
            assert_eq!(language, "eng");
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(ProcessError::OcrFailed)
        }
    }

    fn extractor(
        native: Result<&str, &str>,
        ocr: Result<&str, &str>,
    ) -> (TextExtractor, Arc<FixedNative>, Arc<FixedOcr>) {
        let native = Arc::new(FixedNative {
            result: native.map(str::to_string).map_err(str::to_string),
            calls: AtomicUsize::new(0),
        });
        let ocr = Arc::new(FixedOcr {
            result: ocr.map(str::to_string).map_err(str::to_string),
            calls: AtomicUsize::new(0),
        });
        let extractor = TextExtractor::new(
            native.clone(),
            Arc::new(OnePage),
            Some(ocr.clone() as Arc<dyn OcrEngine>),
            "eng",
        );
        (extractor, native, ocr)
    }

    #[test]
    fn test_threshold_49_invokes_ocr() {
        let text = "x".repeat(MIN_NATIVE_TEXT_CHARS - 1);
        let (ex, native, ocr) = extractor(Ok(&text), Ok("OCR TEXT"));
        ex.extract(b"%PDF", DocumentFormat::Pdf).unwrap();
        assert_eq!(native.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_threshold_50_skips_ocr() {
        let text = "x".repeat(MIN_NATIVE_TEXT_CHARS);
        let (ex, _native, ocr) = extractor(Ok(&text), Ok("OCR TEXT"));
        let result = ex.extract(b"%PDF", DocumentFormat::Pdf).unwrap();
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.method, ExtractionMethod::Native);
        assert_eq!(result.text, text);
    }

    #[test]
    fn test_whitespace_does_not_count_toward_threshold() {
        let text = format!("{}{}", "a ".repeat(49), "\n\n\n\n");
        let (ex, _native, ocr) = extractor(Ok(&text), Ok("recognized"));
        ex.extract(b"%PDF", DocumentFormat::Pdf).unwrap();
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_longer_output_wins() {
        let (ex, _, _) = extractor(Ok("Wages 50000"), Ok("W"));
        let result = ex.extract(b"%PDF", DocumentFormat::Pdf).unwrap();
        assert_eq!(result.method, ExtractionMethod::Native);
        assert_eq!(result.text, "Wages 50000");

        let (ex, _, _) = extractor(Ok("W"), Ok("Wages 50000 Federal tax 5000"));
        let result = ex.extract(b"%PDF", DocumentFormat::Pdf).unwrap();
        assert_eq!(result.method, ExtractionMethod::Ocr);
        assert!(result.text.contains("Federal tax"));
    }

    #[test]
    fn test_native_failure_falls_back_to_ocr() {
        let (ex, _, ocr) = extractor(Err("broken xref"), Ok("scanned text"));
        let result = ex.extract(b"%PDF", DocumentFormat::Pdf).unwrap();
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.method, ExtractionMethod::Ocr);
    }

    #[test]
    fn test_both_failing_is_an_error() {
        let (ex, _, _) = extractor(Err("broken xref"), Err("no engine"));
        let err = ex.extract(b"%PDF", DocumentFormat::Pdf).unwrap_err();
        assert!(matches!(err, ProcessError::OcrFailed(_)));
    }

    #[test]
    fn test_short_native_survives_ocr_failure() {
        let (ex, _, _) = extractor(Ok("W-2 2025"), Err("no engine"));
        let result = ex.extract(b"%PDF", DocumentFormat::Pdf).unwrap();
        assert_eq!(result.text, "W-2 2025");
    }

    #[test]
    fn test_empty_everything_is_an_error() {
        let (ex, _, _) = extractor(Ok("   "), Ok("\n"));
        let err = ex.extract(b"%PDF", DocumentFormat::Pdf).unwrap_err();
        assert!(matches!(err, ProcessError::NoText(_)));
    }

    #[test]
    fn test_ocr_disabled() {
        let native = Arc::new(FixedNative {
            result: Ok(String::new()),
            calls: AtomicUsize::new(0),
        });
        let ex = TextExtractor::new(native, Arc::new(OnePage), None, "eng");
        let err = ex.extract(b"%PDF", DocumentFormat::Pdf).unwrap_err();
        assert!(err.to_string().contains("OCR is disabled"));
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(
            DocumentFormat::detect(b"%PDF-1.5\n...", None),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(
            DocumentFormat::detect(b"\x89PNG\r\n\x1a\n0000", Some("scan.bin")),
            Some(DocumentFormat::Image)
        );
        assert_eq!(
            DocumentFormat::detect(b"Employer: Acme", Some("w2.txt")),
            Some(DocumentFormat::Text)
        );
        assert_eq!(
            DocumentFormat::detect(b"garbage", Some("w2.PDF")),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(DocumentFormat::detect(b"garbage", Some("w2.xyz")), None);
        assert_eq!(DocumentFormat::detect(b"garbage", None), None);
    }
}
