use std::io::Cursor;

use crate::error::ProcessError;
use crate::processor::OcrEngine;

/// Tesseract-backed OCR through leptess.
#[derive(Debug, Default, Clone)]
pub struct TesseractEngine;

impl TesseractEngine {
    pub fn new() -> Self {
        Self
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(&self, image_data: &[u8], language: &str) -> Result<String, ProcessError> {
        let _span = tracing::info_span!("processor.ocr", language).entered();

        let img = image::load_from_memory(image_data)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to load image: {}", e)))?;

        // leptess only reads encoded images, so normalize to PNG in memory
        let mut png_data = Vec::new();
        img.write_to(&mut Cursor::new(&mut png_data), image::ImageFormat::Png)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to convert image: {}", e)))?;

        let mut lt = leptess::LepTess::new(None, language).map_err(|e| {
            ProcessError::OcrFailed(format!("Failed to initialize Tesseract: {}", e))
        })?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| ProcessError::OcrFailed(format!("Failed to set image for OCR: {}", e)))?;

        lt.get_utf8_text()
            .map_err(|e| ProcessError::OcrFailed(format!("OCR failed: {}", e)))
    }
}
