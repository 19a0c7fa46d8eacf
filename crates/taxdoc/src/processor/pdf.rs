use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info_span, warn};

use crate::error::ProcessError;
use crate::processor::{DocumentFormat, NativeTextSource, PageRasterizer};

/// Pattern emitted by lopdf for CID fonts it cannot decode.
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Text-layer extraction: lopdf for PDFs, UTF-8 decoding for plain text.
/// Raster images have no text layer and yield an empty string.
#[derive(Debug, Default, Clone)]
pub struct LopdfTextSource;

impl LopdfTextSource {
    pub fn new() -> Self {
        Self
    }
}

impl NativeTextSource for LopdfTextSource {
    fn extract_text(&self, content: &[u8], format: DocumentFormat) -> Result<String, ProcessError> {
        match format {
            DocumentFormat::Pdf => {
                let _span = info_span!("processor.pdf").entered();
                let doc = lopdf::Document::load_mem(content)
                    .map_err(|e| ProcessError::PdfProcessing(format!("Failed to load PDF: {}", e)))?;
                Ok(strip_undecodable_markers(&extract_text_from_pdf(&doc)))
            }
            DocumentFormat::Text => Ok(String::from_utf8_lossy(content).into_owned()),
            DocumentFormat::Image => Ok(String::new()),
        }
    }
}

fn extract_text_from_pdf(doc: &lopdf::Document) -> String {
    let mut text = String::new();

    for (page_num, _) in doc.get_pages() {
        if let Ok(page_text) = doc.extract_text(&[page_num]) {
            text.push_str(&page_text);
            text.push('\n');
        }
    }

    text
}

/// Drops lopdf's placeholder for undecodable glyph runs so it cannot pass
/// for real content when measuring extracted text.
fn strip_undecodable_markers(text: &str) -> String {
    text.replace(IDENTITY_H_PATTERN, "")
}

/// Renders PDF pages to PNG through poppler's `pdftoppm`.
/// Images pass through unchanged as a single page.
#[derive(Debug, Clone)]
pub struct PopplerRasterizer {
    dpi: u32,
}

impl PopplerRasterizer {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }
}

impl PageRasterizer for PopplerRasterizer {
    fn rasterize(
        &self,
        content: &[u8],
        format: DocumentFormat,
    ) -> Result<Vec<Vec<u8>>, ProcessError> {
        match format {
            DocumentFormat::Image => Ok(vec![content.to_vec()]),
            DocumentFormat::Pdf => render_pdf_pages(content, self.dpi),
            DocumentFormat::Text => Err(ProcessError::UnsupportedFormat(
                "plain text has no pages to rasterize".to_string(),
            )),
        }
    }
}

/// Removes the scratch directory when dropped.
struct ScratchDir(PathBuf);

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn render_pdf_pages(pdf_bytes: &[u8], dpi: u32) -> Result<Vec<Vec<u8>>, ProcessError> {
    let _span = info_span!("processor.rasterize", dpi).entered();

    let scratch = ScratchDir(std::env::temp_dir().join(format!("taxdoc_render_{}", uuid::Uuid::new_v4())));
    std::fs::create_dir_all(&scratch.0)
        .map_err(|e| ProcessError::Rasterize(format!("Failed to create scratch directory: {}", e)))?;

    let pdf_path = scratch.0.join("input.pdf");
    std::fs::write(&pdf_path, pdf_bytes)
        .map_err(|e| ProcessError::Rasterize(format!("Failed to write temp PDF: {}", e)))?;

    let output_prefix = scratch.0.join("page");
    let output = Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(&pdf_path)
        .arg(&output_prefix)
        .output()
        .map_err(|e| {
            ProcessError::Rasterize(format!(
                "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                e
            ))
        })?;

    if !output.status.success() {
        return Err(ProcessError::Rasterize(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let mut pages = collect_page_images(&scratch.0)?;
    pages.sort_by_key(|(number, _)| *number);

    let mut images = Vec::with_capacity(pages.len());
    for (number, path) in pages {
        match std::fs::read(&path) {
            Ok(bytes) => images.push(bytes),
            Err(e) => warn!("Failed to read rendered page {}: {}", number, e),
        }
    }

    Ok(images)
}

/// pdftoppm names pages `page-1.png`, `page-01.png` or `page-001.png`
/// depending on page count.
fn collect_page_images(dir: &Path) -> Result<Vec<(u32, PathBuf)>, ProcessError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| ProcessError::Rasterize(format!("Failed to list rendered pages: {}", e)))?;

    let mut pages = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if let Some(number) = page_number(&path) {
            pages.push((number, path));
        }
    }
    Ok(pages)
}

fn page_number(path: &Path) -> Option<u32> {
    if path.extension().and_then(|e| e.to_str()) != Some("png") {
        return None;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix("page-"))
        .and_then(|n| n.parse().ok())
}
