//! PDF introspection.
//!
//! The engine only needs three things from a PDF: its page count, the text of
//! its pages, and a raster of one page. [`PdfBackend`] is that capability;
//! [`PdfiumLopdfBackend`] is the production implementation and tests swap in
//! their own.

pub mod bounded;
mod pdfium_lopdf;

pub use bounded::{run_bounded, Bounded};
pub use pdfium_lopdf::PdfiumLopdfBackend;

use image::DynamicImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PdfError {
    #[error("failed to open PDF: {0}")]
    Open(String),

    #[error("PDF is encrypted")]
    Encrypted,

    #[error("PDF has no pages")]
    NoPages,

    #[error("page {index} out of range ({page_count} pages)")]
    PageOutOfRange { index: u16, page_count: u32 },

    #[error("text extraction failed: {0}")]
    Text(String),

    #[error("rendering failed: {0}")]
    Render(String),

    #[error("PDF renderer unavailable: {0}")]
    RendererUnavailable(String),
}

/// Document-level facts about a PDF.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfInfo {
    pub page_count: u32,
    pub title: Option<String>,
    pub author: Option<String>,
    pub producer: Option<String>,
}

/// Text of a PDF, one string per extracted page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdfText {
    /// Total pages in the document, which may exceed `pages.len()` when the
    /// extraction was budgeted.
    pub page_count: u32,
    pub pages: Vec<String>,
}

impl PdfText {
    pub fn joined(&self) -> String {
        self.pages.join("\n")
    }
}

pub trait PdfBackend: Send + Sync {
    fn inspect(&self, path: &Path) -> Result<PdfInfo, PdfError>;

    /// Extract text from at most `max_pages` pages, starting at the first.
    fn extract_text(&self, path: &Path, max_pages: u32) -> Result<PdfText, PdfError>;

    /// Rasterize a single page (0-based) at the requested resolution.
    fn render_page(&self, path: &Path, page_index: u16, dpi: u32)
        -> Result<DynamicImage, PdfError>;
}
