use std::fs::{self, Metadata};
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

use crate::cache::FileSignature;
use crate::config::SignatureConfig;
use crate::error::Error;
use crate::hasher::{self, text, TextOutcome};
use crate::pdf::{run_bounded, Bounded, PdfBackend, PdfError, PdfiumLopdfBackend};

/// Computes [`FileSignature`]s: content hash always, text and page-1
/// perceptual hash when the PDF cooperates.
#[derive(Clone)]
pub struct SignatureBuilder {
    backend: Arc<dyn PdfBackend>,
    config: SignatureConfig,
}

impl SignatureBuilder {
    pub fn new(backend: Arc<dyn PdfBackend>, config: SignatureConfig) -> Self {
        Self { backend, config }
    }

    /// Builder backed by lopdf and PDFium.
    pub fn with_default_backend(config: SignatureConfig) -> Self {
        let backend = PdfiumLopdfBackend::with_library_dir(&config.pdfium_dir)
            .with_render_wait(config.render_timeout());
        Self::new(Arc::new(backend), config)
    }

    pub fn config(&self) -> &SignatureConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn PdfBackend> {
        &self.backend
    }

    /// Only I/O failures on the file itself are errors. Anything the PDF
    /// layer cannot do leaves the corresponding field empty.
    pub fn compute(&self, path: &Path) -> Result<FileSignature, Error> {
        let metadata = fs::metadata(path)?;
        let content_hash = hasher::hash_file(path)?;

        let mut page_count = None;
        let mut text_hung = false;
        let (normalized_text, text_hash) = if self.config.enable_text {
            match text::extract_and_normalize(&self.backend, path, &self.config.text_options()) {
                TextOutcome::Extracted { text, page_count: pages } => {
                    page_count = Some(pages);
                    let hash = text::text_hash(&text);
                    (Some(text), Some(hash))
                }
                TextOutcome::TimedOut => {
                    text_hung = true;
                    warn!(
                        "Text extraction timed out after {}s for {}",
                        self.config.extraction_timeout_secs,
                        path.display()
                    );
                    (None, None)
                }
                TextOutcome::Failed(reason) => {
                    debug!("No text for {}: {}", path.display(), reason);
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let perceptual_hash = self.first_page_hash(path);

        // A document that hung in extraction would hang again while loading
        // for inspection.
        let page_count = match page_count {
            Some(count) => count,
            None if text_hung => 0,
            None => self.inspected_page_count(path),
        };

        Ok(FileSignature {
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            modified_ns: modified_ns(&metadata),
            content_hash,
            perceptual_hash,
            text_hash,
            normalized_text,
            page_count,
        })
    }

    fn inspected_page_count(&self, path: &Path) -> u32 {
        let backend = Arc::clone(&self.backend);
        let owned_path = path.to_path_buf();

        let inspected = run_bounded("inspect", self.config.text_options().timeout, move || {
            backend.inspect(&owned_path)
        });

        match inspected {
            Bounded::Finished(Ok(info)) => info.page_count,
            Bounded::Finished(Err(e)) => {
                debug!("No page count for {}: {}", path.display(), e);
                0
            }
            Bounded::TimedOut => {
                warn!(
                    "Inspection timed out after {}s for {}",
                    self.config.extraction_timeout_secs,
                    path.display()
                );
                0
            }
            Bounded::Abandoned => 0,
        }
    }

    fn first_page_hash(&self, path: &Path) -> Option<hasher::PerceptualHash> {
        let backend = Arc::clone(&self.backend);
        let owned_path = path.to_path_buf();
        let dpi = self.config.dpi;

        let rendered = run_bounded("render", self.config.render_timeout(), move || {
            backend.render_page(&owned_path, 0, dpi)
        });

        match rendered {
            Bounded::Finished(Ok(image)) => {
                Some(hasher::hash_page_image(&image, self.config.hash_size))
            }
            Bounded::Finished(Err(PdfError::RendererUnavailable(_))) => None,
            Bounded::Finished(Err(e)) => {
                debug!("No page image for {}: {}", path.display(), e);
                None
            }
            Bounded::TimedOut => {
                warn!(
                    "Rendering timed out after {}s for {}",
                    self.config.render_timeout_secs,
                    path.display()
                );
                None
            }
            Bounded::Abandoned => {
                warn!("Render worker died for {}", path.display());
                None
            }
        }
    }
}

/// Modification time in nanoseconds since the Unix epoch, negative for
/// timestamps before it and 0 when the platform does not report one.
pub fn modified_ns(metadata: &Metadata) -> i64 {
    match metadata.modified() {
        Ok(time) => match time.duration_since(UNIX_EPOCH) {
            Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
            Err(before) => -i64::try_from(before.duration().as_nanos()).unwrap_or(i64::MAX),
        },
        Err(_) => 0,
    }
}
