use image::{DynamicImage, RgbImage};
use lopdf::{Document, Object};
use pdfium_render::prelude::{PdfBitmapFormat, PdfRenderConfig, Pdfium};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{PdfBackend, PdfError, PdfInfo, PdfText};

const DEFAULT_RENDER_WAIT: Duration = Duration::from_secs(30);
const LOCK_POLL: Duration = Duration::from_millis(10);

enum Renderer {
    Unbound,
    Bound(Pdfium),
    Missing(String),
}

/// lopdf for structure and text, PDFium for rasterization.
///
/// PDFium is bound on the first render and reused afterwards; it only runs
/// one page at a time. A render that cannot get the renderer within
/// `render_wait` marks it wedged, and until the stuck render returns every
/// other render fails immediately instead of queueing behind it.
pub struct PdfiumLopdfBackend {
    library_dir: String,
    renderer: Mutex<Renderer>,
    render_wait: Duration,
    wedged: AtomicBool,
}

impl PdfiumLopdfBackend {
    pub fn new() -> Self {
        Self::with_library_dir("./")
    }

    /// Look for the PDFium shared library in `dir` before the system paths.
    pub fn with_library_dir(dir: &str) -> Self {
        Self {
            library_dir: dir.to_string(),
            renderer: Mutex::new(Renderer::Unbound),
            render_wait: DEFAULT_RENDER_WAIT,
            wedged: AtomicBool::new(false),
        }
    }

    /// How long a render waits for another one to finish before giving up.
    pub fn with_render_wait(mut self, wait: Duration) -> Self {
        self.render_wait = wait;
        self
    }

    fn load(path: &Path) -> Result<Document, PdfError> {
        let doc = Document::load(path).map_err(|e| PdfError::Open(e.to_string()))?;
        if doc.is_encrypted() {
            return Err(PdfError::Encrypted);
        }
        Ok(doc)
    }

    fn bind(&self) -> Result<Pdfium, String> {
        Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
            &self.library_dir,
        ))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| format!("{:?}", e))
    }
}

/// Lock `mutex`, waiting at most `wait`. Timing out sets `wedged`, after
/// which callers fail at once until the holder lets go.
fn acquire_within<'a, T>(
    mutex: &'a Mutex<T>,
    wait: Duration,
    wedged: &AtomicBool,
) -> Result<MutexGuard<'a, T>, PdfError> {
    let deadline = Instant::now() + wait;
    loop {
        match mutex.try_lock() {
            Ok(guard) => {
                wedged.store(false, Ordering::SeqCst);
                return Ok(guard);
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                wedged.store(false, Ordering::SeqCst);
                return Ok(poisoned.into_inner());
            }
            Err(TryLockError::WouldBlock) => {}
        }

        if wedged.load(Ordering::SeqCst) {
            return Err(PdfError::RendererUnavailable(
                "renderer is stuck on an earlier document".to_string(),
            ));
        }
        if Instant::now() >= deadline {
            wedged.store(true, Ordering::SeqCst);
            warn!(
                "PDF renderer busy for over {}s, skipping page images until it recovers",
                wait.as_secs()
            );
            return Err(PdfError::RendererUnavailable(
                "renderer is stuck on an earlier document".to_string(),
            ));
        }
        thread::sleep(LOCK_POLL);
    }
}

impl Default for PdfiumLopdfBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfBackend for PdfiumLopdfBackend {
    fn inspect(&self, path: &Path) -> Result<PdfInfo, PdfError> {
        let doc = Self::load(path)?;
        Ok(PdfInfo {
            page_count: doc.get_pages().len() as u32,
            title: info_field(&doc, b"Title"),
            author: info_field(&doc, b"Author"),
            producer: info_field(&doc, b"Producer"),
        })
    }

    fn extract_text(&self, path: &Path, max_pages: u32) -> Result<PdfText, PdfError> {
        let doc = Self::load(path)?;
        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        let page_count = page_numbers.len() as u32;

        let mut pages = Vec::new();
        for number in page_numbers.into_iter().take(max_pages as usize) {
            match doc.extract_text(&[number]) {
                Ok(text) => pages.push(text),
                // One unreadable content stream should not cost us the whole document.
                Err(e) => debug!("No text on page {} of {}: {}", number, path.display(), e),
            }
        }

        if pages.is_empty() && page_count > 0 && max_pages > 0 {
            return Err(PdfError::Text(format!(
                "no page of {} yielded text",
                path.display()
            )));
        }

        Ok(PdfText { page_count, pages })
    }

    fn render_page(
        &self,
        path: &Path,
        page_index: u16,
        dpi: u32,
    ) -> Result<DynamicImage, PdfError> {
        let mut renderer = acquire_within(&self.renderer, self.render_wait, &self.wedged)?;

        if matches!(*renderer, Renderer::Unbound) {
            *renderer = match self.bind() {
                Ok(pdfium) => Renderer::Bound(pdfium),
                Err(e) => {
                    warn!(
                        "PDFium library could not be loaded, perceptual hashing disabled: {}",
                        e
                    );
                    Renderer::Missing(e)
                }
            };
        }
        let pdfium = match &*renderer {
            Renderer::Bound(pdfium) => pdfium,
            Renderer::Missing(reason) => {
                return Err(PdfError::RendererUnavailable(reason.clone()))
            }
            Renderer::Unbound => {
                return Err(PdfError::RendererUnavailable("PDFium not bound".to_string()))
            }
        };
        let document = pdfium.load_pdf_from_file(path, None).map_err(|e| {
            let message = format!("{:?}", e);
            if message.contains("Password") {
                PdfError::Encrypted
            } else {
                PdfError::Open(message)
            }
        })?;

        let pages = document.pages();
        let page_count = pages.len() as u32;
        if page_count == 0 {
            return Err(PdfError::NoPages);
        }
        let page = pages.get(page_index).map_err(|_| PdfError::PageOutOfRange {
            index: page_index,
            page_count,
        })?;

        let target_width = ((page.width().value / 72.0) * dpi as f32).round().max(1.0) as i32;
        let render_config = PdfRenderConfig::new()
            .set_target_width(target_width)
            .render_form_data(false)
            .render_annotations(false)
            .set_reverse_byte_order(false)
            .set_format(PdfBitmapFormat::BGRA);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| PdfError::Render(format!("{:?}", e)))?;

        let width = bitmap.width().max(0) as usize;
        let height = bitmap.height().max(0) as usize;
        let raw = bitmap.as_raw_bytes();
        let stride = if height == 0 { 0 } else { raw.len() / height };

        let mut rgb = Vec::with_capacity(width.saturating_mul(height).saturating_mul(3));
        for y in 0..height {
            let base = y.saturating_mul(stride);
            for x in 0..width {
                let idx = base.saturating_add(x.saturating_mul(4));
                let b = raw.get(idx).copied().unwrap_or(255);
                let g = raw.get(idx + 1).copied().unwrap_or(255);
                let r = raw.get(idx + 2).copied().unwrap_or(255);
                rgb.extend_from_slice(&[r, g, b]);
            }
        }

        RgbImage::from_raw(width as u32, height as u32, rgb)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| PdfError::Render("bitmap size mismatch".to_string()))
    }
}

fn info_field(doc: &Document, key: &[u8]) -> Option<String> {
    let info = doc.trailer.get(b"Info").ok()?;
    let dict = match info {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_dict().ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    match dict.get(key).ok()? {
        Object::String(bytes, _) => {
            let value = String::from_utf8_lossy(bytes).trim().to_string();
            (!value.is_empty()).then_some(value)
        }
        _ => None,
    }
}
