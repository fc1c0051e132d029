#![allow(dead_code)]

use image::{DynamicImage, Rgb, RgbImage};
use paper_duper_core::cache::HashCache;
use paper_duper_core::config::{CacheConfig, SignatureConfig};
use paper_duper_core::pdf::{PdfBackend, PdfError, PdfInfo, PdfText};
use paper_duper_core::{DuplicateGroup, ProgressReporter, SignatureBuilder};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// First-page rasters the fake can produce. Ascending and descending
/// gradients have opposite difference hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Raster {
    Ascending,
    Descending,
}

impl Raster {
    pub fn render(self) -> DynamicImage {
        let (width, height) = (180u32, 240u32);
        let img = RgbImage::from_fn(width, height, |x, _| {
            let v = ((x * 255) / (width - 1)) as u8;
            match self {
                Raster::Ascending => Rgb([v, v, v]),
                Raster::Descending => Rgb([255 - v, 255 - v, 255 - v]),
            }
        });
        DynamicImage::ImageRgb8(img)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeDoc {
    pub text: Option<String>,
    pub raster: Option<Raster>,
    pub hang_text: bool,
    pub pages: u32,
}

impl FakeDoc {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            pages: 1,
            ..Self::default()
        }
    }

    pub fn image(raster: Raster) -> Self {
        Self {
            raster: Some(raster),
            pages: 1,
            ..Self::default()
        }
    }

    pub fn hanging(raster: Raster) -> Self {
        Self {
            raster: Some(raster),
            hang_text: true,
            pages: 1,
            ..Self::default()
        }
    }
}

/// Test double for the PDF layer, keyed by file name. Unknown files behave
/// like unreadable PDFs.
#[derive(Default)]
pub struct FakeBackend {
    docs: Mutex<HashMap<String, FakeDoc>>,
    pub text_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, name: &str, doc: FakeDoc) -> Self {
        self.docs.lock().unwrap().insert(name.to_string(), doc);
        self
    }

    pub fn insert(&self, name: &str, doc: FakeDoc) {
        self.docs.lock().unwrap().insert(name.to_string(), doc);
    }

    fn doc(&self, path: &Path) -> Result<FakeDoc, PdfError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.docs
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .ok_or_else(|| PdfError::Open(format!("unknown document {}", name)))
    }
}

impl PdfBackend for FakeBackend {
    fn inspect(&self, path: &Path) -> Result<PdfInfo, PdfError> {
        let doc = self.doc(path)?;
        Ok(PdfInfo {
            page_count: doc.pages,
            ..PdfInfo::default()
        })
    }

    fn extract_text(&self, path: &Path, _max_pages: u32) -> Result<PdfText, PdfError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        let doc = self.doc(path)?;
        if doc.hang_text {
            thread::sleep(Duration::from_secs(30));
        }
        match doc.text {
            Some(text) => Ok(PdfText {
                page_count: doc.pages,
                pages: vec![text],
            }),
            None => Err(PdfError::Text("no text layer".to_string())),
        }
    }

    fn render_page(&self, path: &Path, _page_index: u16, _dpi: u32) -> Result<DynamicImage, PdfError> {
        match self.doc(path)?.raster {
            Some(raster) => Ok(raster.render()),
            None => Err(PdfError::Render("blank page".to_string())),
        }
    }
}

pub fn write_pdf(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

pub fn fast_signature_config() -> SignatureConfig {
    SignatureConfig {
        extraction_timeout_secs: 1,
        render_timeout_secs: 5,
        ..SignatureConfig::default()
    }
}

pub fn cache_config(cache_dir: &Path) -> CacheConfig {
    CacheConfig {
        cache_dir: cache_dir.to_path_buf(),
        ..CacheConfig::default()
    }
}

pub fn open_cache(cache_dir: &Path, backend: Arc<FakeBackend>) -> Arc<HashCache> {
    open_cache_with(cache_config(cache_dir), backend)
}

pub fn open_cache_with(config: CacheConfig, backend: Arc<FakeBackend>) -> Arc<HashCache> {
    let builder = SignatureBuilder::new(backend, fast_signature_config());
    Arc::new(HashCache::open(config, builder))
}

/// Records every callback; optionally trips a cancel token once
/// `cancel_after` files have been reported.
#[derive(Default)]
pub struct RecordingReporter {
    pub progress: Mutex<Vec<(usize, usize)>>,
    pub statuses: Mutex<Vec<String>>,
    pub completed: Mutex<Option<Vec<DuplicateGroup>>>,
    pub errors: Mutex<Vec<String>>,
    pub cancel_after: Option<(usize, Arc<AtomicBool>)>,
}

impl RecordingReporter {
    pub fn cancelling_after(count: usize, token: Arc<AtomicBool>) -> Self {
        Self {
            cancel_after: Some((count, token)),
            ..Self::default()
        }
    }
}

impl ProgressReporter for RecordingReporter {
    fn on_progress(&self, current: usize, total: usize, _path: &str) {
        self.progress.lock().unwrap().push((current, total));
        if let Some((count, token)) = &self.cancel_after {
            if current >= *count {
                token.store(true, Ordering::SeqCst);
            }
        }
    }

    fn on_status(&self, message: &str) {
        self.statuses.lock().unwrap().push(message.to_string());
    }

    fn on_complete(&self, groups: &[DuplicateGroup]) {
        *self.completed.lock().unwrap() = Some(groups.to_vec());
    }

    fn on_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_string());
    }
}
