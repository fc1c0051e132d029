use rayon::prelude::*;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::{FileSignature, HashCache};
use crate::config::ScanConfig;
use crate::error::Error;
use crate::grouping::{self, DuplicateGroup};
use crate::progress::{ProgressReporter, ProgressThrottle};
use crate::scanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanState {
    Idle,
    Scanning,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub groups: Vec<DuplicateGroup>,
    pub files_found: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub cache_hits: usize,
    pub scan_duration: Duration,
    pub signature_duration: Duration,
    pub grouping_duration: Duration,
    pub wasted_bytes: u64,
}

impl ScanReport {
    pub fn duplicate_files(&self) -> usize {
        self.groups.iter().map(|g| g.duplicates().len()).sum()
    }
}

enum FileOutcome {
    Hit(FileSignature),
    Computed(FileSignature),
    Failed,
    Skipped,
}

pub struct ScanEngine {
    config: ScanConfig,
    cache: Arc<HashCache>,
    cancel: Arc<AtomicBool>,
    state: Mutex<ScanState>,
}

impl ScanEngine {
    pub fn new(config: ScanConfig, cache: Arc<HashCache>) -> Self {
        Self {
            config,
            cache,
            cancel: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(ScanState::Idle),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn state(&self) -> ScanState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask a running scan to stop before its next file. The flag is cleared
    /// when the next scan starts.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ScanState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn begin(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == ScanState::Scanning {
            return Err(Error::InvalidArgument(
                "a scan is already running on this engine".to_string(),
            ));
        }
        *state = ScanState::Scanning;
        self.cancel.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Run the whole pipeline on the calling thread:
    /// 1. Enumerate candidate PDFs under the root
    /// 2. Fetch or compute a signature for each (parallel, cached)
    /// 3. Group signatures into duplicate clusters
    pub fn scan(&self, reporter: &dyn ProgressReporter) -> Result<ScanReport, Error> {
        self.begin()?;
        self.execute(reporter)
    }

    /// Run [`scan`](Self::scan) on a dedicated worker thread.
    pub fn spawn(
        self: Arc<Self>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<JoinHandle<Result<ScanReport, Error>>, Error> {
        self.begin()?;
        let engine = Arc::clone(&self);
        let handle = thread::Builder::new()
            .name("paper-duper-scan".to_string())
            .spawn(move || engine.execute(reporter.as_ref()));

        match handle {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.set_state(ScanState::Failed);
                Err(e.into())
            }
        }
    }

    fn execute(&self, reporter: &dyn ProgressReporter) -> Result<ScanReport, Error> {
        match self.run(reporter) {
            Ok(report) => {
                self.set_state(ScanState::Completed);
                reporter.on_complete(&report.groups);
                Ok(report)
            }
            Err(Error::Cancelled) => {
                info!("Scan cancelled");
                self.set_state(ScanState::Cancelled);
                reporter.on_status("Scan cancelled");
                Err(Error::Cancelled)
            }
            Err(e) => {
                error!("Scan failed: {}", e);
                self.set_state(ScanState::Failed);
                reporter.on_error(&e.to_string());
                Err(e)
            }
        }
    }

    fn run(&self, reporter: &dyn ProgressReporter) -> Result<ScanReport, Error> {
        self.config.validate()?;
        let filter = self.config.filter.compile()?;

        // Phase 1: Enumerate
        info!("Scanning {} for PDF files...", self.config.root.display());
        reporter.on_status("Scanning for PDF files...");
        let scan_start = Instant::now();
        let candidates = scanner::collect_pdf_candidates(
            &self.config.root,
            self.config.recursive,
            &filter,
            &self.config.ignore_patterns,
        )?;
        let scan_duration = scan_start.elapsed();
        if candidates.is_empty() {
            return Err(Error::NoPdfFiles(self.config.root.clone()));
        }
        debug!(
            "Enumeration completed in {:.2}s: {} PDF files",
            scan_duration.as_secs_f64(),
            candidates.len()
        );
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Phase 2: Signatures
        info!("Computing signatures for {} files...", candidates.len());
        reporter.on_status(&format!("Processing {} PDF files...", candidates.len()));
        let signature_start = Instant::now();
        let outcomes = self.compute_signatures(&candidates, reporter)?;
        let signature_duration = signature_start.elapsed();
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut signatures = Vec::with_capacity(outcomes.len());
        let (mut cache_hits, mut files_failed) = (0usize, 0usize);
        for outcome in outcomes {
            match outcome {
                FileOutcome::Hit(sig) => {
                    cache_hits += 1;
                    signatures.push(sig);
                }
                FileOutcome::Computed(sig) => signatures.push(sig),
                FileOutcome::Failed => files_failed += 1,
                FileOutcome::Skipped => {}
            }
        }
        signatures.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(
            "Signatures completed in {:.2}s: {} ok ({} from cache), {} failed",
            signature_duration.as_secs_f64(),
            signatures.len(),
            cache_hits,
            files_failed
        );

        // Phase 3: Group
        info!("Comparing {} documents...", signatures.len());
        reporter.on_status(&format!("Comparing {} documents...", signatures.len()));
        let grouping_start = Instant::now();
        let options = self.config.grouping_options();
        let groups = panic::catch_unwind(AssertUnwindSafe(|| {
            grouping::group_duplicates(&signatures, &options)
        }))
        .map_err(|payload| {
            Error::Internal(format!("grouping panicked: {}", panic_message(&payload)))
        })?;
        let grouping_duration = grouping_start.elapsed();

        let wasted_bytes = groups.iter().map(|g| g.wasted_bytes()).sum();
        info!(
            "Found {} duplicate groups ({} bytes reclaimable) in {:.2}s",
            groups.len(),
            wasted_bytes,
            (scan_duration + signature_duration + grouping_duration).as_secs_f64()
        );

        Ok(ScanReport {
            groups,
            files_found: candidates.len(),
            files_processed: signatures.len(),
            files_failed,
            cache_hits,
            scan_duration,
            signature_duration,
            grouping_duration,
            wasted_bytes,
        })
    }

    fn compute_signatures(
        &self,
        candidates: &[PathBuf],
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<FileOutcome>, Error> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .thread_name(|i| format!("paper-duper-worker-{}", i))
            .build()
            .map_err(|e| Error::Internal(format!("unable to build worker pool: {}", e)))?;

        let total = candidates.len();
        let processed = AtomicUsize::new(0);
        let throttle = ProgressThrottle::new(self.config.progress_interval());

        let outcomes: Vec<FileOutcome> = pool.install(|| {
            candidates
                .par_iter()
                .map(|path| {
                    if self.is_cancelled() {
                        return FileOutcome::Skipped;
                    }
                    let outcome = self.process_file(path);
                    let current = processed.fetch_add(1, Ordering::SeqCst) + 1;
                    throttle.report(reporter, current, total, &path.to_string_lossy());
                    outcome
                })
                .collect()
        });

        Ok(outcomes)
    }

    fn process_file(&self, path: &Path) -> FileOutcome {
        if let Some(entry) = self.cache.get(path) {
            debug!("Cache hit for {}", path.display());
            return FileOutcome::Hit(entry.signature);
        }
        match self.cache.put_or_refresh(path, true) {
            Ok(entry) => {
                debug!("Computed signature for {}", path.display());
                FileOutcome::Computed(entry.signature)
            }
            Err(e) => {
                error!("Error processing {}: {}", path.display(), e);
                FileOutcome::Failed
            }
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        warn!("Grouping panicked with a non-string payload");
        "unknown panic".to_string()
    }
}
