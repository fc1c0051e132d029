use config::{Config, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;
use crate::grouping::GroupingOptions;
use crate::hasher::TextOptions;
use crate::scanner::FilterSpec;

const ENV_PREFIX: &str = "PAPER_DUPER";
const CACHE_DIR_NAME: &str = ".paper_duper_cache";

/// Everything the engine can be told, grouped by the component that reads it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub cache: CacheConfig,
    pub signature: SignatureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub root: PathBuf,
    pub recursive: bool,
    pub filter: FilterSpec,
    pub ignore_patterns: Vec<String>,
    pub threshold: f64,
    pub enable_text_compare: bool,
    /// Files whose sizes differ by more than this factor are never compared.
    pub size_ratio_limit: f64,
    /// Width of the band below `threshold` in which text gets a second look.
    pub ambiguity_margin: f64,
    pub workers: usize,
    pub progress_interval_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            recursive: true,
            filter: FilterSpec::default(),
            ignore_patterns: Vec::new(),
            threshold: 0.9,
            enable_text_compare: true,
            size_ratio_limit: 1.5,
            ambiguity_margin: 0.1,
            workers: default_workers(),
            progress_interval_ms: 100,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(Error::InvalidArgument(format!(
                "threshold must be within (0, 1], got {}",
                self.threshold
            )));
        }
        if self.workers == 0 {
            return Err(Error::InvalidArgument(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.size_ratio_limit < 1.0 {
            return Err(Error::InvalidArgument(format!(
                "size_ratio_limit must be at least 1.0, got {}",
                self.size_ratio_limit
            )));
        }
        if self.ambiguity_margin < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "ambiguity_margin must not be negative, got {}",
                self.ambiguity_margin
            )));
        }
        Ok(())
    }

    pub fn grouping_options(&self) -> GroupingOptions {
        GroupingOptions {
            threshold: self.threshold,
            enable_text_compare: self.enable_text_compare,
            size_ratio_limit: self.size_ratio_limit,
            ambiguity_margin: self.ambiguity_margin,
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    pub max_cache_size: usize,
    pub cache_ttl_days: u64,
    pub memory_cache_size: usize,
    pub enable_hash_cache: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_cache_size: 10_000,
            cache_ttl_days: 30,
            memory_cache_size: 1000,
            enable_hash_cache: true,
        }
    }
}

impl CacheConfig {
    pub fn ttl_ms(&self) -> i64 {
        let ms = self.cache_ttl_days.saturating_mul(24 * 60 * 60 * 1000);
        i64::try_from(ms).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    pub dpi: u32,
    pub hash_size: u32,
    pub min_token_len: usize,
    pub max_text_pages: u32,
    pub extraction_timeout_secs: u64,
    pub render_timeout_secs: u64,
    pub enable_text: bool,
    /// Directory searched for the PDFium shared library before the system paths.
    pub pdfium_dir: String,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            hash_size: 8,
            min_token_len: 3,
            max_text_pages: 50,
            extraction_timeout_secs: 30,
            render_timeout_secs: 30,
            enable_text: true,
            pdfium_dir: "./".to_string(),
        }
    }
}

impl SignatureConfig {
    pub fn text_options(&self) -> TextOptions {
        TextOptions {
            min_token_len: self.min_token_len,
            max_pages: self.max_text_pages,
            timeout: Duration::from_secs(self.extraction_timeout_secs),
        }
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }
}

fn default_workers() -> usize {
    num_cpus::get().clamp(1, 4)
}

fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CACHE_DIR_NAME)
}

/// Load `Config.toml` from the working directory (if present), then
/// `PAPER_DUPER__SECTION__KEY` environment variables on top.
pub fn load_configuration() -> Result<AppConfig, Error> {
    let config = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?
        .try_deserialize::<AppConfig>()?;
    Ok(config)
}

pub fn load_configuration_from(path: &Path) -> Result<AppConfig, Error> {
    let config = Config::builder()
        .add_source(ConfigFile::from(path).required(true))
        .build()?
        .try_deserialize::<AppConfig>()?;
    Ok(config)
}
