pub mod actions;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod grouping;
pub mod hasher;
pub mod pdf;
pub mod progress;
pub mod scanner;
pub mod signature;

pub use cache::{CacheEntry, CacheStats, FileSignature, HashCache};
pub use config::{AppConfig, CacheConfig, ScanConfig, SignatureConfig};
pub use engine::{ScanEngine, ScanReport, ScanState};
pub use error::Error;
pub use grouping::{DuplicateGroup, GroupMember, MatchMethod};
pub use progress::{ProgressReporter, SilentReporter};
pub use signature::SignatureBuilder;
