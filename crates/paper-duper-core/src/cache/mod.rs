//! Persistent signature cache.
//!
//! Signatures live in a SQLite table under the cache directory, fronted by an
//! in-memory LRU. An entry is only served while the file's size and
//! modification time still match what was recorded; anything else is a miss
//! and the stale entry is dropped.
//!
//! All state sits behind one mutex. Signatures are computed outside of it, so
//! a slow PDF never blocks lookups for other files.

pub mod store;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::Error;
use crate::hasher::PerceptualHash;
use crate::signature::{modified_ns, SignatureBuilder};
use store::{path_key, CacheStore};

pub const CACHE_DB_NAME: &str = "pdf_cache.db";

/// Inserts between two automatic cleanup passes.
const CLEANUP_EVERY: u32 = 256;

/// Everything the grouping engine needs to know about one PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSignature {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub modified_ns: i64,
    pub content_hash: String,
    pub perceptual_hash: Option<PerceptualHash>,
    pub text_hash: Option<String>,
    pub normalized_text: Option<String>,
    pub page_count: u32,
}

impl FileSignature {
    pub fn matches_metadata(&self, metadata: &fs::Metadata) -> bool {
        self.size_bytes == metadata.len() && self.modified_ns == modified_ns(metadata)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub signature: FileSignature,
    pub access_count: u64,
    pub last_access_ms: i64,
    pub cache_time_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub persistent_entries: u64,
    pub valid_entries: u64,
    pub memory_entries: usize,
    pub total_accesses: u64,
    pub cache_size_bytes: u64,
    pub cache_dir: PathBuf,
    pub max_cache_size: usize,
    pub cache_ttl_days: u64,
    pub memory_cache_size: usize,
    pub enabled: bool,
    pub degraded: bool,
}

struct CacheState {
    store: Option<CacheStore>,
    memory: Option<LruCache<PathBuf, CacheEntry>>,
    inserts_since_cleanup: u32,
    degraded: bool,
}

impl CacheState {
    fn disabled(degraded: bool) -> Self {
        Self {
            store: None,
            memory: None,
            inserts_since_cleanup: 0,
            degraded,
        }
    }

    /// Drop to "always recompute" after a store failure, warning only once.
    fn degrade(&mut self, operation: &str, err: &rusqlite::Error) {
        if !self.degraded {
            warn!(
                "Hash cache {} failed, continuing without caching: {}",
                operation, err
            );
        }
        self.degraded = true;
        self.store = None;
        self.memory = None;
    }

    fn forget(&mut self, key: &Path) -> bool {
        let mut removed = self
            .memory
            .as_mut()
            .and_then(|memory| memory.pop(key))
            .is_some();
        if let Some(store) = &self.store {
            match store.delete(&path_key(key)) {
                Ok(deleted) => removed |= deleted,
                Err(e) => self.degrade("delete", &e),
            }
        }
        removed
    }
}

pub struct HashCache {
    config: CacheConfig,
    builder: SignatureBuilder,
    state: Mutex<CacheState>,
}

impl HashCache {
    /// Open (or create) the cache under `config.cache_dir`.
    ///
    /// Never fails: if the database cannot be opened the cache logs a warning
    /// and every lookup becomes a miss.
    pub fn open(config: CacheConfig, builder: SignatureBuilder) -> Self {
        if !config.enable_hash_cache {
            debug!("Hash cache disabled by configuration");
            return Self {
                config,
                builder,
                state: Mutex::new(CacheState::disabled(false)),
            };
        }

        let opened = fs::create_dir_all(&config.cache_dir)
            .map_err(|e| e.to_string())
            .and_then(|_| {
                CacheStore::open(&config.cache_dir.join(CACHE_DB_NAME)).map_err(|e| e.to_string())
            });

        let state = match opened {
            Ok(store) => CacheState {
                store: Some(store),
                memory: NonZeroUsize::new(config.memory_cache_size).map(LruCache::new),
                inserts_since_cleanup: 0,
                degraded: false,
            },
            Err(e) => {
                warn!(
                    "Could not open hash cache in {}, continuing without caching: {}",
                    config.cache_dir.display(),
                    e
                );
                CacheState::disabled(true)
            }
        };

        let cache = Self {
            config,
            builder,
            state: Mutex::new(state),
        };
        let purged = cache.cleanup();
        if purged > 0 {
            info!("Hash cache startup cleanup removed {} entries", purged);
        }
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn builder(&self) -> &SignatureBuilder {
        &self.builder
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry, now_ms: i64) -> bool {
        now_ms.saturating_sub(entry.cache_time_ms) >= self.config.ttl_ms()
    }

    /// Look up a still-valid entry for `path`.
    ///
    /// An entry whose file vanished, changed size or mtime, or outlived the
    /// TTL is removed and reported as a miss.
    pub fn get(&self, path: &Path) -> Option<CacheEntry> {
        let key = cache_key(path);
        let metadata = fs::metadata(&key).ok();
        let now_ms = now_ms();

        let mut state = self.lock();
        if state.store.is_none() && state.memory.is_none() {
            return None;
        }

        let candidate = match state.memory.as_mut().and_then(|m| m.get(&key).cloned()) {
            Some(entry) => Some(entry),
            None => match state.store.as_ref().map(|s| s.load(&path_key(&key))) {
                Some(Ok(found)) => found,
                Some(Err(e)) => {
                    state.degrade("lookup", &e);
                    None
                }
                None => None,
            },
        };

        let mut entry = candidate?;
        let fresh = !self.is_expired(&entry, now_ms);
        let valid = metadata
            .as_ref()
            .is_some_and(|m| entry.signature.matches_metadata(m));

        if !fresh || !valid {
            debug!(
                "Dropping {} cache entry for {}",
                if fresh { "stale" } else { "expired" },
                key.display()
            );
            state.forget(&key);
            return None;
        }

        entry.access_count += 1;
        entry.last_access_ms = now_ms;
        if let Some(store) = &state.store {
            if let Err(e) = store.touch(&path_key(&key), now_ms) {
                state.degrade("touch", &e);
            }
        }
        if let Some(memory) = state.memory.as_mut() {
            memory.put(key, entry.clone());
        }
        Some(entry)
    }

    /// Return the cached entry for `path` or compute and store a new one.
    /// With `force` the signature is always recomputed.
    pub fn put_or_refresh(&self, path: &Path, force: bool) -> Result<CacheEntry, Error> {
        let key = cache_key(path);
        if !force {
            if let Some(entry) = self.get(&key) {
                return Ok(entry);
            }
        }

        let signature = self.builder.compute(&key)?;
        let now_ms = now_ms();
        let entry = CacheEntry {
            signature,
            access_count: 0,
            last_access_ms: now_ms,
            cache_time_ms: now_ms,
        };

        let mut state = self.lock();
        if let Some(store) = &state.store {
            let written = store
                .upsert(&entry)
                .and_then(|_| store.enforce_capacity(self.config.max_cache_size));
            match written {
                Ok(evicted) => {
                    if let Some(memory) = state.memory.as_mut() {
                        for victim in evicted {
                            memory.pop(Path::new(&victim));
                        }
                    }
                }
                Err(e) => state.degrade("insert", &e),
            }
        }
        if let Some(memory) = state.memory.as_mut() {
            memory.put(key, entry.clone());
        }

        state.inserts_since_cleanup += 1;
        if state.inserts_since_cleanup >= CLEANUP_EVERY {
            self.cleanup_locked(&mut state, now_ms);
        }

        Ok(entry)
    }

    pub fn remove(&self, path: &Path) -> bool {
        let key = cache_key(path);
        self.lock().forget(&key)
    }

    /// Drop every entry. Returns the number of persistent rows removed.
    pub fn clear_all(&self) -> usize {
        let mut state = self.lock();
        if let Some(memory) = state.memory.as_mut() {
            memory.clear();
        }
        let removed = match state.store.as_ref().map(|s| s.clear()) {
            Some(Ok(n)) => n,
            Some(Err(e)) => {
                state.degrade("clear", &e);
                0
            }
            None => 0,
        };
        info!("Hash cache cleared ({} entries)", removed);
        removed
    }

    /// Purge expired entries and trim to `max_cache_size`. Returns the
    /// number of persistent rows removed.
    pub fn cleanup(&self) -> usize {
        let mut state = self.lock();
        self.cleanup_locked(&mut state, now_ms())
    }

    fn cleanup_locked(&self, state: &mut CacheState, now_ms: i64) -> usize {
        state.inserts_since_cleanup = 0;

        let cutoff = now_ms.saturating_sub(self.config.ttl_ms());
        if let Some(memory) = state.memory.as_mut() {
            let expired: Vec<PathBuf> = memory
                .iter()
                .filter(|(_, entry)| entry.cache_time_ms <= cutoff)
                .map(|(path, _)| path.clone())
                .collect();
            for path in expired {
                memory.pop(&path);
            }
        }

        let Some(store) = &state.store else {
            return 0;
        };
        let purged = store.purge_expired(cutoff).and_then(|mut removed| {
            removed.extend(store.enforce_capacity(self.config.max_cache_size)?);
            Ok(removed)
        });

        match purged {
            Ok(removed) => {
                if let Some(memory) = state.memory.as_mut() {
                    for path in &removed {
                        memory.pop(Path::new(path));
                    }
                }
                if !removed.is_empty() {
                    debug!("Cache cleanup removed {} entries", removed.len());
                }
                removed.len()
            }
            Err(e) => {
                state.degrade("cleanup", &e);
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let mut state = self.lock();
        let cutoff = now_ms().saturating_sub(self.config.ttl_ms());

        let counts = state.store.as_ref().map(|store| {
            let persistent = store.count()?;
            let valid = store.count_fresh(cutoff)?;
            let accesses = store.total_accesses()?;
            Ok::<_, rusqlite::Error>((persistent, valid, accesses, store.file_size_bytes()))
        });
        let (persistent_entries, valid_entries, total_accesses, cache_size_bytes) = match counts {
            Some(Ok(counts)) => counts,
            Some(Err(e)) => {
                state.degrade("stats", &e);
                (0, 0, 0, 0)
            }
            None => (0, 0, 0, 0),
        };

        CacheStats {
            persistent_entries,
            valid_entries,
            memory_entries: state.memory.as_ref().map_or(0, |m| m.len()),
            total_accesses,
            cache_size_bytes,
            cache_dir: self.config.cache_dir.clone(),
            max_cache_size: self.config.max_cache_size,
            cache_ttl_days: self.config.cache_ttl_days,
            memory_cache_size: self.config.memory_cache_size,
            enabled: self.config.enable_hash_cache,
            degraded: state.degraded,
        }
    }

    /// Whether signatures are actually being persisted.
    pub fn is_available(&self) -> bool {
        self.lock().store.is_some()
    }
}

fn cache_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
