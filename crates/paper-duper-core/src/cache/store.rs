use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{CacheEntry, FileSignature};
use crate::hasher::PerceptualHash;

const SCHEMA_VERSION: i64 = 1;

const SELECT_COLUMNS: &str = "SELECT path, size_bytes, modified_ns, content_hash, perceptual_hash, \
     text_hash, normalized_text, page_count, cache_time, access_count, last_access \
     FROM file_signature";

/// SQLite table of file signatures, keyed by path.
pub struct CacheStore {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl CacheStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = CacheStore {
            conn,
            db_path: Some(path.to_path_buf()),
        };
        store.configure_pragmas()?;
        store.migrate_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = CacheStore {
            conn,
            db_path: None,
        };
        store.configure_pragmas()?;
        store.migrate_schema()?;
        Ok(store)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -16000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("Cache pragmas configured (WAL mode, 16MB cache)");
        Ok(())
    }

    /// Any version other than the current one is dropped and rebuilt; the
    /// rows are recomputable so nothing is migrated.
    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version != SCHEMA_VERSION {
            debug!(
                "Cache schema version {} != {}, recreating",
                version, SCHEMA_VERSION
            );
            self.conn
                .execute_batch("DROP TABLE IF EXISTS file_signature;")?;
        }

        self.conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Fetch the row for `path`. A row that no longer decodes is deleted and
    /// reported as absent.
    pub fn load(&self, path: &str) -> Result<Option<CacheEntry>> {
        let sql = format!("{} WHERE path = ?1", SELECT_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![path], decode_row)
            .optional();

        match row {
            Ok(entry) => Ok(entry),
            Err(
                e @ (rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::IntegralValueOutOfRange(..)),
            ) => {
                warn!("Discarding undecodable cache row for {}: {}", path, e);
                self.delete(path)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        let sig = &entry.signature;
        self.conn.execute(
            "INSERT INTO file_signature (path, size_bytes, modified_ns, content_hash, \
             perceptual_hash, text_hash, normalized_text, page_count, cache_time, \
             access_count, last_access) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(path) DO UPDATE SET \
             size_bytes = excluded.size_bytes, modified_ns = excluded.modified_ns, \
             content_hash = excluded.content_hash, perceptual_hash = excluded.perceptual_hash, \
             text_hash = excluded.text_hash, normalized_text = excluded.normalized_text, \
             page_count = excluded.page_count, cache_time = excluded.cache_time, \
             access_count = excluded.access_count, last_access = excluded.last_access",
            params![
                path_key(&sig.path),
                sig.size_bytes as i64,
                sig.modified_ns,
                sig.content_hash,
                sig.perceptual_hash.as_ref().map(|h| h.as_bytes().to_vec()),
                sig.text_hash,
                sig.normalized_text,
                sig.page_count as i64,
                entry.cache_time_ms,
                entry.access_count as i64,
                entry.last_access_ms,
            ],
        )?;
        Ok(())
    }

    pub fn touch(&self, path: &str, now_ms: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE file_signature SET access_count = access_count + 1, last_access = ?1 \
             WHERE path = ?2",
            params![now_ms, path],
        )?;
        Ok(())
    }

    pub fn delete(&self, path: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM file_signature WHERE path = ?1", params![path])?;
        Ok(removed > 0)
    }

    pub fn clear(&self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM file_signature", [])?;
        debug!("Cache table truncated ({} rows)", removed);
        Ok(removed)
    }

    /// Remove rows cached at or before `cutoff_ms`. Returns the removed paths.
    pub fn purge_expired(&self, cutoff_ms: i64) -> Result<Vec<String>> {
        let expired = self.collect_paths(
            "SELECT path FROM file_signature WHERE cache_time <= ?1",
            params![cutoff_ms],
        )?;
        if !expired.is_empty() {
            self.conn.execute(
                "DELETE FROM file_signature WHERE cache_time <= ?1",
                params![cutoff_ms],
            )?;
        }
        Ok(expired)
    }

    /// Evict least-recently-accessed rows until at most `max_entries` remain.
    /// Returns the evicted paths.
    pub fn enforce_capacity(&self, max_entries: usize) -> Result<Vec<String>> {
        let count = self.count()?;
        let excess = count.saturating_sub(max_entries as u64);
        if excess == 0 {
            return Ok(Vec::new());
        }

        let victims = self.collect_paths(
            "SELECT path FROM file_signature ORDER BY last_access ASC, path ASC LIMIT ?1",
            params![excess as i64],
        )?;

        let tx = self.conn.unchecked_transaction()?;
        for path in &victims {
            tx.execute("DELETE FROM file_signature WHERE path = ?1", params![path])?;
        }
        tx.commit()?;

        debug!("Evicted {} cache rows over the {} cap", victims.len(), max_entries);
        Ok(victims)
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM file_signature", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Rows cached after `cutoff_ms`, i.e. not yet expired.
    pub fn count_fresh(&self, cutoff_ms: i64) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM file_signature WHERE cache_time > ?1",
            params![cutoff_ms],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn total_accesses(&self) -> Result<u64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(access_count), 0) FROM file_signature",
            [],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    /// Bytes on disk for the database and its WAL sidecar.
    pub fn file_size_bytes(&self) -> u64 {
        let Some(db_path) = &self.db_path else {
            return 0;
        };
        let mut wal = db_path.clone().into_os_string();
        wal.push("-wal");

        [db_path.clone(), PathBuf::from(wal)]
            .iter()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }

    fn collect_paths(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let paths = stmt
            .query_map(params, |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>>>()?;
        Ok(paths)
    }
}

pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn decode_row(row: &Row<'_>) -> Result<CacheEntry> {
    let path: String = row.get(0)?;
    let size_bytes: i64 = row.get(1)?;
    let page_count: i64 = row.get(7)?;
    let access_count: i64 = row.get(9)?;

    let size_bytes = u64::try_from(size_bytes)
        .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(1, size_bytes))?;
    let page_count = u32::try_from(page_count)
        .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(7, page_count))?;

    Ok(CacheEntry {
        signature: FileSignature {
            path: PathBuf::from(path),
            size_bytes,
            modified_ns: row.get(2)?,
            content_hash: row.get(3)?,
            perceptual_hash: row
                .get::<_, Option<Vec<u8>>>(4)?
                .filter(|bytes| !bytes.is_empty())
                .map(PerceptualHash::from_bytes),
            text_hash: row.get(5)?,
            normalized_text: row.get(6)?,
            page_count,
        },
        cache_time_ms: row.get(8)?,
        access_count: access_count.max(0) as u64,
        last_access_ms: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, cache_time_ms: i64, last_access_ms: i64) -> CacheEntry {
        CacheEntry {
            signature: FileSignature {
                path: PathBuf::from(path),
                size_bytes: 42,
                modified_ns: 1_700_000_000_000_000_000,
                content_hash: "abc123".to_string(),
                perceptual_hash: Some(PerceptualHash::from_bytes(vec![1, 2, 3, 4, 5, 6, 7, 8])),
                text_hash: Some("00ff00ff00ff00ff".to_string()),
                normalized_text: Some("hello world".to_string()),
                page_count: 3,
            },
            access_count: 0,
            last_access_ms,
            cache_time_ms,
        }
    }

    #[test]
    fn test_upsert_and_load() {
        let store = CacheStore::open_in_memory().unwrap();
        let original = entry("/docs/a.pdf", 1000, 1000);
        store.upsert(&original).unwrap();

        let loaded = store.load("/docs/a.pdf").unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(store.load("/docs/missing.pdf").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_existing_row() {
        let store = CacheStore::open_in_memory().unwrap();
        store.upsert(&entry("/docs/a.pdf", 1000, 1000)).unwrap();

        let mut updated = entry("/docs/a.pdf", 2000, 2000);
        updated.signature.content_hash = "def456".to_string();
        updated.signature.perceptual_hash = None;
        store.upsert(&updated).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.load("/docs/a.pdf").unwrap().unwrap(), updated);
    }

    #[test]
    fn test_touch_counts_accesses() {
        let store = CacheStore::open_in_memory().unwrap();
        store.upsert(&entry("/docs/a.pdf", 1000, 1000)).unwrap();
        store.touch("/docs/a.pdf", 5000).unwrap();
        store.touch("/docs/a.pdf", 6000).unwrap();

        let loaded = store.load("/docs/a.pdf").unwrap().unwrap();
        assert_eq!(loaded.access_count, 2);
        assert_eq!(loaded.last_access_ms, 6000);
        assert_eq!(store.total_accesses().unwrap(), 2);
    }

    #[test]
    fn test_purge_expired() {
        let store = CacheStore::open_in_memory().unwrap();
        store.upsert(&entry("/old.pdf", 100, 100)).unwrap();
        store.upsert(&entry("/new.pdf", 900, 900)).unwrap();

        assert_eq!(store.count_fresh(500).unwrap(), 1);
        let purged = store.purge_expired(500).unwrap();
        assert_eq!(purged, vec!["/old.pdf".to_string()]);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_enforce_capacity_evicts_least_recently_accessed() {
        let store = CacheStore::open_in_memory().unwrap();
        store.upsert(&entry("/a.pdf", 1, 30)).unwrap();
        store.upsert(&entry("/b.pdf", 1, 10)).unwrap();
        store.upsert(&entry("/c.pdf", 1, 20)).unwrap();

        let evicted = store.enforce_capacity(2).unwrap();
        assert_eq!(evicted, vec!["/b.pdf".to_string()]);
        assert_eq!(store.count().unwrap(), 2);
        assert!(store.enforce_capacity(2).unwrap().is_empty());
    }

    #[test]
    fn test_undecodable_row_is_deleted() {
        let store = CacheStore::open_in_memory().unwrap();
        store
            .connection()
            .execute(
                "INSERT INTO file_signature (path, size_bytes, modified_ns, content_hash, \
                 page_count, cache_time, access_count, last_access) \
                 VALUES ('/bad.pdf', -5, 0, 'x', 0, 0, 0, 0)",
                [],
            )
            .unwrap();

        assert!(store.load("/bad.pdf").unwrap().is_none());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_delete_and_clear() {
        let store = CacheStore::open_in_memory().unwrap();
        store.upsert(&entry("/a.pdf", 1, 1)).unwrap();
        store.upsert(&entry("/b.pdf", 1, 1)).unwrap();

        assert!(store.delete("/a.pdf").unwrap());
        assert!(!store.delete("/a.pdf").unwrap());
        assert_eq!(store.clear().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_schema_version_mismatch_resets_table() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("pdf_cache.db");
        {
            let store = CacheStore::open(&db_path).unwrap();
            store.upsert(&entry("/a.pdf", 1, 1)).unwrap();
            store
                .connection()
                .execute_batch("PRAGMA user_version = 99;")
                .unwrap();
        }

        let reopened = CacheStore::open(&db_path).unwrap();
        assert_eq!(reopened.count().unwrap(), 0);
        let version: i64 = reopened
            .connection()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
        assert!(reopened.file_size_bytes() > 0);
    }
}
