//! Durable record of which document revision was last ingested into which
//! container, plus the download cache and the processed-URL ledger.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{IngestError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY,
    document_key TEXT NOT NULL,
    document_id TEXT NOT NULL,
    dataset_id TEXT NOT NULL,
    dataset_name TEXT NOT NULL,
    revision TEXT,
    file_path TEXT,
    file_name TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(document_key, dataset_id)
);
CREATE INDEX IF NOT EXISTS idx_documents_key ON documents(document_key);
CREATE INDEX IF NOT EXISTS idx_documents_dataset ON documents(dataset_id);

CREATE TABLE IF NOT EXISTS download_cache (
    id INTEGER PRIMARY KEY,
    url TEXT NOT NULL UNIQUE,
    file_path TEXT NOT NULL,
    file_size INTEGER,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS processed_urls (
    id INTEGER PRIMARY KEY,
    url TEXT NOT NULL UNIQUE,
    processed_at TEXT NOT NULL
);
"#;

const DOCUMENT_COLUMNS: &str = "document_key, document_id, dataset_id, dataset_name, revision, \
                                file_path, file_name, created_at, updated_at";

/// Fields written for one ingested document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub document_key: String,
    /// Opaque id returned by the platform the document was uploaded to.
    pub document_id: String,
    pub dataset_id: String,
    pub dataset_name: String,
    pub revision: Option<String>,
    pub file_path: Option<String>,
    pub file_name: Option<String>,
}

/// A stored document together with its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    #[serde(flatten)]
    pub entry: DocumentEntry,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A validated download-cache hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDownload {
    pub url: String,
    pub file_path: PathBuf,
    pub file_size: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Which download-cache rows to evict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEviction {
    /// Rows not touched within the given number of days.
    OlderThanDays(u32),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatistics {
    pub total_documents: usize,
    /// Documents per container name, largest first.
    pub datasets: Vec<DatasetCount>,
    pub cached_downloads: usize,
    pub processed_urls: usize,
}

/// SQLite-backed revision store.
pub struct RevisionStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl RevisionStore {
    /// Opens (or creates) a store at `path`. Any failure to open or initialise
    /// the database is reported as [`IngestError::StoreUnavailable`].
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self> {
        let unavailable = |source| IngestError::StoreUnavailable {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(unavailable)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(unavailable)?;
        conn.execute_batch(SCHEMA).map_err(unavailable)?;
        debug!("revision store ready");

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens a throwaway store that lives for the lifetime of the value.
    pub fn open_in_memory() -> Result<Self> {
        let unavailable = |source| IngestError::StoreUnavailable {
            path: PathBuf::from(":memory:"),
            source,
        };
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        conn.execute_batch(SCHEMA).map_err(unavailable)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ---- documents ----

    /// Inserts or updates the document identified by `(document_key,
    /// dataset_id)`. An update keeps the first `created_at`.
    pub fn save_document(&self, entry: &DocumentEntry) -> Result<()> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO documents (document_key, document_id, dataset_id, dataset_name, revision,
                                    file_path, file_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(document_key, dataset_id) DO UPDATE SET
                 document_id = excluded.document_id,
                 dataset_name = excluded.dataset_name,
                 revision = excluded.revision,
                 file_path = excluded.file_path,
                 file_name = excluded.file_name,
                 updated_at = excluded.updated_at",
            params![
                entry.document_key,
                entry.document_id,
                entry.dataset_id,
                entry.dataset_name,
                entry.revision,
                entry.file_path,
                entry.file_name,
                now,
            ],
        )?;
        debug!(
            document_key = %entry.document_key,
            dataset_id = %entry.dataset_id,
            revision = ?entry.revision,
            "document saved"
        );
        Ok(())
    }

    pub fn document(&self, document_key: &str, dataset_id: &str) -> Result<Option<RevisionRecord>> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE document_key = ?1 AND dataset_id = ?2"
        );
        Ok(self
            .conn
            .query_row(&sql, params![document_key, dataset_id], revision_from_row)
            .optional()?)
    }

    /// Deletes the document with the exact key; returns the number of rows removed.
    pub fn delete_document(&self, document_key: &str, dataset_id: &str) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM documents WHERE document_key = ?1 AND dataset_id = ?2",
            params![document_key, dataset_id],
        )?;
        debug!(document_key, dataset_id, removed, "document deleted");
        Ok(removed)
    }

    /// Every document of one container keyed by document key. The map is a
    /// point-in-time snapshot.
    pub fn documents_for_dataset(&self, dataset_id: &str) -> Result<BTreeMap<String, RevisionRecord>> {
        let records = self.query_documents("WHERE dataset_id = ?1", params![dataset_id])?;
        Ok(records
            .into_iter()
            .map(|record| (record.entry.document_key.clone(), record))
            .collect())
    }

    pub fn documents_by_dataset_name(&self, dataset_name: &str) -> Result<Vec<RevisionRecord>> {
        self.query_documents("WHERE dataset_name = ?1", params![dataset_name])
    }

    pub fn all_documents(&self) -> Result<Vec<RevisionRecord>> {
        self.query_documents("", params![])
    }

    pub fn clear_dataset(&self, dataset_id: &str) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM documents WHERE dataset_id = ?1", params![dataset_id])?;
        info!(dataset_id, removed, "dataset cleared");
        Ok(removed)
    }

    /// Removes every document and processed URL. The download cache is left
    /// alone; see [`RevisionStore::clear_download_cache`].
    pub fn reset(&self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM documents", [])?;
        self.conn.execute("DELETE FROM processed_urls", [])?;
        warn!(removed, "revision store reset");
        Ok(removed)
    }

    pub fn statistics(&self) -> Result<StoreStatistics> {
        let count = |sql: &str| -> Result<usize> {
            let value: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(usize::try_from(value).unwrap_or_default())
        };

        let mut stmt = self.conn.prepare(
            "SELECT dataset_name, COUNT(*) AS count FROM documents
             GROUP BY dataset_name ORDER BY count DESC, dataset_name ASC",
        )?;
        let datasets = stmt
            .query_map([], |row| {
                let count: i64 = row.get(1)?;
                Ok(DatasetCount {
                    name: row.get(0)?,
                    count: usize::try_from(count).unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(StoreStatistics {
            total_documents: count("SELECT COUNT(*) FROM documents")?,
            datasets,
            cached_downloads: count("SELECT COUNT(*) FROM download_cache")?,
            processed_urls: count("SELECT COUNT(*) FROM processed_urls")?,
        })
    }

    fn query_documents(
        &self,
        filter: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<RevisionRecord>> {
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents {filter} ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params, revision_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    // ---- processed URLs ----

    pub fn is_url_processed(&self, url: &str) -> Result<bool> {
        Ok(self
            .conn
            .query_row("SELECT 1 FROM processed_urls WHERE url = ?1", params![url], |_| Ok(()))
            .optional()?
            .is_some())
    }

    /// Records a URL as processed. Returns false when it already was.
    pub fn mark_url_processed(&self, url: &str) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO processed_urls (url, processed_at) VALUES (?1, ?2)
             ON CONFLICT(url) DO NOTHING",
            params![url, Utc::now()],
        )?;
        Ok(inserted > 0)
    }

    // ---- download cache ----

    pub fn record_download(&self, url: &str, file_path: &Path, file_size: Option<u64>) -> Result<()> {
        self.record_download_at(url, file_path, file_size, Utc::now())
    }

    /// Same as [`RevisionStore::record_download`] with an explicit timestamp.
    pub fn record_download_at(
        &self,
        url: &str,
        file_path: &Path,
        file_size: Option<u64>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let size = file_size.and_then(|size| i64::try_from(size).ok());
        self.conn.execute(
            "INSERT INTO download_cache (url, file_path, file_size, timestamp)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(url) DO UPDATE SET
                 file_path = excluded.file_path,
                 file_size = excluded.file_size,
                 timestamp = excluded.timestamp",
            params![url, file_path.to_string_lossy().into_owned(), size, at],
        )?;
        debug!(url, path = %file_path.display(), "download cached");
        Ok(())
    }

    /// Looks up a cached download. The entry is only returned when the file
    /// still exists and, if a size was recorded, has that size; otherwise the
    /// stale row is removed. A hit refreshes the entry's timestamp.
    pub fn cached_download(&self, url: &str) -> Result<Option<CachedDownload>> {
        let row = self
            .conn
            .query_row(
                "SELECT file_path, file_size, timestamp FROM download_cache WHERE url = ?1",
                params![url],
                |row| {
                    let path: String = row.get(0)?;
                    let size: Option<i64> = row.get(1)?;
                    let timestamp: DateTime<Utc> = row.get(2)?;
                    Ok((PathBuf::from(path), size, timestamp))
                },
            )
            .optional()?;
        let Some((file_path, size, _)) = row else {
            return Ok(None);
        };
        let file_size = size.and_then(|size| u64::try_from(size).ok());

        let valid = match fs::metadata(&file_path) {
            Ok(metadata) => metadata.is_file() && file_size.is_none_or(|size| size == metadata.len()),
            Err(_) => false,
        };
        if !valid {
            debug!(url, path = %file_path.display(), "stale download cache entry removed");
            self.conn
                .execute("DELETE FROM download_cache WHERE url = ?1", params![url])?;
            return Ok(None);
        }

        let now = Utc::now();
        self.conn.execute(
            "UPDATE download_cache SET timestamp = ?1 WHERE url = ?2",
            params![now, url],
        )?;
        Ok(Some(CachedDownload {
            url: url.to_string(),
            file_path,
            file_size,
            timestamp: now,
        }))
    }

    /// Returns the cached file for `url`, running `fetch` only on a miss. The
    /// boolean is true for a cache hit.
    pub fn fetch_cached<F>(&self, url: &str, fetch: F) -> Result<(PathBuf, bool)>
    where
        F: FnOnce(&str) -> Result<PathBuf>,
    {
        if let Some(hit) = self.cached_download(url)? {
            debug!(url, "download cache hit");
            return Ok((hit.file_path, true));
        }
        let path = fetch(url)?;
        let size = fs::metadata(&path)?.len();
        self.record_download(url, &path, Some(size))?;
        Ok((path, false))
    }

    /// Evicts download-cache rows, optionally deleting the files they point
    /// to. Returns the number of rows removed. An age reaching past the
    /// earliest representable date evicts nothing.
    #[instrument(level = "info", skip(self))]
    pub fn clear_download_cache(&self, eviction: CacheEviction, delete_files: bool) -> Result<usize> {
        let cutoff = match eviction {
            CacheEviction::OlderThanDays(days) => {
                let cutoff = Duration::try_days(i64::from(days))
                    .and_then(|age| Utc::now().checked_sub_signed(age));
                match cutoff {
                    Some(cutoff) => Some(cutoff),
                    None => {
                        debug!(days, "cache age cutoff out of range, nothing to evict");
                        return Ok(0);
                    }
                }
            }
            CacheEviction::All => None,
        };

        let mut stmt = self
            .conn
            .prepare("SELECT url, file_path, timestamp FROM download_cache")?;
        let rows = stmt
            .query_map([], |row| {
                let url: String = row.get(0)?;
                let path: String = row.get(1)?;
                let timestamp: DateTime<Utc> = row.get(2)?;
                Ok((url, PathBuf::from(path), timestamp))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let mut removed = 0;
        for (url, path, timestamp) in rows {
            if cutoff.is_some_and(|cutoff| timestamp >= cutoff) {
                continue;
            }
            if delete_files {
                match fs::remove_file(&path) {
                    Ok(()) => debug!(path = %path.display(), "cached file deleted"),
                    Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                    Err(error) => warn!(path = %path.display(), %error, "cached file not deleted"),
                }
            }
            removed += self
                .conn
                .execute("DELETE FROM download_cache WHERE url = ?1", params![url])?;
        }

        info!(removed, "download cache cleared");
        Ok(removed)
    }
}

fn revision_from_row(row: &Row<'_>) -> rusqlite::Result<RevisionRecord> {
    Ok(RevisionRecord {
        entry: DocumentEntry {
            document_key: row.get(0)?,
            document_id: row.get(1)?,
            dataset_id: row.get(2)?,
            dataset_name: row.get(3)?,
            revision: row.get(4)?,
            file_path: row.get(5)?,
            file_name: row.get(6)?,
        },
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(key: &str, dataset: &str, revision: &str) -> DocumentEntry {
        DocumentEntry {
            document_key: key.into(),
            document_id: format!("doc-{key}-{revision}"),
            dataset_id: dataset.into(),
            dataset_name: format!("{dataset} name"),
            revision: Some(revision.into()),
            file_path: Some(format!("/tmp/{key}.pdf")),
            file_name: Some(format!("{key}.pdf")),
        }
    }

    #[test]
    fn save_then_read_returns_identical_fields() {
        let store = RevisionStore::open_in_memory().expect("store");
        let written = entry("A-01_도면", "kb1", "R1");
        store.save_document(&written).expect("saved");

        let read = store.document("A-01_도면", "kb1").expect("query").expect("present");
        assert_eq!(read.entry, written);
        assert_eq!(read.created_at, read.updated_at);
        assert!(store.document("A-01_도면", "kb2").expect("query").is_none());
    }

    #[test]
    fn newer_revision_updates_in_place() {
        let store = RevisionStore::open_in_memory().expect("store");
        store.save_document(&entry("K", "kb1", "R1")).expect("saved");
        let first = store.document("K", "kb1").expect("query").expect("present");

        store.save_document(&entry("K", "kb1", "R2")).expect("saved");
        let all = store.all_documents().expect("all");
        assert_eq!(all.len(), 1);
        let second = &all[0];
        assert_eq!(second.entry.revision.as_deref(), Some("R2"));
        assert_eq!(second.entry.document_id, "doc-K-R2");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[test]
    fn dataset_queries_and_statistics() {
        let store = RevisionStore::open_in_memory().expect("store");
        store.save_document(&entry("a", "kb1", "R1")).expect("saved");
        store.save_document(&entry("b", "kb1", "R1")).expect("saved");
        store.save_document(&entry("a", "kb2", "R3")).expect("saved");

        let snapshot = store.documents_for_dataset("kb1").expect("snapshot");
        assert_eq!(snapshot.keys().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(store.documents_by_dataset_name("kb2 name").expect("by name").len(), 1);

        let stats = store.statistics().expect("stats");
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.datasets[0], DatasetCount { name: "kb1 name".into(), count: 2 });

        assert_eq!(store.delete_document("a", "kb1").expect("delete"), 1);
        assert_eq!(store.delete_document("a", "kb1").expect("delete"), 0);
        assert_eq!(store.clear_dataset("kb2").expect("clear"), 1);
        assert_eq!(store.reset().expect("reset"), 1);
        assert_eq!(store.statistics().expect("stats").total_documents, 0);
    }

    #[test]
    fn processed_urls_are_idempotent() {
        let store = RevisionStore::open_in_memory().expect("store");
        assert!(!store.is_url_processed("http://x/a").expect("query"));
        assert!(store.mark_url_processed("http://x/a").expect("mark"));
        assert!(!store.mark_url_processed("http://x/a").expect("mark"));
        assert!(store.is_url_processed("http://x/a").expect("query"));
    }

    #[test]
    fn download_cache_validates_size_on_disk() {
        let dir = tempdir().expect("tempdir");
        let store = RevisionStore::open(&dir.path().join("db/revisions.sqlite")).expect("store");
        let file = dir.path().join("a.pdf");
        fs::write(&file, b"12345").expect("write");

        store.record_download("http://x/a", &file, Some(5)).expect("record");
        let hit = store.cached_download("http://x/a").expect("lookup").expect("hit");
        assert_eq!(hit.file_path, file);

        let mut fetched = 0;
        let (path, was_hit) = store
            .fetch_cached("http://x/a", |_| {
                fetched += 1;
                Ok(file.clone())
            })
            .expect("fetch");
        assert!(was_hit);
        assert_eq!(path, file);
        assert_eq!(fetched, 0);

        fs::write(&file, b"123").expect("rewrite");
        assert!(store.cached_download("http://x/a").expect("lookup").is_none());

        let refetched = dir.path().join("a2.pdf");
        fs::write(&refetched, b"abcdef").expect("write");
        let (path, was_hit) = store
            .fetch_cached("http://x/a", |_| Ok(refetched.clone()))
            .expect("fetch");
        assert!(!was_hit);
        assert_eq!(path, refetched);
        let hit = store.cached_download("http://x/a").expect("lookup").expect("hit");
        assert_eq!(hit.file_size, Some(6));
    }

    #[test]
    fn missing_file_is_a_miss() {
        let dir = tempdir().expect("tempdir");
        let store = RevisionStore::open_in_memory().expect("store");
        store
            .record_download("http://x/gone", &dir.path().join("gone.pdf"), Some(1))
            .expect("record");
        assert!(store.cached_download("http://x/gone").expect("lookup").is_none());
        assert_eq!(store.statistics().expect("stats").cached_downloads, 0);
    }

    #[test]
    fn clearing_by_age_keeps_recent_entries() {
        let dir = tempdir().expect("tempdir");
        let store = RevisionStore::open_in_memory().expect("store");
        let old_file = dir.path().join("old.pdf");
        let new_file = dir.path().join("new.pdf");
        fs::write(&old_file, b"old").expect("write");
        fs::write(&new_file, b"new").expect("write");

        store
            .record_download_at("http://x/old", &old_file, Some(3), Utc::now() - Duration::days(10))
            .expect("record");
        store.record_download("http://x/new", &new_file, Some(3)).expect("record");

        let removed = store
            .clear_download_cache(CacheEviction::OlderThanDays(7), true)
            .expect("clear");
        assert_eq!(removed, 1);
        assert!(!old_file.exists());
        assert!(new_file.exists());
        assert!(store.cached_download("http://x/new").expect("lookup").is_some());

        let removed = store.clear_download_cache(CacheEviction::All, false).expect("clear");
        assert_eq!(removed, 1);
        assert!(new_file.exists());
    }

    #[test]
    fn huge_age_cutoff_evicts_nothing() {
        let dir = tempdir().expect("tempdir");
        let store = RevisionStore::open_in_memory().expect("store");
        let file = dir.path().join("kept.pdf");
        fs::write(&file, b"kept").expect("write");
        store
            .record_download_at("http://x/kept", &file, Some(4), Utc::now() - Duration::days(3650))
            .expect("record");

        let removed = store
            .clear_download_cache(CacheEviction::OlderThanDays(u32::MAX), true)
            .expect("clear");
        assert_eq!(removed, 0);
        assert!(file.exists());
        assert_eq!(store.statistics().expect("stats").cached_downloads, 1);
    }
}
