//! File Cache (component C): composes the metadata database (A), the LRU
//! strategy (B) and a body-file directory behind the [`Cache`] interface.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use super::db::MetadataDb;
use super::lru::LruStrategy;
use super::{body_file_name, Cache, CacheBodyReader};
use crate::cache::metadata::CacheMetadata;
use crate::error::Result;

/// Construction knobs for a [`FileCache`].
#[derive(Debug, Clone)]
pub struct FileCacheConfig {
    /// Directory the cache owns: holds the metadata database, body files
    /// and the `temp/` scratch directory.
    pub root: PathBuf,
    /// The byte budget enforced by the LRU strategy.
    pub max_size_bytes: u64,
}

const DB_FILE_NAME: &str = "metadata.sqlite3";

fn now_sec() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

struct Inner {
    db: MetadataDb,
    lru: LruStrategy,
}

/// A durable key→(metadata, body) cache bounded by a byte budget, with
/// reference-counted in-use entries and deferred deletion.
#[derive(Debug)]
pub struct FileCache {
    root: PathBuf,
    temp_dir: PathBuf,
    inner: Mutex<Option<Inner>>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner").field("entries", &self.lru.len()).finish()
    }
}

impl FileCache {
    /// Opens (or initializes) the cache at `config.root`. A failure to
    /// initialize (directory creation or DB open failure) is returned; any
    /// subsequent operation on a cache whose `inner` never got populated
    /// behaves as a permanently-empty, permanently-failing cache.
    pub fn open(config: FileCacheConfig) -> Result<Self> {
        fs::create_dir_all(&config.root)?;
        let temp_dir = config.root.join("temp");
        fs::create_dir_all(&temp_dir)?;

        let db = MetadataDb::open(&config.root.join(DB_FILE_NAME))?;
        let mut lru = LruStrategy::new(config.max_size_bytes);

        for md in db.enumerate()? {
            let body_path = config.root.join(body_file_name(&md.key));
            if !body_path.is_file() {
                warn!("dropping cache row {} with missing body file", md.key);
                let _ = db.delete(&md.key);
                continue;
            }
            if md.response_body_size > config.max_size_bytes {
                warn!("dropping cache row {} larger than max_size_bytes", md.key);
                let _ = db.delete(&md.key);
                let _ = fs::remove_file(&body_path);
                continue;
            }
            match lru.reserve(md.response_body_size) {
                None => {
                    warn!("dropping cache row {}: no budget at open", md.key);
                    let _ = db.delete(&md.key);
                    let _ = fs::remove_file(&body_path);
                    continue;
                }
                Some(victims) => {
                    for victim in victims {
                        debug!("evicting {victim} to make room for {}", md.key);
                        let _ = fs::remove_file(config.root.join(body_file_name(&victim)));
                        let _ = db.delete(&victim);
                    }
                }
            }
            lru.insert_fresh(md.key.clone(), md.response_body_size);
        }

        Ok(FileCache { root: config.root, temp_dir, inner: Mutex::new(Some(Inner { db, lru })) })
    }

    /// The directory callers should write caching-stream temp files into
    /// before calling [`Cache::put`].
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Number of entries currently tracked by the LRU strategy.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().as_ref().map(|i| i.lru.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes currently tracked by the LRU strategy.
    pub fn total_size(&self) -> u64 {
        self.inner.lock().unwrap().as_ref().map(|i| i.lru.total_size()).unwrap_or(0)
    }

    fn body_path(&self, key: &str) -> PathBuf {
        self.root.join(body_file_name(key))
    }

    /// Deletes the cache directory outright and recreates an empty one:
    /// `purge(true)` removes the database file itself; the next cache
    /// operation reopens an empty database.
    fn reopen_empty(root: &Path, max_size_bytes: u64) -> Result<Inner> {
        fs::remove_dir_all(root)?;
        fs::create_dir_all(root)?;
        fs::create_dir_all(root.join("temp"))?;
        let db = MetadataDb::open(&root.join(DB_FILE_NAME))?;
        Ok(Inner { db, lru: LruStrategy::new(max_size_bytes) })
    }
}

impl Cache for FileCache {
    fn get_metadata(&self, key: &str) -> Result<Option<CacheMetadata>> {
        let mut guard = self.inner.lock().unwrap();
        let Some(inner) = guard.as_mut() else { return Ok(None) };

        match inner.lru.get(key) {
            Some(info) if !info.pending_delete => {}
            _ => return Ok(None),
        }

        let md = match inner.db.get(key)? {
            Some(md) => md,
            None => return Ok(None),
        };

        let now = now_sec();
        if !inner.db.touch(key, now)? {
            return Ok(None);
        }
        inner.lru.touch(key);
        debug!("cache hit for metadata {key}");
        Ok(Some(CacheMetadata { last_accessed_sec: now, ..md }))
    }

    fn get_data(&self, key: &str) -> Result<Option<CacheBodyReader>> {
        let mut guard = self.inner.lock().unwrap();
        let Some(inner) = guard.as_mut() else { return Ok(None) };

        match inner.lru.get(key) {
            Some(info) if !info.pending_delete => {}
            _ => return Ok(None),
        }

        let path = self.body_path(key);
        let reader = match CacheBodyReader::open(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!("cache body open failed for {key}: {e}");
                return Ok(None);
            }
        };

        inner.lru.get_mut(key).unwrap().ref_count += 1;
        inner.lru.touch(key);
        Ok(Some(reader))
    }

    fn get(&self, key: &str) -> Result<Option<(CacheMetadata, CacheBodyReader)>> {
        let mut guard = self.inner.lock().unwrap();
        let Some(inner) = guard.as_mut() else { return Ok(None) };

        match inner.lru.get(key) {
            Some(info) if !info.pending_delete => {}
            _ => return Ok(None),
        }

        let md = match inner.db.get(key)? {
            Some(md) => md,
            None => return Ok(None),
        };

        let path = self.body_path(key);
        let reader = match CacheBodyReader::open(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!("cache body open failed for {key}: {e}");
                return Ok(None);
            }
        };

        let now = now_sec();
        if !inner.db.touch(key, now)? {
            return Ok(None);
        }
        inner.lru.get_mut(key).unwrap().ref_count += 1;
        inner.lru.touch(key);

        Ok(Some((CacheMetadata { last_accessed_sec: now, ..md }, reader)))
    }

    fn put_metadata(&self, key: &str, md: CacheMetadata) -> Result<bool> {
        let mut guard = self.inner.lock().unwrap();
        let Some(inner) = guard.as_mut() else { return Ok(false) };

        let info = match inner.lru.get(key) {
            Some(info) => *info,
            None => return Ok(false),
        };
        if info.ref_count != 0 || info.pending_delete {
            return Ok(false);
        }

        inner.db.put(&md)?;
        Ok(true)
    }

    fn put(&self, key: &str, md: CacheMetadata, temp_file_path: &Path) -> Result<bool> {
        let mut guard = self.inner.lock().unwrap();
        let Some(inner) = guard.as_mut() else { return Ok(false) };

        if let Some(info) = inner.lru.get(key) {
            if info.ref_count != 0 || info.pending_delete {
                return Ok(false);
            }
            let path = self.body_path(key);
            let _ = fs::remove_file(&path);
            let _ = inner.db.delete(key);
            inner.lru.remove(key);
        }

        match inner.lru.reserve(md.response_body_size) {
            None => {
                debug!("put rejected for {key}: no budget");
                return Ok(false);
            }
            Some(victims) => {
                for victim in victims {
                    debug!("evicting {victim} to make room for {key}");
                    let _ = fs::remove_file(self.body_path(&victim));
                    let _ = inner.db.delete(&victim);
                }
            }
        }

        let dest = self.body_path(key);
        if let Err(e) = fs::rename(temp_file_path, &dest) {
            warn!("rename into cache failed for {key}: {e}");
            return Ok(false);
        }

        if let Err(e) = inner.db.put(&md) {
            let _ = fs::remove_file(&dest);
            return Err(e);
        }

        inner.lru.insert_fresh(key.to_string(), md.response_body_size);
        debug!("cached {key} ({} bytes)", md.response_body_size);
        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let mut guard = self.inner.lock().unwrap();
        let Some(inner) = guard.as_mut() else { return Ok(false) };

        let info = match inner.lru.get(key) {
            Some(info) => *info,
            None => return Ok(false),
        };

        if info.ref_count > 0 {
            inner.lru.get_mut(key).unwrap().pending_delete = true;
            return Ok(true);
        }

        let path = self.body_path(key);
        let _ = fs::remove_file(&path);
        let _ = inner.db.delete(key)?;
        inner.lru.remove(key);
        debug!("removed {key}");
        Ok(true)
    }

    fn release_data(&self, key: &str) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let Some(inner) = guard.as_mut() else { return Ok(()) };

        let Some(info) = inner.lru.get_mut(key) else { return Ok(()) };
        if info.ref_count > 0 {
            info.ref_count -= 1;
        }

        if info.ref_count == 0 && info.pending_delete {
            let path = self.body_path(key);
            let _ = fs::remove_file(&path);
            let _ = inner.db.delete(key)?;
            inner.lru.remove(key);
            debug!("completed deferred delete for {key}");
        }
        Ok(())
    }

    fn purge(&self, may_delete_if_busy: bool) -> Result<bool> {
        let mut guard = self.inner.lock().unwrap();
        let Some(inner) = guard.as_mut() else { return Ok(false) };

        if may_delete_if_busy {
            let max_size_bytes = inner.lru.max_size_bytes();
            *inner = match Self::reopen_empty(&self.root, max_size_bytes) {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!("failed to reopen cache after purge: {e}");
                    drop(guard);
                    *self.inner.lock().unwrap() = None;
                    return Ok(true);
                }
            };
            debug!("purged cache entirely");
            return Ok(true);
        }

        let mut any_busy = false;
        for key in inner.lru.keys() {
            let idle = inner.lru.get(&key).map(|i| i.ref_count == 0).unwrap_or(true);
            if !idle {
                any_busy = true;
                continue;
            }
            let path = self.body_path(&key);
            let _ = fs::remove_file(&path);
            inner.db.delete(&key)?;
            inner.lru.remove(&key);
        }
        debug!("purged non-busy entries, any_busy={any_busy}");
        Ok(!any_busy)
    }

    fn temp_dir(&self) -> Option<PathBuf> {
        Some(self.temp_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use std::io::{Read, Write};
    use tempfile::TempDir;
    use url::Url;

    fn open_cache(max_size: u64) -> (TempDir, FileCache) {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::open(FileCacheConfig {
            root: dir.path().to_path_buf(),
            max_size_bytes: max_size,
        })
        .unwrap();
        (dir, cache)
    }

    fn metadata(key: &str, size: u64) -> CacheMetadata {
        CacheMetadata {
            key: key.to_string(),
            url: Url::parse("https://example.com/").unwrap(),
            method: Method::GET,
            status: StatusCode::OK,
            reason_phrase: None,
            headers: Default::default(),
            response_body_size: size,
            sent_request_sec: 1,
            received_response_sec: 1,
            created_at_sec: 1,
            last_accessed_sec: 1,
        }
    }

    fn write_temp(cache: &FileCache, contents: &[u8]) -> PathBuf {
        let path = cache.temp_dir().join("scratch");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn put_then_get_round_trips_body_and_metadata() {
        let (_dir, cache) = open_cache(1000);
        let temp = write_temp(&cache, b"hello");
        assert!(cache.put("k", metadata("k", 5), &temp).unwrap());

        let (md, mut reader) = cache.get("k").unwrap().unwrap();
        assert_eq!(md.response_body_size, 5);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
        cache.release_data("k").unwrap();
    }

    #[test]
    fn eviction_under_size_pressure_keeps_budget() {
        let (_dir, cache) = open_cache(300);
        for k in ["a", "b", "c"] {
            let temp = write_temp(&cache, &[0u8; 100]);
            assert!(cache.put(k, metadata(k, 100), &temp).unwrap());
        }
        let temp = write_temp(&cache, &[0u8; 100]);
        assert!(cache.put("d", metadata("d", 100), &temp).unwrap());

        assert_eq!(cache.total_size(), 300);
        assert!(cache.get_metadata("a").unwrap().is_none());
        assert!(cache.get_metadata("d").unwrap().is_some());
        assert!(!cache.body_path("a").exists());
        assert!(cache.inner.lock().unwrap().as_ref().unwrap().db.get("a").unwrap().is_none());
    }

    #[test]
    fn remove_while_in_use_is_deferred() {
        let (_dir, cache) = open_cache(1000);
        let temp = write_temp(&cache, b"hello");
        cache.put("k", metadata("k", 5), &temp).unwrap();

        let reader = cache.get_data("k").unwrap();
        assert!(reader.is_some());
        assert!(cache.remove("k").unwrap());
        assert!(cache.get_metadata("k").unwrap().is_none());

        cache.release_data("k").unwrap();
        assert!(!cache.body_path("k").exists());
    }

    #[test]
    fn purge_false_spares_busy_entries() {
        let (_dir, cache) = open_cache(1000);
        let temp_a = write_temp(&cache, b"a");
        cache.put("a", metadata("a", 1), &temp_a).unwrap();
        let temp_b = write_temp(&cache, b"b");
        cache.put("b", metadata("b", 1), &temp_b).unwrap();

        let _busy = cache.get_data("a").unwrap();
        let clean = cache.purge(false).unwrap();
        assert!(!clean);
        assert!(cache.get_metadata("a").is_ok());
        assert!(cache.get_metadata("b").unwrap().is_none());
    }

    #[test]
    fn put_rejects_body_larger_than_budget() {
        let (_dir, cache) = open_cache(10);
        let temp = write_temp(&cache, &[0u8; 20]);
        assert!(!cache.put("k", metadata("k", 20), &temp).unwrap());
        assert_eq!(cache.len(), 0);
    }
}
