//! The File Cache subsystem: Cache Database (A), LRU Strategy (B), File
//! Cache (C) and Two-Tier Cache Manager (D).

pub mod db;
pub mod file_cache;
pub mod lru;
pub mod manager;

use std::fs::File;
use std::io::{self, BufReader, Read};

use crate::error::Result;
use crate::cache::metadata::CacheMetadata;

pub use file_cache::{FileCache, FileCacheConfig};
pub use lru::CacheInfo;
pub use manager::TwoTierCacheManager;

/// The body-file name derived from a cache key: a hex-encoded BLAKE3 digest
/// so arbitrary keys (URLs of unbounded length) map to fixed-length,
/// filesystem-safe names.
pub fn body_file_name(key: &str) -> String {
    format!("{}.data", blake3::hash(key.as_bytes()).to_hex())
}

/// A forward-only reader over a cache body file.
#[derive(Debug)]
pub struct CacheBodyReader(BufReader<File>);

impl CacheBodyReader {
    pub(crate) fn open(path: &std::path::Path) -> io::Result<Self> {
        Ok(CacheBodyReader(BufReader::new(File::open(path)?)))
    }
}

impl Read for CacheBodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

/// The interface both the File Cache and the Two-Tier Cache Manager
/// implement, so the manager can compose an L1/L2 pair behind one facade.
pub trait Cache: std::fmt::Debug + Send + Sync {
    /// Looks up metadata for `key`, refreshing its last-accessed time and
    /// LRU position on a hit.
    fn get_metadata(&self, key: &str) -> Result<Option<CacheMetadata>>;

    /// Opens the body file for `key` for reading. The caller must call
    /// [`Cache::release_data`] exactly once per successful call.
    fn get_data(&self, key: &str) -> Result<Option<CacheBodyReader>>;

    /// Metadata and body together. The default implementation composes
    /// `get_metadata` and `get_data`; implementations backed by a single
    /// lock should override this to make the pair atomic.
    fn get(&self, key: &str) -> Result<Option<(CacheMetadata, CacheBodyReader)>> {
        let Some(md) = self.get_metadata(key)? else { return Ok(None) };
        let Some(body) = self.get_data(key)? else { return Ok(None) };
        Ok(Some((md, body)))
    }

    /// Overwrites the metadata row for an existing, idle entry without
    /// touching its body file.
    fn put_metadata(&self, key: &str, md: CacheMetadata) -> Result<bool>;

    /// Commits `temp_file_path` as the body for `key`, alongside `md`.
    fn put(&self, key: &str, md: CacheMetadata, temp_file_path: &std::path::Path) -> Result<bool>;

    /// Removes `key`, or defers removal if it is in use.
    fn remove(&self, key: &str) -> Result<bool>;

    /// Releases one reference acquired by `get_data`/`get`.
    fn release_data(&self, key: &str) -> Result<()>;

    /// Drops every entry. `may_delete_if_busy=false` spares in-use entries.
    fn purge(&self, may_delete_if_busy: bool) -> Result<bool>;

    /// The scratch directory callers should write write-through caching
    /// temp files into before calling [`Cache::put`], if this cache is
    /// backed by a filesystem tier. `None` for a cache with no such tier.
    fn temp_dir(&self) -> Option<std::path::PathBuf> {
        None
    }
}
