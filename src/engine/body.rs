//! Request and response body types for the engine.
//!
//! Request bodies expose a `reset()` contract so a reused connection that
//! fails mid-request can be retried on a fresh one. Response bodies are
//! scoped streams: closing one deterministically releases or removes its
//! connection and, for a write-through caching stream, commits or discards
//! its temp file.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};

use crate::cache::metadata::CacheMetadata;
use crate::pool::{Connection, ConnectionPool};
use crate::store::{Cache, CacheBodyReader};

/// A request body the engine can send and, on a reused-connection retry,
/// rewind and resend.
pub trait BodySource: Send {
    /// The media type to send as `Content-Type`, if any.
    fn media_type(&self) -> Option<&str> {
        None
    }

    /// The byte length to send as `Content-Length`, if known up front.
    fn content_length(&self) -> Option<u64>;

    /// Reads the entire body. Called once per send attempt.
    fn read_all(&mut self) -> io::Result<Vec<u8>>;

    /// Rewinds the body so a subsequent `read_all` reproduces the same
    /// bytes. Memory-backed bodies always succeed; file-backed bodies
    /// succeed iff the file is seekable; generic streaming bodies fail.
    fn reset(&mut self) -> bool;
}

#[derive(Debug)]
struct BytesSource {
    bytes: Bytes,
    media_type: Option<String>,
}

impl BodySource for BytesSource {
    fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    fn content_length(&self) -> Option<u64> {
        Some(self.bytes.len() as u64)
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.bytes.to_vec())
    }

    fn reset(&mut self) -> bool {
        true
    }
}

#[derive(Debug)]
struct FileSource {
    path: PathBuf,
    media_type: Option<String>,
    len: Option<u64>,
}

impl BodySource for FileSource {
    fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    fn content_length(&self) -> Option<u64> {
        self.len
    }

    fn read_all(&mut self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }

    fn reset(&mut self) -> bool {
        // The request is always re-read from `path` on each attempt, so a
        // reset succeeds iff the file still opens and seeks to the start.
        File::open(&self.path)
            .and_then(|mut f| f.seek(SeekFrom::Start(0)))
            .is_ok()
    }
}

/// A request body, handed to [`crate::engine::HttpEngine::execute`].
pub struct RequestBody(Option<Box<dyn BodySource>>);

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RequestBody").field(&self.0.is_some()).finish()
    }
}

impl RequestBody {
    pub fn empty() -> Self {
        RequestBody(None)
    }

    pub fn bytes(bytes: impl Into<Bytes>, media_type: Option<String>) -> Self {
        RequestBody(Some(Box::new(BytesSource { bytes: bytes.into(), media_type })))
    }

    pub fn file(path: impl Into<PathBuf>, media_type: Option<String>) -> io::Result<Self> {
        let path = path.into();
        let len = fs::metadata(&path)?.len();
        Ok(RequestBody(Some(Box::new(FileSource { path, media_type, len: Some(len) }))))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn media_type(&self) -> Option<&str> {
        self.0.as_ref().and_then(|b| b.media_type())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.0.as_ref().and_then(|b| b.content_length())
    }

    pub(crate) fn read_all(&mut self) -> io::Result<Option<Vec<u8>>> {
        match &mut self.0 {
            Some(source) => source.read_all().map(Some),
            None => Ok(None),
        }
    }

    /// See [`BodySource::reset`]. A body with no content always resets.
    pub fn reset(&mut self) -> bool {
        match &mut self.0 {
            Some(source) => source.reset(),
            None => true,
        }
    }
}

/// A response body served directly from the cache, whether on a fresh hit
/// or a successful revalidation. Releases its reference on drop.
pub struct CacheServedBody {
    reader: CacheBodyReader,
    cache: Arc<dyn Cache>,
    key: String,
}

impl CacheServedBody {
    pub(crate) fn new(reader: CacheBodyReader, cache: Arc<dyn Cache>, key: String) -> Self {
        CacheServedBody { reader, cache, key }
    }
}

impl Read for CacheServedBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Drop for CacheServedBody {
    fn drop(&mut self) {
        if let Err(e) = self.cache.release_data(&self.key) {
            warn!("releasing cache reference for {} failed: {e}", self.key);
        }
    }
}

/// A response body read straight from the network. Returns its connection
/// to the pool on drop, unless the connection was cancelled or the peer
/// signalled it will close, in which case it is simply dropped.
pub struct NetworkBody {
    reader: Box<dyn Read + Send>,
    pool: Arc<ConnectionPool>,
    connection: Option<Connection>,
    keep_alive: bool,
}

impl NetworkBody {
    pub(crate) fn new(
        reader: Box<dyn Read + Send>,
        pool: Arc<ConnectionPool>,
        connection: Connection,
        keep_alive: bool,
    ) -> Self {
        NetworkBody { reader, pool, connection: Some(connection), keep_alive }
    }
}

impl Read for NetworkBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Drop for NetworkBody {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if self.keep_alive && !connection.is_cancelled() {
                self.pool.release_connection(connection);
            } else {
                debug!("connection {} dropped, not returned to pool", connection.id());
            }
        }
    }
}

/// A write-through caching stream: as the user reads the network body, the
/// same bytes are written to a temp file. On a clean EOF that matches the
/// declared length (or on chunked EOF), the temp file is committed as a new
/// cache entry; otherwise it is discarded.
pub struct CachingBody {
    inner: NetworkBody,
    temp_file: Option<File>,
    temp_path: PathBuf,
    written: u64,
    expected_len: Option<u64>,
    cache: Arc<dyn Cache>,
    key: String,
    metadata: CacheMetadata,
    committed: bool,
}

impl CachingBody {
    pub(crate) fn new(
        inner: NetworkBody,
        temp_path: PathBuf,
        temp_file: File,
        expected_len: Option<u64>,
        cache: Arc<dyn Cache>,
        key: String,
        metadata: CacheMetadata,
    ) -> Self {
        CachingBody {
            inner,
            temp_file: Some(temp_file),
            temp_path,
            written: 0,
            expected_len,
            cache,
            key,
            metadata,
            committed: false,
        }
    }

    fn commit(&mut self) {
        if self.committed {
            return;
        }
        self.committed = true;
        drop(self.temp_file.take());

        let mut metadata = self.metadata.clone();
        metadata.response_body_size = self.written;
        match self.cache.put(&self.key, metadata, &self.temp_path) {
            Ok(true) => debug!("committed cache entry {} ({} bytes)", self.key, self.written),
            Ok(false) => debug!("cache rejected write-through commit for {}", self.key),
            Err(e) => warn!("cache commit failed for {}: {e}", self.key),
        }
    }

    fn discard(&mut self) {
        if self.committed {
            return;
        }
        drop(self.temp_file.take());
        let _ = fs::remove_file(&self.temp_path);
    }
}

impl Read for CachingBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            let complete = match self.expected_len {
                Some(expected) => self.written == expected,
                None => true,
            };
            if complete {
                self.commit();
            }
            return Ok(0);
        }

        if let Some(file) = self.temp_file.as_mut() {
            use std::io::Write;
            if let Err(e) = file.write_all(&buf[..n]) {
                warn!("write-through caching failed for {}: {e}", self.key);
                self.temp_file = None;
            } else {
                self.written += n as u64;
            }
        }
        Ok(n)
    }
}

impl Drop for CachingBody {
    fn drop(&mut self) {
        self.discard();
    }
}

/// Dispatches to whichever response body the engine produced.
pub enum ResponseBody {
    Empty,
    Cache(CacheServedBody),
    Network(NetworkBody),
    Caching(CachingBody),
}

impl Read for ResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ResponseBody::Empty => Ok(0),
            ResponseBody::Cache(b) => b.read(buf),
            ResponseBody::Network(b) => b.read(buf),
            ResponseBody::Caching(b) => b.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_body_always_resets() {
        let mut body = RequestBody::bytes(Bytes::from_static(b"hi"), None);
        assert_eq!(body.read_all().unwrap(), Some(b"hi".to_vec()));
        assert!(body.reset());
        assert_eq!(body.read_all().unwrap(), Some(b"hi".to_vec()));
    }

    #[test]
    fn empty_body_resets_trivially() {
        let mut body = RequestBody::empty();
        assert!(body.is_empty());
        assert!(body.reset());
        assert_eq!(body.read_all().unwrap(), None);
    }

    #[test]
    fn file_body_reports_length_and_resets() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("body.bin");
        std::fs::write(&path, b"payload").unwrap();
        let mut body = RequestBody::file(&path, Some("text/plain".into())).unwrap();
        assert_eq!(body.content_length(), Some(7));
        assert!(body.reset());
        assert_eq!(body.media_type(), Some("text/plain"));
    }
}
