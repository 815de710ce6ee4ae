//! Two-Tier Cache Manager (component D): combines an optional L1 (memory)
//! and L2 (file) [`Cache`] behind one interface, serialising every
//! operation on a single mutex.
//!
//! The only tier this crate populates today is L2 (file); the L1 slot
//! exists so an in-memory tier can be added later without touching the
//! engine.

use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{Cache, CacheBodyReader};
use crate::cache::metadata::CacheMetadata;
use crate::error::Result;

/// Top-level lock of the cache subsystem: acquired before either tier's
/// own mutex, and held for the duration of every operation.
#[derive(Debug)]
pub struct TwoTierCacheManager {
    l1: Option<Arc<dyn Cache>>,
    l2: Option<Arc<dyn Cache>>,
    lock: Mutex<()>,
}

impl TwoTierCacheManager {
    pub fn new(l1: Option<Arc<dyn Cache>>, l2: Option<Arc<dyn Cache>>) -> Self {
        TwoTierCacheManager { l1, l2, lock: Mutex::new(()) }
    }

    /// Convenience constructor for the common file-only configuration.
    pub fn file_only(l2: Arc<dyn Cache>) -> Self {
        TwoTierCacheManager::new(None, Some(l2))
    }
}

impl Cache for TwoTierCacheManager {
    fn get_metadata(&self, key: &str) -> Result<Option<CacheMetadata>> {
        let _guard = self.lock.lock().unwrap();
        if let Some(l1) = &self.l1 {
            if let Some(md) = l1.get_metadata(key)? {
                return Ok(Some(md));
            }
        }
        if let Some(l2) = &self.l2 {
            return l2.get_metadata(key);
        }
        Ok(None)
    }

    fn get_data(&self, key: &str) -> Result<Option<CacheBodyReader>> {
        let _guard = self.lock.lock().unwrap();
        if let Some(l1) = &self.l1 {
            if let Some(body) = l1.get_data(key)? {
                return Ok(Some(body));
            }
        }
        if let Some(l2) = &self.l2 {
            return l2.get_data(key);
        }
        Ok(None)
    }

    fn get(&self, key: &str) -> Result<Option<(CacheMetadata, CacheBodyReader)>> {
        let _guard = self.lock.lock().unwrap();
        if let Some(l1) = &self.l1 {
            if let Some(hit) = l1.get(key)? {
                return Ok(Some(hit));
            }
        }
        if let Some(l2) = &self.l2 {
            return l2.get(key);
        }
        Ok(None)
    }

    fn put_metadata(&self, key: &str, md: CacheMetadata) -> Result<bool> {
        let _guard = self.lock.lock().unwrap();
        let mut ok = false;
        if let Some(l1) = &self.l1 {
            ok |= l1.put_metadata(key, md.clone())?;
        }
        if let Some(l2) = &self.l2 {
            ok |= l2.put_metadata(key, md)?;
        }
        Ok(ok)
    }

    fn put(&self, key: &str, md: CacheMetadata, temp_file_path: &Path) -> Result<bool> {
        let _guard = self.lock.lock().unwrap();
        let mut ok = false;
        if let Some(l1) = &self.l1 {
            ok |= l1.put(key, md.clone(), temp_file_path)?;
        }
        if let Some(l2) = &self.l2 {
            ok |= l2.put(key, md, temp_file_path)?;
        }
        Ok(ok)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let _guard = self.lock.lock().unwrap();
        let l1_ok = match &self.l1 {
            Some(l1) => l1.remove(key)?,
            None => true,
        };
        let l2_ok = match &self.l2 {
            Some(l2) => l2.remove(key)?,
            None => true,
        };
        Ok(l1_ok && l2_ok)
    }

    fn release_data(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        if let Some(l1) = &self.l1 {
            l1.release_data(key)?;
        }
        if let Some(l2) = &self.l2 {
            l2.release_data(key)?;
        }
        Ok(())
    }

    fn purge(&self, may_delete_if_busy: bool) -> Result<bool> {
        let _guard = self.lock.lock().unwrap();
        let l1_ok = match &self.l1 {
            Some(l1) => l1.purge(may_delete_if_busy)?,
            None => true,
        };
        let l2_ok = match &self.l2 {
            Some(l2) => l2.purge(may_delete_if_busy)?,
            None => true,
        };
        Ok(l1_ok && l2_ok)
    }

    fn temp_dir(&self) -> Option<std::path::PathBuf> {
        self.l2.as_ref().and_then(|l2| l2.temp_dir())
    }
}
