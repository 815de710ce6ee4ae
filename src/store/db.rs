//! Cache Database (component A): a `rusqlite`-backed metadata store keyed
//! by cache key. One row per entry; enumerated in full on open, then
//! consulted/updated per operation under the File Cache's mutex.

use rusqlite::{params, Connection, OptionalExtension};

use crate::cache::metadata::CacheMetadata;
use crate::error::{EngineError, Result};

/// Owns the sqlite connection backing one File Cache's metadata.
#[derive(Debug)]
pub struct MetadataDb {
    conn: Connection,
}

impl MetadataDb {
    /// Opens (creating if absent) the metadata database at `path`.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                last_accessed_sec INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(MetadataDb { conn })
    }

    /// Opens an in-memory database, used by tests that don't need
    /// durability across a process restart.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                last_accessed_sec INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(MetadataDb { conn })
    }

    /// Enumerates every row, in whatever order sqlite returns them. LRU
    /// order is not reconstructed across restarts.
    pub fn enumerate(&self) -> Result<Vec<CacheMetadata>> {
        let mut stmt = self.conn.prepare("SELECT record FROM entries")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|json| serde_json::from_str(&json).ok())
            .collect())
    }

    /// Reads one row by key.
    pub fn get(&self, key: &str) -> Result<Option<CacheMetadata>> {
        let record: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match record {
            Some(json) => Some(
                serde_json::from_str(&json)
                    .map_err(|e| EngineError::Execution(e.to_string()))?,
            ),
            None => None,
        })
    }

    /// Inserts or replaces the row for `md.key`.
    pub fn put(&self, md: &CacheMetadata) -> Result<()> {
        let json = serde_json::to_string(md)
            .map_err(|e| EngineError::Execution(e.to_string()))?;
        self.conn.execute(
            "INSERT INTO entries (key, record, size_bytes, last_accessed_sec)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                record = excluded.record,
                size_bytes = excluded.size_bytes,
                last_accessed_sec = excluded.last_accessed_sec",
            params![
                md.key,
                json,
                md.response_body_size as i64,
                md.last_accessed_sec as i64
            ],
        )?;
        Ok(())
    }

    /// Updates only `last_accessed_sec` for `key`. Fails silently (returns
    /// `Ok(false)`) if the row no longer exists.
    pub fn touch(&self, key: &str, now_sec: u64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE entries SET last_accessed_sec = ?1 WHERE key = ?2",
            params![now_sec as i64, key],
        )?;
        Ok(changed > 0)
    }

    /// Deletes the row for `key`. Returns whether a row existed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let changed =
            self.conn.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use url::Url;

    fn sample(key: &str, size: u64) -> CacheMetadata {
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

    #[test]
    fn put_then_get_round_trips() {
        let db = MetadataDb::open_in_memory().unwrap();
        db.put(&sample("GET:https://example.com/", 10)).unwrap();
        let got = db.get("GET:https://example.com/").unwrap().unwrap();
        assert_eq!(got.response_body_size, 10);
    }

    #[test]
    fn enumerate_returns_all_rows() {
        let db = MetadataDb::open_in_memory().unwrap();
        db.put(&sample("a", 1)).unwrap();
        db.put(&sample("b", 2)).unwrap();
        assert_eq!(db.enumerate().unwrap().len(), 2);
    }

    #[test]
    fn touch_updates_last_accessed_and_reports_miss() {
        let db = MetadataDb::open_in_memory().unwrap();
        db.put(&sample("a", 1)).unwrap();
        assert!(db.touch("a", 99).unwrap());
        assert_eq!(db.get("a").unwrap().unwrap().last_accessed_sec, 99);
        assert!(!db.touch("missing", 99).unwrap());
    }

    #[test]
    fn delete_reports_presence() {
        let db = MetadataDb::open_in_memory().unwrap();
        db.put(&sample("a", 1)).unwrap();
        assert!(db.delete("a").unwrap());
        assert!(!db.delete("a").unwrap());
    }
}
