use crate::fits::scan::{HeaderEntry, ParsedHeaders};
use rusqlite::{Connection, Result as SqlResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The HeaderCache stores parsed FITS headers for one target directory
/// in a SQLite file inside that directory.
///
/// Reads and writes are wholesale: `set` replaces everything, there is no
/// partial update.
pub struct HeaderCache {
    conn: Connection,
    db_path: PathBuf,
}

impl HeaderCache {
    /// Open (or create) the cache file `<target_dir>/<cache_name>`.
    ///
    /// With `reset`, any cached content is dropped first.
    pub fn open(target_dir: &Path, cache_name: &str, reset: bool) -> SqlResult<Self> {
        let db_path = target_dir.join(cache_name);
        let conn = Connection::open(&db_path)?;

        tracing::debug!("Header cache at {}", db_path.display());

        let cache = HeaderCache { conn, db_path };
        cache.init_schema(reset)?;
        Ok(cache)
    }

    /// Create the tables, dropping them first when `reset` is set
    fn init_schema(&self, reset: bool) -> SqlResult<()> {
        if reset {
            self.conn.execute_batch(
                "DROP TABLE IF EXISTS headers;
                 DROP TABLE IF EXISTS skipped;",
            )?;
        }

        // One row per header field, keyed by the file it came from
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS headers (
                file    TEXT NOT NULL,
                key     TEXT NOT NULL,
                value   TEXT NOT NULL
            )",
            [],
        )?;

        // Files whose headers could not be parsed
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS skipped (
                file    TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_headers_file ON headers(file)",
            [],
        )?;

        Ok(())
    }

    /// Get the path to the cache file
    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Everything currently cached
    pub fn get(&self) -> SqlResult<ParsedHeaders> {
        let mut stmt = self.conn.prepare("SELECT file, key, value FROM headers ORDER BY rowid")?;
        let entries = stmt
            .query_map([], |row| {
                Ok(HeaderEntry {
                    file: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut stmt = self.conn.prepare("SELECT file FROM skipped ORDER BY rowid")?;
        let skipped = stmt
            .query_map([], |row| row.get(0))?
            .collect::<SqlResult<Vec<String>>>()?;

        Ok(ParsedHeaders { entries, skipped })
    }

    /// Replace the cache content wholesale
    pub fn set(&mut self, parsed: &ParsedHeaders) -> SqlResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM headers", [])?;
        tx.execute("DELETE FROM skipped", [])?;
        {
            let mut insert = tx.prepare("INSERT INTO headers (file, key, value) VALUES (?1, ?2, ?3)")?;
            for entry in &parsed.entries {
                insert.execute(rusqlite::params![entry.file, entry.key, entry.value])?;
            }
            let mut insert = tx.prepare("INSERT INTO skipped (file) VALUES (?1)")?;
            for file in &parsed.skipped {
                insert.execute([file])?;
            }
        }
        tx.commit()?;

        tracing::debug!(
            "Cached {} header fields, {} skipped files",
            parsed.entries.len(),
            parsed.skipped.len()
        );
        Ok(())
    }

    /// Drop all cached content
    pub fn invalidate(&self) -> SqlResult<()> {
        self.conn.execute_batch(
            "DELETE FROM headers;
             DELETE FROM skipped;",
        )?;
        tracing::info!("Header cache invalidated: {}", self.db_path.display());
        Ok(())
    }

    /// Cached headers for `files`, or None when any scanned file is not cached.
    ///
    /// A file counts as cached when it has header rows or is recorded as skipped.
    pub fn lookup(&self, files: &[PathBuf]) -> SqlResult<Option<ParsedHeaders>> {
        let cached = self.get()?;
        let known: HashSet<&str> = cached
            .entries
            .iter()
            .map(|e| e.file.as_str())
            .chain(cached.skipped.iter().map(String::as_str))
            .collect();

        let scanned: HashSet<String> = files.iter().map(|f| f.to_string_lossy().to_string()).collect();
        if scanned.iter().any(|f| !known.contains(f.as_str())) {
            return Ok(None);
        }

        Ok(Some(ParsedHeaders {
            entries: cached
                .entries
                .iter()
                .filter(|e| scanned.contains(&e.file))
                .cloned()
                .collect(),
            skipped: cached
                .skipped
                .iter()
                .filter(|f| scanned.contains(*f))
                .cloned()
                .collect(),
        }))
    }
}

/// A store the sync engine can mark stale after headers change in place
pub trait CacheInvalidation {
    fn invalidate_cache(&mut self) -> crate::error::Result<()>;
}

impl CacheInvalidation for HeaderCache {
    fn invalidate_cache(&mut self) -> crate::error::Result<()> {
        Ok(self.invalidate()?)
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for HeaderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderCache")
            .field("db_path", &self.db_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParsedHeaders {
        ParsedHeaders {
            entries: vec![
                HeaderEntry::new("/d/a.fits", "OBJECT", "M 31"),
                HeaderEntry::new("/d/a.fits", "EXPTIME", "300"),
                HeaderEntry::new("/d/b.fits", "OBJECT", "M 42"),
            ],
            skipped: vec!["/d/c.fits".to_string()],
        }
    }

    #[test]
    fn test_set_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HeaderCache::open(dir.path(), ".cache", false).unwrap();
        cache.set(&sample()).unwrap();

        let got = cache.get().unwrap();
        assert_eq!(got.entries, sample().entries);
        assert_eq!(got.skipped, sample().skipped);
    }

    #[test]
    fn test_set_replaces_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HeaderCache::open(dir.path(), ".cache", false).unwrap();
        cache.set(&sample()).unwrap();
        cache
            .set(&ParsedHeaders {
                entries: vec![HeaderEntry::new("/d/x.fits", "OBJECT", "NGC 7000")],
                skipped: vec![],
            })
            .unwrap();

        let got = cache.get().unwrap();
        assert_eq!(got.entries.len(), 1);
        assert!(got.skipped.is_empty());
    }

    #[test]
    fn test_lookup_hit_and_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = HeaderCache::open(dir.path(), ".cache", false).unwrap();
        cache.set(&sample()).unwrap();

        // a.fits and the skipped c.fits are known: hit, filtered to scanned files
        let hit = cache
            .lookup(&[PathBuf::from("/d/a.fits"), PathBuf::from("/d/c.fits")])
            .unwrap()
            .unwrap();
        assert_eq!(hit.entries.len(), 2);
        assert_eq!(hit.skipped, vec!["/d/c.fits".to_string()]);

        // new file: miss
        assert!(cache.lookup(&[PathBuf::from("/d/new.fits")]).unwrap().is_none());
    }

    #[test]
    fn test_invalidate_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = HeaderCache::open(dir.path(), ".cache", false).unwrap();
            cache.set(&sample()).unwrap();
        }
        {
            let cache = HeaderCache::open(dir.path(), ".cache", false).unwrap();
            assert_eq!(cache.get().unwrap().entries.len(), 3);
            cache.invalidate().unwrap();
            assert!(cache.get().unwrap().entries.is_empty());
        }
        let mut cache = HeaderCache::open(dir.path(), ".cache", false).unwrap();
        cache.set(&sample()).unwrap();
        let cache = HeaderCache::open(dir.path(), ".cache", true).unwrap();
        assert!(cache.get().unwrap().entries.is_empty());
    }
}
