//! Content-addressed storage for grammar check results.
//!
//! Results are keyed by the SHA-256 of the sentence text. The table is
//! append-only: repeated stores of the same sentence add rows, and lookups
//! read the first matching one.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::CheckResult;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("cached result is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("cache connection lock poisoned")]
    Poisoned,
}

/// Lowercase hex SHA-256 of `text`.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Persistent cache of check results.
pub struct FingerprintCache {
    db: Mutex<Connection>,
}

impl FingerprintCache {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS sentences (
            sentence_hash TEXT NOT NULL,
            sentence TEXT NOT NULL,
            result TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sentences_hash
        ON sentences(sentence_hash);
    ";

    /// Open or create the cache database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create cache directory: {}", parent.display())
                })?;
            }
        }

        let db = Connection::open(path)
            .with_context(|| format!("Failed to open grammar cache at {}", path.display()))?;
        db.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to set grammar cache pragmas")?;
        Self::initialize(db)
    }

    /// Open an in-memory cache.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory grammar cache")?;
        Self::initialize(db)
    }

    fn initialize(db: Connection) -> Result<Self> {
        db.execute_batch(Self::SCHEMA)
            .context("Failed to create grammar cache schema")?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Look up the stored verdict for `text`.
    ///
    /// Rows are read in insertion order and the first one that parses wins,
    /// so a verdict appended after a corrupt row is still found. `Corrupt` is
    /// returned only when no row for `text` parses.
    pub fn lookup(&self, text: &str) -> Result<Option<CheckResult>, CacheError> {
        let db = self.db.lock().map_err(|_| CacheError::Poisoned)?;
        let mut stmt =
            db.prepare("SELECT result FROM sentences WHERE sentence_hash = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map(params![fingerprint(text)], |row| row.get::<_, String>(0))?;

        let mut corrupt = None;
        for row in rows {
            match serde_json::from_str(&row?) {
                Ok(result) => return Ok(Some(result)),
                Err(error) => {
                    corrupt.get_or_insert(error);
                }
            }
        }

        match corrupt {
            Some(error) => Err(CacheError::Corrupt(error)),
            None => Ok(None),
        }
    }

    /// Append a verdict for `text`.
    pub fn store(&self, text: &str, result: &CheckResult) -> Result<(), CacheError> {
        let json = serde_json::to_string(result)?;
        let db = self.db.lock().map_err(|_| CacheError::Poisoned)?;
        db.execute(
            "INSERT INTO sentences (sentence_hash, sentence, result) VALUES (?1, ?2, ?3)",
            params![fingerprint(text), text, json],
        )?;
        Ok(())
    }

    /// Run `f` against the raw connection.
    #[cfg(test)]
    pub(super) fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> R) -> R {
        let db = self.db.lock().unwrap();
        f(&db)
    }

    /// Number of stored rows, duplicates included.
    pub fn row_count(&self) -> Result<usize, CacheError> {
        let db = self.db.lock().map_err(|_| CacheError::Poisoned)?;
        let count: i64 = db.query_row("SELECT COUNT(*) FROM sentences", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
