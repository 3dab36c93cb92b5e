//! LMDB-backed disk tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped,
//! crash-durable key-value store. One [`LmdbStore`] environment holds a
//! named database per artifact kind (`swatches`, `themes`), so both disk
//! tiers share a single map and a single file lock.
//!
//! # Value Layout
//!
//! `[written_at: 8 bytes little-endian millis][json value]`

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use swatchbook_core::{StorageError, SwatchbookError, SwatchbookResult};

use super::traits::{Cache, Cacheable, DiskCache};

const TIMESTAMP_LEN: usize = 8;
const MAX_DBS: u32 = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for SwatchbookError {
    fn from(e: LmdbCacheError) -> Self {
        let storage = match e {
            LmdbCacheError::EnvOpen(reason) | LmdbCacheError::DbOpen(reason) => {
                StorageError::Unavailable { reason }
            }
            LmdbCacheError::Io(err) => StorageError::Unavailable {
                reason: err.to_string(),
            },
            other => StorageError::TransactionFailed {
                reason: other.to_string(),
            },
        };
        SwatchbookError::Storage(storage)
    }
}

/// Shared LMDB environment.
///
/// Cheap to clone; every clone refers to the same memory map.
#[derive(Clone)]
pub struct LmdbStore {
    env: Env,
    path: PathBuf,
}

impl LmdbStore {
    /// Open (or create) an environment rooted at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(MAX_DBS)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), max_size_mb, "opened lmdb store");

        Ok(Self {
            env,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Disk tier for one artifact kind.
pub struct LmdbDiskCache<T> {
    env: Env,
    db: Database<Str, Bytes>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Cacheable> LmdbDiskCache<T> {
    /// Open the `T::kind()` database inside `store`, creating it if needed.
    pub fn open(store: &LmdbStore) -> Result<Self, LmdbCacheError> {
        let env = store.env.clone();

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, Some(T::kind()))
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            _kind: PhantomData,
        })
    }

    fn encode(key: &str, value: &T, written_at: DateTime<Utc>) -> Result<Vec<u8>, LmdbCacheError> {
        let value_bytes = serde_json::to_vec(value)
            .map_err(|e| LmdbCacheError::Serialization(format!("{}: {}", key, e)))?;

        let mut full_bytes = Vec::with_capacity(TIMESTAMP_LEN + value_bytes.len());
        full_bytes.extend_from_slice(&written_at.timestamp_millis().to_le_bytes());
        full_bytes.extend_from_slice(&value_bytes);
        Ok(full_bytes)
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<(T, DateTime<Utc>), LmdbCacheError> {
        if bytes.len() < TIMESTAMP_LEN {
            return Err(LmdbCacheError::Deserialization(format!(
                "{}: truncated entry ({} bytes)",
                key,
                bytes.len()
            )));
        }

        let timestamp_bytes: [u8; TIMESTAMP_LEN] = bytes[0..TIMESTAMP_LEN]
            .try_into()
            .map_err(|_| LmdbCacheError::Deserialization("Invalid timestamp".into()))?;
        let written_at = DateTime::from_timestamp_millis(i64::from_le_bytes(timestamp_bytes))
            .unwrap_or_else(Utc::now);

        let value: T = serde_json::from_slice(&bytes[TIMESTAMP_LEN..])
            .map_err(|e| LmdbCacheError::Deserialization(format!("{}: {}", key, e)))?;

        Ok((value, written_at))
    }

    fn write_entries<'a, I>(&self, entries: I) -> Result<(), LmdbCacheError>
    where
        I: IntoIterator<Item = (&'a str, &'a T)>,
    {
        let now = Utc::now();
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        for (key, value) in entries {
            let bytes = Self::encode(key, value, now)?;
            self.db
                .put(&mut wtxn, key, &bytes)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        self.db
            .len(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))
    }

    pub fn is_empty(&self) -> Result<bool, LmdbCacheError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl<T: Cacheable> Cache<T> for LmdbDiskCache<T> {
    async fn get(&self, key: &str) -> SwatchbookResult<Option<T>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        match self.db.get(&rtxn, key) {
            Ok(Some(bytes)) => {
                let (value, _) = Self::decode(key, bytes)?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(LmdbCacheError::Transaction(e.to_string()).into()),
        }
    }

    async fn set(&self, key: &str, value: T) -> SwatchbookResult<()> {
        self.write_entries([(key, &value)])?;
        Ok(())
    }

    async fn contains_key(&self, key: &str) -> SwatchbookResult<bool> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        let found = self
            .db
            .get(&rtxn, key)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            .is_some();
        Ok(found)
    }

    async fn put_all(&self, entries: Vec<(String, T)>) -> SwatchbookResult<()> {
        self.write_entries(entries.iter().map(|(k, v)| (k.as_str(), v)))?;
        Ok(())
    }
}

#[async_trait]
impl<T: Cacheable> DiskCache<T> for LmdbDiskCache<T> {
    async fn select_all(&self) -> SwatchbookResult<Vec<(String, T)>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut entries = Vec::new();
        for result in iter {
            let (key, bytes) = match result {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(kind = T::kind(), error = %e, "lmdb cursor error during scan");
                    continue;
                }
            };
            match Self::decode(key, bytes) {
                Ok((value, _)) => entries.push((key.to_string(), value)),
                Err(e) => {
                    tracing::warn!(kind = T::kind(), key, error = %e, "skipping corrupt entry");
                }
            }
        }

        Ok(entries)
    }

    async fn remove_older_than(&self, max_age: Duration) -> SwatchbookResult<u64> {
        let max_age = chrono::Duration::from_std(max_age).map_err(|e| {
            SwatchbookError::Storage(StorageError::TransactionFailed {
                reason: format!("invalid max age: {}", e),
            })
        })?;
        let cutoff = Utc::now() - max_age;

        let stale: Vec<String> = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let iter = self
                .db
                .iter(&rtxn)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

            iter.filter_map(Result::ok)
                .filter(|(key, bytes)| match Self::decode(key, bytes) {
                    Ok((_, written_at)) => written_at < cutoff,
                    // Unreadable entries are never served, drop them too.
                    Err(_) => true,
                })
                .map(|(key, _)| key.to_string())
                .collect()
        };

        if stale.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in &stale {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        tracing::debug!(kind = T::kind(), deleted, "pruned stale disk entries");
        Ok(deleted)
    }
}
