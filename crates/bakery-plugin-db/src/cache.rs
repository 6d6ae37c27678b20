use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::plugin::{normalize_key, relative_key, Plugin};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read plugin cache: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse plugin cache: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to encode cached plugin: {0}")]
    Encode(#[from] bincode::Error),
    #[error("{} is outside of the base directory", .0.display())]
    OutsideBase(PathBuf),
}

/// Stable 64-bit index of a base-relative path. Only an index: lookups compare the path too.
pub fn path_hash(relative_path: &str) -> i64 {
    let key = normalize_key(relative_path).unwrap_or_else(|| relative_path.to_owned());
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_le_bytes(bytes)
}

/// Modification time and size of a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub modified: DateTime<Utc>,
    pub size: u64,
}

impl Fingerprint {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            modified: DateTime::<Utc>::from(metadata.modified()?),
            size: metadata.len(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub hash: i64,
    /// Path relative to the base directory with `/` separators.
    pub path: String,
    pub last_write_time: DateTime<Utc>,
    pub file_size: u64,
    pub serialized: Vec<u8>,
}

impl CacheRecord {
    pub fn new(
        path: impl Into<String>,
        last_write_time: DateTime<Utc>,
        file_size: u64,
        serialized: Vec<u8>,
    ) -> Self {
        let path = path.into();
        let path = normalize_key(&path).unwrap_or(path);
        Self {
            hash: path_hash(&path),
            path,
            last_write_time,
            file_size,
            serialized,
        }
    }

    /// Captures the current on-disk fingerprint of `plugin` together with its encoded form.
    pub fn from_plugin(base_dir: &Path, plugin: &Plugin) -> Result<Self, StoreError> {
        let relative = relative_key(base_dir, &plugin.full_path)
            .ok_or_else(|| StoreError::OutsideBase(plugin.full_path.clone()))?;
        let fingerprint = Fingerprint::of(&plugin.full_path)?;
        Ok(Self::new(
            relative,
            fingerprint.modified,
            fingerprint.size,
            bincode::serialize(plugin)?,
        ))
    }

    fn matches(&self, hash: i64, path: &str, fingerprint: &Fingerprint) -> bool {
        self.hash == hash
            && self.path == path
            && self.last_write_time == fingerprint.modified
            && self.file_size == fingerprint.size
    }
}

/// Read-only bulk access to the persisted cache table.
pub trait CacheTable: Send + Sync {
    fn scan(&self) -> Result<Vec<CacheRecord>, StoreError>;
}

/// On-disk layout of [`JsonCacheTable`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheFile {
    pub records: Vec<CacheRecord>,
}

/// Cache table persisted as a JSON document. A missing file is an empty table.
#[derive(Debug, Clone)]
pub struct JsonCacheTable {
    path: PathBuf,
}

impl JsonCacheTable {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheTable for JsonCacheTable {
    fn scan(&self) -> Result<Vec<CacheRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let file: CacheFile = serde_json::from_str(&raw)?;
        Ok(file.records)
    }
}

/// In-memory cache table, used by tools that build a table on the fly.
#[derive(Debug, Default)]
pub struct MemoryCacheTable {
    records: RwLock<Vec<CacheRecord>>,
}

impl MemoryCacheTable {
    pub fn new(records: Vec<CacheRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn insert(&self, record: CacheRecord) {
        let mut records = self.records.write();
        records.retain(|existing| existing.path != record.path);
        records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl CacheTable for MemoryCacheTable {
    fn scan(&self) -> Result<Vec<CacheRecord>, StoreError> {
        Ok(self.records.read().clone())
    }
}

/// Read-only copy of the cache table taken once per load batch.
#[derive(Debug, Default)]
pub struct CacheSnapshot {
    records: Vec<CacheRecord>,
    by_hash: HashMap<i64, Vec<usize>>,
}

impl CacheSnapshot {
    pub fn capture(table: &dyn CacheTable) -> Result<Self, StoreError> {
        Ok(Self::from_records(table.scan()?))
    }

    pub fn from_records(records: Vec<CacheRecord>) -> Self {
        let mut by_hash: HashMap<i64, Vec<usize>> = HashMap::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            by_hash.entry(record.hash).or_default().push(index);
        }
        Self { records, by_hash }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the cached plugin for `relative_path` if every part of the fingerprint matches.
    /// Mismatches, undecodable blobs and paths climbing above the base are misses.
    pub fn lookup(&self, relative_path: &str, fingerprint: &Fingerprint) -> Option<Plugin> {
        let path = normalize_key(relative_path)?;
        let hash = path_hash(&path);
        let record = self
            .by_hash
            .get(&hash)?
            .iter()
            .map(|&index| &self.records[index])
            .find(|record| record.matches(hash, &path, fingerprint))?;
        match bincode::deserialize::<Plugin>(&record.serialized) {
            Ok(plugin) if !plugin.is_directory() => Some(plugin),
            Ok(_) => {
                log::debug!("cache entry for {path} holds a directory node, ignoring");
                None
            }
            Err(err) => {
                log::debug!("cache entry for {path} is unreadable: {err}");
                None
            }
        }
    }
}
