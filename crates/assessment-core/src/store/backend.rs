// ============================================================================
// Storage Backends - redb file database and in-memory map
// ============================================================================
// The result store only needs flat string keys to byte values. The redb
// backend is the durable default; the memory backend serves tests and
// ephemeral runs and can simulate a storage quota.
// ============================================================================

use redb::{Database, TableDefinition};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use super::StoreError;

// Single flat table mirroring the browser's key-value storage
const LOCAL: TableDefinition<&str, &[u8]> = TableDefinition::new("local");

/// Flat key-value storage the result store writes through
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the value at `key`
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Returns whether a value was removed
    fn remove(&self, key: &str) -> Result<bool, StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Human-readable location for diagnostics
    fn describe(&self) -> String;
}

/// Embedded redb database
pub struct RedbBackend {
    db: Database,
    path: PathBuf,
}

impl RedbBackend {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses GIFTS_DB_PATH env var or ~/.gifts/assessment.redb
    pub fn open(path: Option<&str>) -> Result<Self, StoreError> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("GIFTS_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or(StoreError::HomeDirUnavailable)?;
            let gifts_dir = home.join(".gifts");
            std::fs::create_dir_all(&gifts_dir)
                .map_err(|e| StoreError::Backend(format!("Failed to create .gifts directory: {}", e)))?;
            gifts_dir.join("assessment.redb")
        };

        info!("Opening result store at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| StoreError::Backend(format!("Failed to open database: {}", e)))?;

        // Ensure the table exists so read transactions never miss it
        let write_txn = db
            .begin_write()
            .map_err(|e| StoreError::Backend(format!("Failed to begin write: {}", e)))?;
        {
            let _ = write_txn
                .open_table(LOCAL)
                .map_err(|e| StoreError::Backend(format!("Failed to create local table: {}", e)))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::Backend(format!("Failed to commit init: {}", e)))?;

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for RedbBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Backend(format!("Failed to begin read: {}", e)))?;
        let table = read_txn
            .open_table(LOCAL)
            .map_err(|e| StoreError::Backend(format!("Failed to open local table: {}", e)))?;

        let value = table
            .get(key)
            .map_err(|e| StoreError::Backend(format!("Failed to get {}: {}", key, e)))?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Backend(format!("Failed to begin write: {}", e)))?;
        {
            let mut table = write_txn
                .open_table(LOCAL)
                .map_err(|e| StoreError::Backend(format!("Failed to open local table: {}", e)))?;
            table
                .insert(key, value)
                .map_err(|e| StoreError::Backend(format!("Failed to insert {}: {}", key, e)))?;
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::Backend(format!("Failed to commit: {}", e)))?;

        debug!("Stored {} ({} bytes)", key, value.len());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StoreError::Backend(format!("Failed to begin write: {}", e)))?;
        let removed;
        {
            let mut table = write_txn
                .open_table(LOCAL)
                .map_err(|e| StoreError::Backend(format!("Failed to open local table: {}", e)))?;
            removed = table
                .remove(key)
                .map_err(|e| StoreError::Backend(format!("Failed to remove {}: {}", key, e)))?
                .is_some();
        }
        write_txn
            .commit()
            .map_err(|e| StoreError::Backend(format!("Failed to commit delete: {}", e)))?;

        if removed {
            debug!("Removed {}", key);
        }
        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StoreError::Backend(format!("Failed to begin read: {}", e)))?;
        let table = read_txn
            .open_table(LOCAL)
            .map_err(|e| StoreError::Backend(format!("Failed to open local table: {}", e)))?;

        let mut keys = Vec::new();
        let iter = table
            .range::<&str>(..)
            .map_err(|e| StoreError::Backend(format!("Failed to iterate keys: {}", e)))?;
        for entry in iter {
            let (key, _value) =
                entry.map_err(|e| StoreError::Backend(format!("Failed to read entry: {}", e)))?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process map, optionally capped at a total byte quota
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    quota_bytes: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes that would push total stored bytes past `quota_bytes`
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.lock()?;

        if let Some(quota) = self.quota_bytes {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    quota,
                });
            }
        }

        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.lock()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn describe(&self) -> String {
        match self.quota_bytes {
            Some(quota) => format!("in-memory (quota {} bytes)", quota),
            None => "in-memory".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("gifts-test-{}.redb", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_redb_put_get_remove() {
        let path = temp_db_path();
        let backend = RedbBackend::open(path.to_str()).unwrap();

        assert_eq!(backend.get("currentUserId").unwrap(), None);
        backend.put("currentUserId", b"\"u-1\"").unwrap();
        backend.put("userInfo", b"{}").unwrap();
        assert_eq!(backend.get("currentUserId").unwrap().as_deref(), Some(&b"\"u-1\""[..]));
        assert_eq!(backend.keys().unwrap(), vec!["currentUserId", "userInfo"]);

        assert!(backend.remove("userInfo").unwrap());
        assert!(!backend.remove("userInfo").unwrap());
        assert_eq!(backend.path(), path.as_path());

        drop(backend);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_redb_survives_reopen() {
        let path = temp_db_path();
        {
            let backend = RedbBackend::open(path.to_str()).unwrap();
            backend.put("currentResult", b"{\"x\":1}").unwrap();
        }
        let reopened = RedbBackend::open(path.to_str()).unwrap();
        assert_eq!(
            reopened.get("currentResult").unwrap().as_deref(),
            Some(&b"{\"x\":1}"[..])
        );

        drop(reopened);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_memory_quota_rejects_oversized_write() {
        let backend = MemoryBackend::with_quota(16);
        backend.put("a", b"0123456789").unwrap();

        let err = backend.put("b", b"0123456789").unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));
        assert_eq!(backend.get("b").unwrap(), None);

        // Replacing an existing key only counts the new value
        backend.put("a", b"abcdefghijklm").unwrap();
    }
}
