use crate::IndexError;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Trait for a key-value storage backend for the index.
/// This allows for different storage implementations (e.g., in-memory, Redb).
///
/// Keys are UTF-8 strings; records of one kind share a prefix (`track/`,
/// `fp/`, `bin/`, `meta/`) so they can be enumerated with [`scan_prefix`].
///
/// [`scan_prefix`]: IndexBackend::scan_prefix
pub trait IndexBackend: Send + Sync {
    /// Insert or update a key-value pair.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError>;
    /// Retrieve a value by key.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError>;
    /// Delete a key-value pair. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), IndexError>;
    /// Insert or update multiple key-value pairs in one write transaction.
    fn batch_put(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), IndexError>;
    /// Delete multiple keys in one write transaction.
    fn batch_delete(&self, keys: Vec<String>) -> Result<(), IndexError>;
    /// Visit every entry whose key starts with `prefix`, in key order.
    fn scan_prefix(
        &self,
        prefix: &str,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError>;
    /// Flush any buffered writes to the backend.
    fn flush(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

/// Configuration for selecting and building a backend.
///
/// # Example
/// ```
/// use index::BackendConfig;
///
/// // In-memory (for testing)
/// let config = BackendConfig::in_memory();
///
/// // Redb (pure Rust, persistent)
/// let config = BackendConfig::redb("/data/acfp.redb");
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub enum BackendConfig {
    /// Use Redb for storage. The `path` is the file path for the database.
    ///
    /// Requires the `backend-redb` feature (enabled by default).
    Redb { path: String },
    /// Use an in-memory map for storage. Contents are lost on drop.
    #[default]
    InMemory,
}

impl BackendConfig {
    pub fn in_memory() -> Self {
        BackendConfig::InMemory
    }

    pub fn redb<P: Into<String>>(path: P) -> Self {
        BackendConfig::Redb { path: path.into() }
    }

    /// Build the backend described by this configuration.
    pub fn build(&self) -> Result<Box<dyn IndexBackend>, IndexError> {
        match self {
            BackendConfig::InMemory => Ok(Box::new(InMemoryBackend::new())),
            BackendConfig::Redb { path } => {
                #[cfg(feature = "backend-redb")]
                {
                    Ok(Box::new(RedbBackend::open(path)?))
                }
                #[cfg(not(feature = "backend-redb"))]
                {
                    let _ = path;
                    Err(IndexError::backend("redb backend disabled at compile time"))
                }
            }
        }
    }
}

/// A shared backend handle, so several index instances can reopen the same
/// records.
impl<B: IndexBackend + ?Sized> IndexBackend for std::sync::Arc<B> {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError> {
        (**self).put(key, value)
    }
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        (**self).get(key)
    }
    fn delete(&self, key: &str) -> Result<(), IndexError> {
        (**self).delete(key)
    }
    fn batch_put(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), IndexError> {
        (**self).batch_put(entries)
    }
    fn batch_delete(&self, keys: Vec<String>) -> Result<(), IndexError> {
        (**self).batch_delete(keys)
    }
    fn scan_prefix(
        &self,
        prefix: &str,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        (**self).scan_prefix(prefix, visitor)
    }
    fn flush(&self) -> Result<(), IndexError> {
        (**self).flush()
    }
}

/// An in-memory backend using a `RwLock` around an ordered map.
#[derive(Default)]
pub struct InMemoryBackend {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexBackend for InMemoryBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError> {
        self.records
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        let guard = self
            .records
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        Ok(guard.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), IndexError> {
        self.records
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?
            .remove(key);
        Ok(())
    }

    fn batch_put(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), IndexError> {
        // A single write lock is held for the entire batch.
        let mut guard = self
            .records
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        for (key, value) in entries {
            guard.insert(key, value);
        }
        Ok(())
    }

    fn batch_delete(&self, keys: Vec<String>) -> Result<(), IndexError> {
        let mut guard = self
            .records
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        for key in keys {
            guard.remove(&key);
        }
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let guard = self
            .records
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        for (key, value) in guard.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            visitor(key, value)?;
        }
        Ok(())
    }
}

/// The Redb backend implementation.
#[cfg(feature = "backend-redb")]
pub mod redb;

#[cfg(feature = "backend-redb")]
pub use self::redb::RedbBackend;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_roundtrip_and_delete() {
        let backend = InMemoryBackend::new();
        backend.put("track/01", b"a").unwrap();
        assert_eq!(backend.get("track/01").unwrap(), Some(b"a".to_vec()));
        backend.delete("track/01").unwrap();
        assert_eq!(backend.get("track/01").unwrap(), None);
        backend.delete("track/01").unwrap();
    }

    #[test]
    fn scan_prefix_visits_only_matching_keys_in_order() {
        let backend = InMemoryBackend::new();
        backend
            .batch_put(vec![
                ("fp/02".into(), b"2".to_vec()),
                ("bin/00".into(), b"x".to_vec()),
                ("fp/01".into(), b"1".to_vec()),
                ("fq/00".into(), b"y".to_vec()),
            ])
            .unwrap();

        let mut seen = Vec::new();
        backend
            .scan_prefix("fp/", &mut |key, value| {
                seen.push((key.to_string(), value.to_vec()));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                ("fp/01".to_string(), b"1".to_vec()),
                ("fp/02".to_string(), b"2".to_vec())
            ]
        );
    }

    #[test]
    fn batch_delete_removes_all_keys() {
        let backend = InMemoryBackend::new();
        backend.put("a", b"1").unwrap();
        backend.put("b", b"2").unwrap();
        backend
            .batch_delete(vec!["a".into(), "b".into(), "c".into()])
            .unwrap();
        assert_eq!(backend.get("a").unwrap(), None);
        assert_eq!(backend.get("b").unwrap(), None);
    }

    #[test]
    fn in_memory_config_builds() {
        let backend = BackendConfig::in_memory().build().unwrap();
        backend.put("k", b"v").unwrap();
        assert_eq!(backend.get("k").unwrap(), Some(b"v".to_vec()));
    }
}
