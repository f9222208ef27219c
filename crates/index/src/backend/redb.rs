//! Redb backend for persistent ACFP index storage.
//!
//! Redb is a pure Rust embedded key-value store with ACID transactions. Every
//! `put`/`batch_put` is one write transaction, which gives the store its
//! "one writer transaction per insert" behaviour.
//!
//! # Configuration Example
//! ```yaml
//! index:
//!   backend: "redb"
//!   path: "/data/acfp.redb"
//! ```

use crate::{IndexBackend, IndexError};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

const ACFP_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("acfp_data");

/// Redb backend implementation for persistent key-value storage.
///
/// The `Arc<Database>` wrapper allows sharing across threads; redb handles
/// its own locking and MVCC.
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open or create a Redb database at the given path.
    ///
    /// ```no_run
    /// use index::RedbBackend;
    ///
    /// let backend = RedbBackend::open("/tmp/acfp.redb").unwrap();
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let db = Database::create(path).map_err(IndexError::backend)?;

        // Opening the table inside a write transaction creates it.
        let write_txn = db.begin_write().map_err(IndexError::backend)?;
        {
            let _table = write_txn
                .open_table(ACFP_TABLE)
                .map_err(IndexError::backend)?;
        }
        write_txn.commit().map_err(IndexError::backend)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn write<F>(&self, apply: F) -> Result<(), IndexError>
    where
        F: FnOnce(&mut redb::Table<'_, &'static str, &'static [u8]>) -> Result<(), IndexError>,
    {
        let write_txn = self.db.begin_write().map_err(IndexError::backend)?;
        {
            let mut table = write_txn
                .open_table(ACFP_TABLE)
                .map_err(IndexError::backend)?;
            apply(&mut table)?;
        }
        write_txn.commit().map_err(IndexError::backend)
    }
}

impl IndexBackend for RedbBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError> {
        self.write(|table| {
            table.insert(key, value).map_err(IndexError::backend)?;
            Ok(())
        })
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
        let read_txn = self.db.begin_read().map_err(IndexError::backend)?;
        let table = read_txn
            .open_table(ACFP_TABLE)
            .map_err(IndexError::backend)?;

        Ok(table
            .get(key)
            .map_err(IndexError::backend)?
            .map(|value| value.value().to_vec()))
    }

    fn delete(&self, key: &str) -> Result<(), IndexError> {
        self.write(|table| {
            table.remove(key).map_err(IndexError::backend)?;
            Ok(())
        })
    }

    fn batch_put(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), IndexError> {
        self.write(|table| {
            for (key, value) in &entries {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(IndexError::backend)?;
            }
            Ok(())
        })
    }

    fn batch_delete(&self, keys: Vec<String>) -> Result<(), IndexError> {
        self.write(|table| {
            for key in &keys {
                table.remove(key.as_str()).map_err(IndexError::backend)?;
            }
            Ok(())
        })
    }

    fn scan_prefix(
        &self,
        prefix: &str,
        visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let read_txn = self.db.begin_read().map_err(IndexError::backend)?;
        let table = read_txn
            .open_table(ACFP_TABLE)
            .map_err(IndexError::backend)?;

        for item in table.range(prefix..).map_err(IndexError::backend)? {
            let (key, value) = item.map_err(IndexError::backend)?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            visitor(key, value.value())?;
        }
        Ok(())
    }
}
