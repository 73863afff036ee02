//! RedbDatastore - a durable pin ledger backend on top of redb.

use bytes::Bytes;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use s5_pins_core::Datastore;
use std::{path::Path, sync::Arc};

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pins");

/// `Datastore` implementation backed by a single redb file.
#[derive(Clone)]
pub struct RedbDatastore {
    db: Arc<Database>,
}

impl RedbDatastore {
    /// Opens (or creates) `pins.redb` inside the directory `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let db = Database::create(path.join("pins.redb"))?;

        // Create the table up front so the first access may be a read,
        // which is what `PinStore::start` does on a fresh database.
        {
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(TABLE)?;
            }
            write_txn.commit()?;
        }

        Ok(Self { db: Arc::new(db) })
    }
}

impl std::fmt::Debug for RedbDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbDatastore").finish()
    }
}

#[async_trait::async_trait]
impl Datastore for RedbDatastore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        let db = self.db.clone();
        let key = key.to_owned();

        tokio::task::spawn_blocking(move || -> anyhow::Result<Option<Bytes>> {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(TABLE)?;
            Ok(table
                .get(key.as_str())?
                .map(|guard| Bytes::copy_from_slice(guard.value())))
        })
        .await
        .map_err(|e| anyhow::anyhow!("redb read task failed: {}", e))?
    }

    async fn put(&self, key: &str, value: Bytes) -> anyhow::Result<()> {
        let db = self.db.clone();
        let key = key.to_owned();

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(TABLE)?;
                table.insert(key.as_str(), value.as_ref())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("redb write task failed: {}", e))?
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let db = self.db.clone();
        let key = key.to_owned();

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(TABLE)?;
                table.remove(key.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("redb delete task failed: {}", e))?
    }

    async fn scan_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, Bytes)>> {
        let db = self.db.clone();
        let prefix = prefix.to_owned();

        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<(String, Bytes)>> {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(TABLE)?;
            let mut entries = Vec::new();
            for item in table.range(prefix.as_str()..)? {
                let (key, value) = item?;
                let key = key.value();
                // keys are ordered, so the first miss ends the prefix
                if !key.starts_with(prefix.as_str()) {
                    break;
                }
                entries.push((key.to_owned(), Bytes::copy_from_slice(value.value())));
            }
            Ok(entries)
        })
        .await
        .map_err(|e| anyhow::anyhow!("redb scan task failed: {}", e))?
    }
}
