//! Persistent ledger of pin records.
//!
//! Records live in a [`Datastore`] under `/<prefix>/<owner>/<id>`, encoded
//! as CBOR. The datastore is the single source of truth for record status.

use crate::pin::PinRecord;
use anyhow::{Context, bail};
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;

/// Ordered key-value storage used by the ledger and by local pin indexes.
#[async_trait::async_trait]
pub trait Datastore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>>;

    async fn put(&self, key: &str, value: Bytes) -> anyhow::Result<()>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Returns every entry whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, Bytes)>>;
}

#[derive(Clone, Debug)]
pub struct PinLedger {
    store: Arc<dyn Datastore>,
    prefix: String,
}

impl PinLedger {
    pub fn new(store: Arc<dyn Datastore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.store
    }

    fn owner_prefix(&self, owner: &str) -> anyhow::Result<String> {
        if owner.is_empty() || owner.contains('/') {
            bail!("invalid owner id {owner:?}");
        }
        Ok(format!("/{}/{}/", self.prefix, owner))
    }

    fn key(&self, owner: &str, id: &str) -> anyhow::Result<String> {
        if id.is_empty() || id.contains('/') {
            bail!("invalid request id {id:?}");
        }
        Ok(format!("{}{}", self.owner_prefix(owner)?, id))
    }

    pub async fn get(&self, owner: &str, id: &str) -> anyhow::Result<Option<PinRecord>> {
        // ids come from callers; a malformed one simply does not exist
        let Ok(key) = self.key(owner, id) else {
            return Ok(None);
        };
        self.store
            .get(&key)
            .await?
            .map(|bytes| PinRecord::deserialize(&bytes).context("corrupt pin record"))
            .transpose()
    }

    pub async fn put(&self, record: &PinRecord) -> anyhow::Result<()> {
        let key = self.key(&record.owner, &record.id)?;
        self.store.put(&key, Bytes::from(record.serialize())).await
    }

    pub async fn delete(&self, owner: &str, id: &str) -> anyhow::Result<()> {
        let Ok(key) = self.key(owner, id) else {
            return Ok(());
        };
        self.store.delete(&key).await
    }

    /// All records belonging to `owner`.
    pub async fn list_owner(&self, owner: &str) -> anyhow::Result<Vec<PinRecord>> {
        let prefix = self.owner_prefix(owner)?;
        self.scan(&prefix).await
    }

    /// All records of all owners.
    pub async fn all(&self) -> anyhow::Result<Vec<PinRecord>> {
        self.scan(&format!("/{}/", self.prefix)).await
    }

    async fn scan(&self, prefix: &str) -> anyhow::Result<Vec<PinRecord>> {
        let entries = self.store.scan_prefix(prefix).await?;
        let mut records = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match PinRecord::deserialize(&value) {
                Ok(record) => records.push(record),
                Err(err) => warn!(key, "skipping undecodable pin record: {err}"),
            }
        }
        Ok(records)
    }
}
