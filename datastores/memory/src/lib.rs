use bytes::Bytes;
use dashmap::DashMap;
use s5_pins_core::Datastore;

/// Volatile `Datastore`; everything is lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    entries: DashMap<String, Bytes>,
}

impl MemoryDatastore {
    /// Creates a new, empty `MemoryDatastore`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl Datastore for MemoryDatastore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: Bytes) -> anyhow::Result<()> {
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, Bytes)>> {
        let mut entries: Vec<(String, Bytes)> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}
