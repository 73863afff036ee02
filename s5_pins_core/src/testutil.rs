//! Test utilities for pinning backends and for code driving them.
//!
//! [`DatastoreTests`] is a suite that every [`Datastore`] implementation
//! should pass. [`MemoryContentPins`] and [`MemoryNetwork`] are scriptable
//! in-memory collaborators for scheduler and orchestrator tests.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! s5_pins_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! ```ignore
//! use s5_pins_core::testutil::DatastoreTests;
//!
//! #[tokio::test]
//! async fn test_my_datastore() {
//!     let store = MyDatastore::new(...);
//!     DatastoreTests::new(&store).run_all().await.unwrap();
//! }
//! ```

use crate::content::{ContentPins, LocalPin, Network};
use crate::ledger::Datastore;
use crate::Cid;
use anyhow::{anyhow, bail, ensure};
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use rand::Rng;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Test suite for `Datastore` implementations.
pub struct DatastoreTests<'a, D> {
    store: &'a D,
    /// Prefix for test keys to avoid conflicts
    prefix: String,
}

impl<'a, D: Datastore> DatastoreTests<'a, D> {
    pub fn new(store: &'a D) -> Self {
        let prefix = format!("/_test_{}/", rand::rng().random::<u32>());
        Self { store, prefix }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub async fn run_all(&self) -> anyhow::Result<()> {
        self.test_put_get().await?;
        self.test_missing().await?;
        self.test_overwrite().await?;
        self.test_delete().await?;
        self.test_scan_prefix().await?;
        self.cleanup().await
    }

    pub async fn test_put_get(&self) -> anyhow::Result<()> {
        let key = self.key("put_get");
        self.store.put(&key, Bytes::from_static(b"value")).await?;
        let value = self.store.get(&key).await?;
        ensure!(
            value.as_deref() == Some(&b"value"[..]),
            "get after put returned {value:?}"
        );
        Ok(())
    }

    pub async fn test_missing(&self) -> anyhow::Result<()> {
        let key = self.key("never_written");
        ensure!(self.store.get(&key).await?.is_none(), "missing key returned a value");
        self.store.delete(&key).await?;
        Ok(())
    }

    pub async fn test_overwrite(&self) -> anyhow::Result<()> {
        let key = self.key("overwrite");
        self.store.put(&key, Bytes::from_static(b"one")).await?;
        self.store.put(&key, Bytes::from_static(b"two")).await?;
        let value = self.store.get(&key).await?;
        ensure!(
            value.as_deref() == Some(&b"two"[..]),
            "overwrite kept {value:?}"
        );
        Ok(())
    }

    pub async fn test_delete(&self) -> anyhow::Result<()> {
        let key = self.key("delete");
        self.store.put(&key, Bytes::from_static(b"x")).await?;
        self.store.delete(&key).await?;
        ensure!(self.store.get(&key).await?.is_none(), "deleted key still present");
        Ok(())
    }

    pub async fn test_scan_prefix(&self) -> anyhow::Result<()> {
        for name in ["scan/b", "scan/a", "scan/c/nested", "scanner"] {
            self.store
                .put(&self.key(name), Bytes::from(name.as_bytes().to_vec()))
                .await?;
        }
        let entries = self.store.scan_prefix(&self.key("scan/")).await?;
        let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
        let expected = vec![
            self.key("scan/a"),
            self.key("scan/b"),
            self.key("scan/c/nested"),
        ];
        ensure!(keys == expected, "scan returned {keys:?}, expected {expected:?}");
        ensure!(
            entries[0].1.as_ref() == b"scan/a",
            "scan returned wrong value for first key"
        );
        Ok(())
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        for (key, _) in self.store.scan_prefix(&self.prefix).await? {
            self.store.delete(&key).await?;
        }
        ensure!(
            self.store.scan_prefix(&self.prefix).await?.is_empty(),
            "cleanup left entries behind"
        );
        Ok(())
    }
}

/// In-memory [`ContentPins`] with scriptable fetch behaviour.
#[derive(Debug, Default)]
pub struct MemoryContentPins {
    pins: DashMap<Cid, LocalPin>,
    failing: DashSet<Cid>,
    fetch_delay_ms: AtomicU64,
    fail_rm: AtomicBool,
    fetches: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    removals: DashMap<Cid, usize>,
}

impl MemoryContentPins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch takes `delay` unless cancelled.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Fetches of `cid` fail after the delay.
    pub fn fail_fetch(&self, cid: Cid) {
        self.failing.insert(cid);
    }

    pub fn fail_rm(&self, fail: bool) {
        self.fail_rm.store(fail, Ordering::SeqCst);
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Highest number of fetches that ran at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// How often `cid` was released.
    pub fn removal_count(&self, cid: &Cid) -> usize {
        self.removals.get(cid).map(|n| *n).unwrap_or(0)
    }

    pub fn ref_count(&self, cid: &Cid) -> Option<u64> {
        self.pins.get(cid).map(|p| p.ref_count)
    }

    /// Marks `cid` as already present locally.
    pub fn insert(&self, cid: Cid, ref_count: u64) {
        self.pins.insert(
            cid,
            LocalPin {
                ref_count,
                ..Default::default()
            },
        );
    }
}

#[async_trait::async_trait]
impl ContentPins for MemoryContentPins {
    async fn get(&self, cid: &Cid) -> anyhow::Result<Option<LocalPin>> {
        Ok(self.pins.get(cid).map(|p| p.clone()))
    }

    async fn add(
        &self,
        cid: &Cid,
        ref_count: u64,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = Duration::from_millis(self.fetch_delay_ms.load(Ordering::SeqCst));
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(anyhow!("fetch of {cid} aborted")),
            _ = tokio::time::sleep(delay) => {
                if self.failing.contains(cid) {
                    Err(anyhow!("fetch of {cid} failed"))
                } else {
                    self.pins.insert(cid.clone(), LocalPin { ref_count, ..Default::default() });
                    Ok(())
                }
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn set_ref_count(&self, cid: &Cid, ref_count: u64) -> anyhow::Result<()> {
        match self.pins.get_mut(cid) {
            Some(mut pin) => {
                pin.ref_count = ref_count;
                Ok(())
            }
            None => bail!("{cid} is not pinned"),
        }
    }

    async fn rm(&self, cid: &Cid) -> anyhow::Result<()> {
        if self.fail_rm.load(Ordering::SeqCst) {
            bail!("refusing to remove {cid}");
        }
        self.pins.remove(cid);
        *self.removals.entry(cid.clone()).or_insert(0) += 1;
        Ok(())
    }
}

/// In-memory [`Network`] that only reaches a configured set of addresses.
#[derive(Debug, Default)]
pub struct MemoryNetwork {
    local: Vec<String>,
    reachable: DashSet<String>,
    dials: Mutex<Vec<Vec<String>>>,
}

impl MemoryNetwork {
    pub fn new(local: Vec<String>) -> Self {
        Self {
            local,
            ..Default::default()
        }
    }

    pub fn make_reachable(&self, addr: impl Into<String>) {
        self.reachable.insert(addr.into());
    }

    /// Every dial attempt so far, one entry per peer group.
    pub fn dials(&self) -> Vec<Vec<String>> {
        self.dials.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Network for MemoryNetwork {
    fn local_addrs(&self) -> Vec<String> {
        self.local.clone()
    }

    async fn dial(&self, addrs: &[String], cancel: &CancellationToken) -> anyhow::Result<()> {
        if let Ok(mut dials) = self.dials.lock() {
            dials.push(addrs.to_vec());
        }
        if cancel.is_cancelled() {
            bail!("dial aborted");
        }
        if addrs.iter().any(|a| self.reachable.contains(a)) {
            Ok(())
        } else {
            Err(anyhow!("no route to {addrs:?}"))
        }
    }
}
