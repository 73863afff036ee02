use anyhow::bail;
use s5_pins_core::ConnectFailurePolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_CONCURRENCY: usize = 50;
pub const DEFAULT_DATASTORE_PREFIX: &str = "pinning-service";
pub const DEFAULT_INDEX_PREFIX: &str = "local-pins";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PinStoreConfig {
    /// Maximum number of pin jobs fetching content at the same time.
    pub concurrency: usize,
    /// First key segment of every ledger entry.
    pub datastore_prefix: String,
    pub on_connect_failure: ConnectFailurePolicy,
}

impl Default for PinStoreConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            datastore_prefix: DEFAULT_DATASTORE_PREFIX.to_owned(),
            on_connect_failure: ConnectFailurePolicy::default(),
        }
    }
}

/// Config file of a pinning service node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PinsNodeConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub pin_store: PinStoreConfig,
    pub ledger: LedgerConfig,
    pub content: ContentConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    /// Access token to owner id.
    #[serde(default)]
    pub users: BTreeMap<String, String>,
}

impl PinsNodeConfig {
    /// Rejects settings that would make the ledger and the content index
    /// read each other's entries.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, prefix) in [
            ("pin_store.datastore_prefix", &self.pin_store.datastore_prefix),
            ("content.index_prefix", &self.content.index_prefix),
        ] {
            if prefix.is_empty() || prefix.contains('/') {
                bail!("{name} must be a non-empty key segment without '/', got {prefix:?}");
            }
        }
        if self.pin_store.datastore_prefix == self.content.index_prefix {
            bail!(
                "pin_store.datastore_prefix and content.index_prefix are both {:?}",
                self.content.index_prefix
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum LedgerConfig {
    Redb { path: PathBuf },
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentConfig {
    /// Trustless gateway content is fetched from, e.g. `https://trustless-gateway.link`.
    pub gateway: String,
    /// Directory fetched content is written to.
    pub blob_dir: PathBuf,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// First key segment of the reference count index. Shares the ledger's
    /// datastore, so it must differ from `pin_store.datastore_prefix`.
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,
}

fn default_fetch_timeout_secs() -> u64 {
    300
}

fn default_index_prefix() -> String {
    DEFAULT_INDEX_PREFIX.to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Addresses advertised as delegates in pin status responses.
    #[serde(default)]
    pub announce: Vec<String>,
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
}

fn default_dial_timeout_secs() -> u64 {
    10
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            announce: Vec::new(),
            dial_timeout_secs: default_dial_timeout_secs(),
        }
    }
}
