//! Collaborators the pinning engine drives but does not implement.

use crate::Cid;
use crate::pin::PinMeta;
use tokio_util::sync::CancellationToken;

/// Local record of content held by the node's object store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalPin {
    /// Number of independent pin requests depending on this content.
    pub ref_count: u64,
    pub metadata: PinMeta,
}

/// The node's content store, seen through the operations pinning needs.
///
/// Implementations must honour the cancellation token in `add`: a cancelled
/// fetch returns promptly and leaves nothing pinned.
#[async_trait::async_trait]
pub trait ContentPins: Send + Sync + std::fmt::Debug {
    /// Returns the local pin for `cid`, if the content is pinned.
    async fn get(&self, cid: &Cid) -> anyhow::Result<Option<LocalPin>>;

    /// Fetches the content for `cid` and pins it with the given reference
    /// count.
    async fn add(&self, cid: &Cid, ref_count: u64, cancel: &CancellationToken)
    -> anyhow::Result<()>;

    /// Overwrites the reference count of an existing pin.
    async fn set_ref_count(&self, cid: &Cid, ref_count: u64) -> anyhow::Result<()>;

    /// Releases the content for `cid`.
    async fn rm(&self, cid: &Cid) -> anyhow::Result<()>;
}

/// Peer-to-peer connectivity of the local node.
#[async_trait::async_trait]
pub trait Network: Send + Sync + std::fmt::Debug {
    /// Addresses this node believes it is reachable on.
    fn local_addrs(&self) -> Vec<String>;

    /// Opens a connection to a peer using any of `addrs`, which all belong
    /// to the same peer.
    async fn dial(&self, addrs: &[String], cancel: &CancellationToken) -> anyhow::Result<()>;
}
