//! Origin and delegate address handling.
//!
//! Addresses are multiaddr strings such as
//! `/ip4/1.2.3.4/tcp/4001/p2p/12D3Koo...`. Only the peer id component is
//! interpreted here; everything else is opaque to this module.

use crate::content::Network;
use crate::error::PinningError;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Maximum number of delegates/origins exchanged per pin at protocol level.
pub const MAX_DELEGATES: usize = 20;

/// Transform applied to a list of addresses, e.g. to drop transports the
/// remote side cannot reach.
pub type AddrFilter = Arc<dyn Fn(Vec<String>) -> Vec<String> + Send + Sync>;

pub fn identity_filter() -> AddrFilter {
    Arc::new(|addrs: Vec<String>| addrs)
}

/// What to do when none of the delegates/origins could be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectFailurePolicy {
    /// Log and carry on; the remote may still reach the content.
    #[default]
    Ignore,
    /// Treat it as a failure of the pin.
    Fail,
}

/// Returns the peer id embedded in a multiaddr, if any.
pub fn peer_id(addr: &str) -> Option<&str> {
    let mut parts = addr.split('/').skip_while(|p| p.is_empty());
    let mut found = None;
    while let Some(protocol) = parts.next() {
        if protocol == "p2p" || protocol == "ipfs" {
            found = parts.next().filter(|id| !id.is_empty());
        }
    }
    found
}

/// Addresses to advertise as origins for a pin request.
///
/// With merging disabled a non-empty `provided` list is returned as is.
/// Otherwise the (filtered) local addresses are appended to it. Duplicates
/// are removed, first occurrence wins.
pub fn resolve_origins(
    provided: &[String],
    local: Vec<String>,
    merge: bool,
    filter: &AddrFilter,
) -> Vec<String> {
    if !provided.is_empty() && !merge {
        return provided.to_vec();
    }
    let mut out: Vec<String> = Vec::with_capacity(provided.len() + local.len());
    for addr in provided.iter().cloned().chain(filter(local)) {
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    out
}

/// Groups addresses by peer id so each peer is dialed once.
///
/// Group order follows the first appearance of each peer; addresses without
/// a peer id each form their own group.
pub fn group_by_peer(addrs: &[String]) -> Vec<Vec<String>> {
    let mut groups: Vec<(Option<&str>, Vec<String>)> = Vec::new();
    for addr in addrs {
        match peer_id(addr) {
            Some(peer) => match groups.iter_mut().find(|(p, _)| *p == Some(peer)) {
                Some((_, group)) => group.push(addr.clone()),
                None => groups.push((Some(peer), vec![addr.clone()])),
            },
            None => groups.push((None, vec![addr.clone()])),
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

/// Dials every group concurrently and returns as soon as one succeeds.
///
/// An empty set of groups counts as success. Remaining dials are dropped
/// once a connection has been made.
pub async fn connect_to_any(
    network: &dyn Network,
    groups: Vec<Vec<String>>,
    cancel: &CancellationToken,
) -> Result<(), PinningError> {
    if groups.is_empty() {
        return Ok(());
    }
    let mut dials: FuturesUnordered<_> = groups
        .iter()
        .map(|group| async move { (group, network.dial(group, cancel).await) })
        .collect();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PinningError::Cancelled),
            next = dials.next() => match next {
                Some((group, Ok(()))) => {
                    debug!(addrs = ?group, "connected to peer");
                    return Ok(());
                }
                Some((group, Err(err))) => {
                    debug!(addrs = ?group, "dial failed: {err:#}");
                }
                None => return Err(PinningError::ConnectionFailed),
            }
        }
    }
}

/// Connects to any of `addrs`, applying `policy` when none is reachable.
pub async fn connect_with_policy(
    network: &dyn Network,
    addrs: &[String],
    policy: ConnectFailurePolicy,
    cancel: &CancellationToken,
) -> Result<(), PinningError> {
    match connect_to_any(network, group_by_peer(addrs), cancel).await {
        Err(PinningError::ConnectionFailed) => {
            warn!(count = addrs.len(), "could not connect to any peer");
            match policy {
                ConnectFailurePolicy::Ignore => Ok(()),
                ConnectFailurePolicy::Fail => Err(PinningError::ConnectionFailed),
            }
        }
        other => other,
    }
}
