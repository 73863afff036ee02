//! The pin request entity and its lifecycle states.

use crate::Cid;
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Free-form, protocol level metadata attached to a pin.
pub type PinMeta = BTreeMap<String, String>;

/// Lifecycle state of a pin request.
///
/// Records only advance `Queued -> Pinning -> {Pinned, Failed}`. A duplicate
/// request for content that is already present moves `Queued -> Pinned`
/// directly. Removal is not a status; removed records are deleted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode, Decode,
)]
#[serde(rename_all = "lowercase")]
#[cbor(index_only)]
pub enum Status {
    #[n(0)]
    Queued,
    #[n(1)]
    Pinning,
    #[n(2)]
    Pinned,
    #[n(3)]
    Failed,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Queued,
        Status::Pinning,
        Status::Pinned,
        Status::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Pinning => "pinning",
            Status::Pinned => "pinned",
            Status::Failed => "failed",
        }
    }

    /// `pinned` and `failed` are not progressed automatically any more.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Pinned | Status::Failed)
    }

    /// Whether the record may move from `self` to `next`.
    pub fn can_advance_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Queued, Status::Pinning)
                | (Status::Queued, Status::Pinned)
                | (Status::Pinning, Status::Pinned)
                | (Status::Pinning, Status::Failed)
                | (Status::Queued, Status::Failed)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown pin status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Status::Queued),
            "pinning" => Ok(Status::Pinning),
            "pinned" => Ok(Status::Pinned),
            "failed" => Ok(Status::Failed),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

/// Descriptor of what should be pinned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Pin {
    #[n(0)]
    pub cid: Cid,
    #[n(1)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[n(2)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub origins: Vec<String>,
    #[n(3)]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: PinMeta,
}

impl Pin {
    pub fn new(cid: Cid) -> Self {
        Self {
            cid,
            name: None,
            origins: Vec::new(),
            meta: PinMeta::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_origins(mut self, origins: Vec<String>) -> Self {
        self.origins = origins;
        self
    }

    pub fn with_meta(mut self, meta: PinMeta) -> Self {
        self.meta = meta;
        self
    }
}

/// A persisted pin request, one per `(owner, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct PinRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub owner: String,
    #[n(2)]
    pub status: Status,
    /// Creation time in milliseconds since the unix epoch.
    #[n(3)]
    pub created: i64,
    #[n(4)]
    pub pin: Pin,
    #[n(5)]
    pub info: PinMeta,
}

impl PinRecord {
    pub fn new(id: String, owner: String, created: i64, pin: Pin) -> Self {
        Self {
            id,
            owner,
            status: Status::Queued,
            created,
            pin,
            info: PinMeta::new(),
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        // encoding into a Vec cannot fail
        minicbor::to_vec(self).unwrap_or_default()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, minicbor::decode::Error> {
        minicbor::decode(bytes)
    }
}
