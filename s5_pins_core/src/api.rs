//! JSON bodies of the remote pinning HTTP API, shared by server and client.

use crate::error::{PinningError, PinningResult};
use crate::listing::{format_timestamp, parse_timestamp};
use crate::pin::{Pin, PinMeta, PinRecord, Status};
use serde::{Deserialize, Serialize};

/// Externally visible state of a pin request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinStatus {
    pub requestid: String,
    pub status: Status,
    /// RFC 3339 timestamp.
    pub created: String,
    pub pin: Pin,
    #[serde(default)]
    pub delegates: Vec<String>,
    #[serde(default, skip_serializing_if = "PinMeta::is_empty")]
    pub info: PinMeta,
}

impl PinStatus {
    pub fn from_record(record: &PinRecord, delegates: Vec<String>) -> Self {
        Self {
            requestid: record.id.clone(),
            status: record.status,
            created: format_timestamp(record.created),
            pin: record.pin.clone(),
            delegates,
            info: record.info.clone(),
        }
    }

    /// `created` in milliseconds since the unix epoch.
    pub fn created_millis(&self) -> Result<i64, chrono::ParseError> {
        parse_timestamp(&self.created)
    }

    /// Turns a `failed` status into [`PinningError::PinningFailed`] carrying
    /// the reason the service recorded.
    pub fn into_result(self) -> PinningResult<Self> {
        if self.status != Status::Failed {
            return Ok(self);
        }
        let reason = self
            .info
            .get("error")
            .cloned()
            .unwrap_or_else(|| "unknown error".to_owned());
        Err(PinningError::PinningFailed(reason))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinResults {
    pub count: usize,
    pub results: Vec<PinStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(reason: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                reason: reason.into(),
                details: Some(details.into()),
            },
        }
    }
}
