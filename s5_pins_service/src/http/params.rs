//! Parsing and validation of request parameters.

use super::error::ApiError;
use s5_pins_core::listing::{MAX_LIST_LIMIT, parse_status_list, parse_timestamp};
use s5_pins_core::origins::MAX_DELEGATES;
use s5_pins_core::{Cid, ListQuery, Pin, PinMeta, TextMatchingStrategy};
use serde::Deserialize;
use std::collections::BTreeMap;

const MAX_CID_FILTER: usize = 10;
const MAX_NAME_LEN: usize = 255;
const MAX_META_KEYS: usize = 1000;

/// Raw query string of `GET /pins`. Everything is parsed by hand so that
/// malformed values produce the API's error body.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub cid: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "match")]
    pub match_strategy: Option<String>,
    pub status: Option<String>,
    pub before: Option<String>,
    pub after: Option<String>,
    pub limit: Option<String>,
    pub meta: Option<String>,
}

impl ListParams {
    pub fn into_query(self) -> Result<ListQuery, ApiError> {
        let mut query = ListQuery::default();
        if let Some(cids) = self.cid {
            query.cids = cids
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(Cid::parse)
                .collect::<Result<_, _>>()
                .map_err(|e| bad(format!("invalid cid filter: {e}")))?;
            if query.cids.len() > MAX_CID_FILTER {
                return Err(bad(format!("at most {MAX_CID_FILTER} cids may be given")));
            }
        }
        if let Some(name) = self.name {
            if name.len() > MAX_NAME_LEN {
                return Err(bad("name is too long"));
            }
            query.name = Some(name);
        }
        if let Some(strategy) = self.match_strategy {
            query.match_strategy = strategy.parse().map_err(|e| bad(format!("{e}")))?;
        }
        if let Some(status) = self.status {
            query.status = parse_status_list(&status).map_err(|e| bad(e.to_string()))?;
        }
        if let Some(before) = self.before {
            query.before =
                Some(parse_timestamp(&before).map_err(|e| bad(format!("invalid before: {e}")))?);
        }
        if let Some(after) = self.after {
            query.after =
                Some(parse_timestamp(&after).map_err(|e| bad(format!("invalid after: {e}")))?);
        }
        if let Some(limit) = self.limit {
            let limit: usize = limit
                .parse()
                .map_err(|_| bad(format!("invalid limit {limit:?}")))?;
            if !(1..=MAX_LIST_LIMIT).contains(&limit) {
                return Err(bad(format!("limit must be between 1 and {MAX_LIST_LIMIT}")));
            }
            query.limit = Some(limit);
        }
        if let Some(meta) = self.meta {
            let meta: BTreeMap<String, serde_json::Value> =
                serde_json::from_str(&meta).map_err(|e| bad(format!("invalid meta: {e}")))?;
            query.meta = stringify_meta(meta);
        }
        Ok(query)
    }
}

/// Body of `POST /pins` and `POST /pins/{requestid}`.
#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub cid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub origins: Option<Vec<String>>,
    #[serde(default)]
    pub meta: Option<BTreeMap<String, serde_json::Value>>,
}

impl PinRequest {
    pub fn from_body(body: &[u8]) -> Result<Self, ApiError> {
        serde_json::from_slice(body).map_err(|e| bad(format!("invalid request body: {e}")))
    }

    pub fn into_pin(self) -> Result<Pin, ApiError> {
        let cid = Cid::parse(&self.cid).map_err(|e| bad(format!("invalid cid: {e}")))?;
        let origins = self.origins.unwrap_or_default();
        if origins.len() > MAX_DELEGATES {
            return Err(bad(format!("at most {MAX_DELEGATES} origins may be given")));
        }
        if self.name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
            return Err(bad("name is too long"));
        }
        let meta = self.meta.unwrap_or_default();
        if meta.len() > MAX_META_KEYS {
            return Err(bad(format!("at most {MAX_META_KEYS} meta entries may be given")));
        }
        let mut pin = Pin::new(cid)
            .with_origins(origins)
            .with_meta(stringify_meta(meta));
        pin.name = self.name;
        Ok(pin)
    }
}

/// Metadata values may be any JSON value on the wire; they are stored as
/// strings.
fn stringify_meta(meta: BTreeMap<String, serde_json::Value>) -> PinMeta {
    meta.into_iter()
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect()
}

fn bad(msg: impl Into<String>) -> ApiError {
    ApiError::BadRequest(msg.into())
}
