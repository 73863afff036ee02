//! Core types and traits for S5 remote pinning.
//!
//! This crate is shared by the pinning service and the remote pinning
//! client:
//!
//! - Content identifiers (`cid::Cid`)
//! - The pin request entity and its states (`pin::PinRecord`, `pin::Status`)
//! - Name matching and list filtering (`matcher`, `listing`)
//! - Origin and delegate resolution (`origins`)
//! - JSON bodies of the HTTP API (`api`)
//! - The persistent pin ledger over a pluggable `ledger::Datastore`
//! - Collaborator traits for the local content store and network
//!   (`content::ContentPins`, `content::Network`)
//!
//! Datastore backends live in `s5_pins_store_memory` and
//! `s5_pins_store_redb`.

pub mod api;
pub mod cid;
pub mod content;
pub mod error;
pub mod ledger;
pub mod listing;
pub mod matcher;
pub mod origins;
pub mod pin;

// Test utilities (behind feature flag)
#[cfg(feature = "testutil")]
pub mod testutil;

pub use cid::{Cid, CidError};
pub use content::{ContentPins, LocalPin, Network};
pub use error::{PinningError, PinningResult};
pub use ledger::{Datastore, PinLedger};
pub use listing::{ListQuery, ListResult};
pub use matcher::TextMatchingStrategy;
pub use origins::ConnectFailurePolicy;
pub use pin::{Pin, PinMeta, PinRecord, Status};
