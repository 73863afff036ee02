//! Client side of the remote pinning protocol.
//!
//! [`HttpPinningApi`] speaks the HTTP API of a pinning service.
//! [`RemotePinner`] drives a pin request on top of any
//! [`RemotePinningApi`]: it submits the request, connects to the delegates
//! the service names and polls until the pin settles.

mod api;
mod http;
mod pinner;
mod retry;

pub use api::RemotePinningApi;
pub use http::HttpPinningApi;
pub use pinner::{RemotePinner, RemotePinnerConfig};
pub use retry::RetryPolicy;
