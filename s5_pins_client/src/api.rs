use s5_pins_core::api::{PinResults, PinStatus};
use s5_pins_core::{ListQuery, Pin, PinningResult};

/// Operations of a remote pinning service.
///
/// Every call is a single round trip; retries and polling belong to
/// [`crate::RemotePinner`].
#[async_trait::async_trait]
pub trait RemotePinningApi: Send + Sync + std::fmt::Debug + 'static {
    /// Submits a new pin request.
    async fn add(&self, pin: &Pin) -> PinningResult<PinStatus>;

    /// Replaces the request `requestid` with `pin`. The service answers with
    /// the request that now tracks the pin, which may have a new id.
    async fn replace(&self, requestid: &str, pin: &Pin) -> PinningResult<PinStatus>;

    async fn status(&self, requestid: &str) -> PinningResult<PinStatus>;

    /// One page of pin requests, newest first.
    async fn list(&self, query: &ListQuery) -> PinningResult<PinResults>;

    async fn delete(&self, requestid: &str) -> PinningResult<()>;
}
