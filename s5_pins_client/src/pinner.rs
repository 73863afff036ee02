use crate::api::RemotePinningApi;
use crate::retry::RetryPolicy;
use futures::stream::{self, Stream, TryStreamExt};
use s5_pins_core::api::PinStatus;
use s5_pins_core::listing::MAX_LIST_LIMIT;
use s5_pins_core::origins::{
    AddrFilter, MAX_DELEGATES, connect_with_policy, identity_filter, resolve_origins,
};
use s5_pins_core::{
    Cid, ConnectFailurePolicy, ListQuery, Network, Pin, PinMeta, PinningError, PinningResult,
    Status,
};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

#[derive(Clone)]
pub struct RemotePinnerConfig {
    pub retry: RetryPolicy,
    /// Advertise our own addresses as origins even when the caller
    /// supplied some.
    pub merge_origins: bool,
    pub on_connect_failure: ConnectFailurePolicy,
    /// Applied to our own addresses before they are advertised.
    pub origin_filter: AddrFilter,
    /// Applied to the delegates named by the service before dialing.
    pub delegate_filter: AddrFilter,
}

impl Default for RemotePinnerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            merge_origins: true,
            on_connect_failure: ConnectFailurePolicy::Ignore,
            origin_filter: identity_filter(),
            delegate_filter: identity_filter(),
        }
    }
}

impl std::fmt::Debug for RemotePinnerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemotePinnerConfig")
            .field("retry", &self.retry)
            .field("merge_origins", &self.merge_origins)
            .field("on_connect_failure", &self.on_connect_failure)
            .finish_non_exhaustive()
    }
}

/// Pins content on a remote pinning service.
///
/// `add_pin` and `replace_pin` submit the request, dial the delegates the
/// service answers with and poll until the pin is `pinned` or `failed`.
/// Once the request was submitted they never fail because of polling:
/// if the retry budget runs out or `cancel` fires, the last status seen is
/// returned.
#[derive(Debug, Clone)]
pub struct RemotePinner {
    api: Arc<dyn RemotePinningApi>,
    network: Arc<dyn Network>,
    config: RemotePinnerConfig,
}

impl RemotePinner {
    pub fn new(
        api: Arc<dyn RemotePinningApi>,
        network: Arc<dyn Network>,
        config: RemotePinnerConfig,
    ) -> Self {
        Self {
            api,
            network,
            config,
        }
    }

    pub fn api(&self) -> &Arc<dyn RemotePinningApi> {
        &self.api
    }

    pub async fn add_pin(&self, pin: Pin, cancel: &CancellationToken) -> PinningResult<PinStatus> {
        if cancel.is_cancelled() {
            return Err(PinningError::Cancelled);
        }
        let pin = self.with_origins(pin);
        let api = self.api.clone();
        self.drive(async move { api.add(&pin).await }, cancel)
            .await
    }

    /// Replaces the request `requestid`. The returned status carries the id
    /// that tracks the pin from now on.
    pub async fn replace_pin(
        &self,
        requestid: &str,
        pin: Pin,
        cancel: &CancellationToken,
    ) -> PinningResult<PinStatus> {
        if cancel.is_cancelled() {
            return Err(PinningError::Cancelled);
        }
        let pin = self.with_origins(pin);
        let api = self.api.clone();
        let requestid = requestid.to_owned();
        self.drive(async move { api.replace(&requestid, &pin).await }, cancel)
            .await
    }

    fn with_origins(&self, mut pin: Pin) -> Pin {
        let mut origins = resolve_origins(
            &pin.origins,
            self.network.local_addrs(),
            self.config.merge_origins,
            &self.config.origin_filter,
        );
        origins.truncate(MAX_DELEGATES);
        pin.origins = origins;
        pin
    }

    async fn drive(
        &self,
        submit: impl Future<Output = PinningResult<PinStatus>>,
        cancel: &CancellationToken,
    ) -> PinningResult<PinStatus> {
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PinningError::Cancelled),
            res = submit => res?,
        };
        debug!(requestid = %status.requestid, cid = %status.pin.cid, status = %status.status.as_str(), "pin request submitted");

        let delegates = (self.config.delegate_filter)(status.delegates.clone());
        if !delegates.is_empty() {
            match connect_with_policy(
                self.network.as_ref(),
                &delegates,
                self.config.on_connect_failure,
                cancel,
            )
            .await
            {
                Ok(()) => {}
                Err(PinningError::Cancelled) => return Ok(status),
                Err(err) => return Err(err),
            }
        }

        Ok(self.wait_for_settled(status, cancel).await)
    }

    async fn wait_for_settled(&self, mut last: PinStatus, cancel: &CancellationToken) -> PinStatus {
        let policy = self.config.retry;
        for attempt in 0..policy.retries {
            if last.status.is_terminal() {
                break;
            }
            if attempt > 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(policy.delay(attempt - 1)) => {}
                }
            }
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = self.api.status(&last.requestid) => res,
            };
            match polled {
                Ok(status) => {
                    trace!(requestid = %status.requestid, attempt, status = %status.status.as_str(), "polled pin status");
                    last = status;
                }
                Err(err) => {
                    warn!(requestid = %last.requestid, attempt, "status poll failed: {err}");
                }
            }
        }
        if !last.status.is_terminal() {
            debug!(requestid = %last.requestid, status = %last.status.as_str(), "pin did not settle");
        }
        last
    }

    /// Every pin request matching `query`, newest first, across pages.
    ///
    /// Pages are requested with `before` set to the creation time of the
    /// last item of the previous page until an empty page comes back.
    pub fn ls(
        &self,
        mut query: ListQuery,
    ) -> impl Stream<Item = PinningResult<PinStatus>> + Send + use<> {
        if query.limit.is_none() {
            query.limit = Some(MAX_LIST_LIMIT);
        }
        let api = self.api.clone();
        stream::try_unfold(query, move |query| next_page(api.clone(), query))
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, PinningError>)))
            .try_flatten()
    }

    /// Newest pin request for `cid`.
    pub async fn get(&self, cid: &Cid) -> PinningResult<PinStatus> {
        let mut query = ListQuery::default().with_limit(1);
        query.cids.push(cid.clone());
        self.api
            .list(&query)
            .await?
            .results
            .into_iter()
            .next()
            .ok_or(PinningError::NotFound)
    }

    pub async fn is_pinned(&self, cid: &Cid) -> PinningResult<bool> {
        let mut query = ListQuery::default()
            .with_status([Status::Pinned])
            .with_limit(1);
        query.cids.push(cid.clone());
        Ok(self.api.list(&query).await?.count > 0)
    }

    /// Deletes every pin request for `cid` and returns how many were removed.
    pub async fn rm(&self, cid: &Cid) -> PinningResult<usize> {
        let mut query = ListQuery::default();
        query.cids.push(cid.clone());
        let requests: Vec<PinStatus> = self.ls(query).try_collect().await?;

        let mut removed = 0;
        for request in requests {
            match self.api.delete(&request.requestid).await {
                Ok(()) => removed += 1,
                Err(PinningError::NotFound) => {}
                Err(err) => return Err(err),
            }
        }
        debug!(%cid, removed, "removed pin requests");
        Ok(removed)
    }

    /// Replaces the metadata of the newest pin request for `cid`.
    pub async fn set_metadata(
        &self,
        cid: &Cid,
        meta: PinMeta,
        cancel: &CancellationToken,
    ) -> PinningResult<PinStatus> {
        let current = self.get(cid).await?;
        let pin = current.pin.with_meta(meta);
        self.replace_pin(&current.requestid, pin, cancel).await
    }
}

async fn next_page(
    api: Arc<dyn RemotePinningApi>,
    query: ListQuery,
) -> PinningResult<Option<(Vec<PinStatus>, ListQuery)>> {
    let page = api.list(&query).await?;
    let Some(last) = page.results.last() else {
        return Ok(None);
    };
    let cursor = last
        .created_millis()
        .map_err(|err| PinningError::InvalidParameters(format!("invalid created time: {err}")))?;
    Ok(Some((page.results, query.before(cursor))))
}
