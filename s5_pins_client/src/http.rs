use crate::api::RemotePinningApi;
use anyhow::anyhow;
use reqwest::header::AUTHORIZATION;
use reqwest::{Response, StatusCode};
use s5_pins_core::api::{ErrorResponse, PinResults, PinStatus};
use s5_pins_core::listing::format_timestamp;
use s5_pins_core::{ListQuery, Pin, PinningError, PinningResult};
use serde::de::DeserializeOwned;
use tracing::trace;

/// [`RemotePinningApi`] over HTTP with bearer token authentication.
#[derive(Clone)]
pub struct HttpPinningApi {
    http_client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl std::fmt::Debug for HttpPinningApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPinningApi")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpPinningApi {
    /// `endpoint` is the base URL of the service, e.g. `https://pins.example.org`.
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, token)
    }

    pub fn with_client(
        http_client: reqwest::Client,
        endpoint: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_owned();
        Self {
            http_client,
            endpoint,
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> PinningResult<Response> {
        let res = request
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(res).await
    }
}

fn transport_error(err: reqwest::Error) -> PinningError {
    if err.is_timeout() {
        PinningError::Timeout
    } else {
        PinningError::Internal(err.into())
    }
}

async fn check_status(res: Response) -> PinningResult<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    let details = serde_json::from_str::<ErrorResponse>(&body)
        .ok()
        .map(|e| e.error.details.unwrap_or(e.error.reason))
        .unwrap_or(body);
    Err(match status {
        StatusCode::NOT_FOUND => PinningError::NotFound,
        StatusCode::BAD_REQUEST => PinningError::InvalidParameters(details),
        _ => PinningError::Internal(anyhow!("pinning service returned {status}: {details}")),
    })
}

async fn decode<T: DeserializeOwned>(res: Response) -> PinningResult<T> {
    let bytes = res.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes)
        .map_err(|err| PinningError::InvalidParameters(format!("unexpected response body: {err}")))
}

/// Query string of a list request.
fn list_params(query: &ListQuery) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if !query.cids.is_empty() {
        let cids: Vec<String> = query.cids.iter().map(ToString::to_string).collect();
        params.push(("cid", cids.join(",")));
    }
    if let Some(name) = &query.name {
        params.push(("name", name.clone()));
        params.push(("match", query.match_strategy.as_str().to_owned()));
    }
    if !query.status.is_empty() {
        let status: Vec<&str> = query.status.iter().map(|s| s.as_str()).collect();
        params.push(("status", status.join(",")));
    }
    if let Some(before) = query.before {
        params.push(("before", format_timestamp(before)));
    }
    if let Some(after) = query.after {
        params.push(("after", format_timestamp(after)));
    }
    params.push(("limit", query.effective_limit().to_string()));
    if !query.meta.is_empty()
        && let Ok(meta) = serde_json::to_string(&query.meta)
    {
        params.push(("meta", meta));
    }
    params
}

#[async_trait::async_trait]
impl RemotePinningApi for HttpPinningApi {
    async fn add(&self, pin: &Pin) -> PinningResult<PinStatus> {
        trace!(cid = %pin.cid, "POST /pins");
        let res = self
            .send(self.http_client.post(self.url("/pins")).json(pin))
            .await?;
        decode(res).await
    }

    async fn replace(&self, requestid: &str, pin: &Pin) -> PinningResult<PinStatus> {
        trace!(requestid, cid = %pin.cid, "POST /pins/:requestid");
        let res = self
            .send(
                self.http_client
                    .post(self.url(&format!("/pins/{requestid}")))
                    .json(pin),
            )
            .await?;
        decode(res).await
    }

    async fn status(&self, requestid: &str) -> PinningResult<PinStatus> {
        let res = self
            .send(self.http_client.get(self.url(&format!("/pins/{requestid}"))))
            .await?;
        decode(res).await
    }

    async fn list(&self, query: &ListQuery) -> PinningResult<PinResults> {
        let res = self
            .send(
                self.http_client
                    .get(self.url("/pins"))
                    .query(&list_params(query)),
            )
            .await?;
        decode(res).await
    }

    async fn delete(&self, requestid: &str) -> PinningResult<()> {
        self.send(
            self.http_client
                .delete(self.url(&format!("/pins/{requestid}"))),
        )
        .await?;
        Ok(())
    }
}
