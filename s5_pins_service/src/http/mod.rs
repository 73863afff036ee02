//! HTTP surface of the pinning service.

mod error;
mod params;

pub use error::ApiError;

use crate::auth::{AccessTokenValidator, PinningUser};
use crate::pin_store::PinStore;
use axum::body::Bytes;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{Method, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use params::{ListParams, PinRequest};
use s5_pins_core::PinningError;
use s5_pins_core::api::{PinResults, PinStatus};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Debug, Clone)]
pub struct AppState {
    pub pins: PinStore,
    pub auth: Arc<dyn AccessTokenValidator>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/pins", get(list_pins).post(add_pin))
        .route(
            "/pins/{requestid}",
            get(get_pin).post(replace_pin).delete(remove_pin),
        )
        .layer(cors)
        .with_state(state)
}

/// The authenticated caller.
struct Owner(PinningUser);

impl FromRequestParts<AppState> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::Unauthorized)?;
        match state.auth.validate(token).await {
            Ok(Some(user)) => Ok(Owner(user)),
            Ok(None) => Err(ApiError::Unauthorized),
            Err(err) => Err(PinningError::Internal(err).into()),
        }
    }
}

async fn list_pins(
    State(state): State<AppState>,
    Owner(user): Owner,
    Query(params): Query<ListParams>,
) -> Result<Json<PinResults>, ApiError> {
    let query = params.into_query()?;
    let listing = state.pins.list(&user.id, &query).await?;
    let delegates = state.pins.delegates();
    Ok(Json(PinResults {
        count: listing.count,
        results: listing
            .results
            .iter()
            .map(|r| PinStatus::from_record(r, delegates.clone()))
            .collect(),
    }))
}

async fn add_pin(
    State(state): State<AppState>,
    Owner(user): Owner,
    body: Bytes,
) -> Result<(StatusCode, Json<PinStatus>), ApiError> {
    let pin = PinRequest::from_body(&body)?.into_pin()?;
    let record = state.pins.pin(&user.id, pin).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(PinStatus::from_record(&record, state.pins.delegates())),
    ))
}

async fn get_pin(
    State(state): State<AppState>,
    Owner(user): Owner,
    Path(requestid): Path<String>,
) -> Result<Json<PinStatus>, ApiError> {
    let record = state
        .pins
        .get(&user.id, &requestid)
        .await?
        .ok_or(PinningError::NotFound)?;
    Ok(Json(PinStatus::from_record(&record, state.pins.delegates())))
}

async fn replace_pin(
    State(state): State<AppState>,
    Owner(user): Owner,
    Path(requestid): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<PinStatus>), ApiError> {
    let pin = PinRequest::from_body(&body)?.into_pin()?;
    let record = state.pins.update(&user.id, &requestid, pin).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(PinStatus::from_record(&record, state.pins.delegates())),
    ))
}

async fn remove_pin(
    State(state): State<AppState>,
    Owner(user): Owner,
    Path(requestid): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.pins.get(&user.id, &requestid).await?.is_none() {
        return Err(PinningError::NotFound.into());
    }
    state.pins.cancel(&user.id, &requestid).await?;
    Ok(StatusCode::ACCEPTED)
}
