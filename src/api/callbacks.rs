//! Gateway redirect and IPN endpoints.
//!
//! Both deliveries of a provider go through the same processor; only a
//! processed outcome (paid, failed, or already confirmed) is answered with 200.

use axum::{
    extract::{RawQuery, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use tracing::info;

use super::{tag_request, AppState};
use crate::error::AppError;
use crate::middleware::error::success_response;
use crate::payments::types::{CallbackParams, GatewayName};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/payments/momo/callback", get(momo_return))
        .route("/api/payments/momo/ipn", post(momo_ipn))
        .route("/api/payments/vnpay/callback", get(vnpay_callback))
        .route("/api/payments/vnpay/ipn", get(vnpay_callback))
}

/// GET /api/payments/momo/callback
pub async fn momo_return(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Json<serde_json::Value>, AppError> {
    let params = CallbackParams::from_raw_query(query.as_deref().unwrap_or_default());
    process(state, headers, GatewayName::Momo, params).await
}

/// POST /api/payments/momo/ipn
pub async fn momo_ipn(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let params = tag_request(
        CallbackParams::from_json(&body).map_err(AppError::from),
        &headers,
    )?;
    process(state, headers, GatewayName::Momo, params).await
}

/// GET /api/payments/vnpay/callback and /api/payments/vnpay/ipn
pub async fn vnpay_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Result<Json<serde_json::Value>, AppError> {
    let params = CallbackParams::from_raw_query(query.as_deref().unwrap_or_default());
    process(state, headers, GatewayName::Vnpay, params).await
}

async fn process(
    state: AppState,
    headers: HeaderMap,
    gateway: GatewayName,
    params: CallbackParams,
) -> Result<Json<serde_json::Value>, AppError> {
    info!(gateway = %gateway, fields = params.params.len(), "gateway callback received");
    let outcome = tag_request(state.callbacks.process(gateway, &params).await, &headers)?;
    Ok(success_response(outcome))
}
