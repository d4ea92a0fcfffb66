use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use super::{tag_request, AppState};
use crate::auth::Identity;
use crate::error::AppError;
use crate::middleware::error::success_response;
use crate::payments::types::GatewayName;
use crate::services::PaymentOverrides;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_id: i64,
    #[serde(flatten)]
    pub overrides: PaymentOverrides,
}

/// Manual reconciliation details for a bank transfer
#[derive(Debug, Default, Deserialize)]
pub struct ConfirmPaymentRequest {
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/payments/momo/create", post(create_momo_payment))
        .route("/api/payments/vnpay/create", post(create_vnpay_payment))
        .route("/api/payments/{order_id}/cod/confirm", post(confirm_cod))
        .route("/api/payments/{order_id}/confirm", post(confirm_online))
        .route("/api/payments/{order_id}/refund", post(refund))
}

/// POST /api/payments/momo/create
pub async fn create_momo_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    identity: Identity,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    create_payment(state, headers, identity, GatewayName::Momo, request).await
}

/// POST /api/payments/vnpay/create
pub async fn create_vnpay_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    identity: Identity,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    create_payment(state, headers, identity, GatewayName::Vnpay, request).await
}

async fn create_payment(
    state: AppState,
    headers: HeaderMap,
    identity: Identity,
    gateway: GatewayName,
    request: CreatePaymentRequest,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut overrides = request.overrides;
    overrides.client_ip = client_ip(&headers);

    let response = tag_request(
        state
            .initiation
            .create_payment(&identity, gateway, request.order_id, overrides)
            .await,
        &headers,
    )?;
    Ok(success_response(response))
}

/// POST /api/payments/{order_id}/cod/confirm
pub async fn confirm_cod(
    State(state): State<AppState>,
    headers: HeaderMap,
    identity: Identity,
    Path(order_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    tag_request(identity.require_admin(), &headers)?;
    let record = tag_request(state.ledger.confirm_cod(order_id).await, &headers)?;
    Ok(success_response(record))
}

/// POST /api/payments/{order_id}/confirm
pub async fn confirm_online(
    State(state): State<AppState>,
    headers: HeaderMap,
    identity: Identity,
    Path(order_id): Path<i64>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    tag_request(identity.require_admin(), &headers)?;
    let record = tag_request(
        state
            .ledger
            .confirm_online(order_id, request.transaction_id, request.info)
            .await,
        &headers,
    )?;
    Ok(success_response(record))
}

/// POST /api/payments/{order_id}/refund
pub async fn refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    identity: Identity,
    Path(order_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    tag_request(identity.require_admin(), &headers)?;
    let record = tag_request(state.ledger.refund(order_id).await, &headers)?;
    Ok(success_response(record))
}

/// First hop of `X-Forwarded-For`, falling back to `X-Real-IP`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_takes_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.4".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("198.51.100.4"));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn create_request_flattens_overrides() {
        let request: CreatePaymentRequest = serde_json::from_str(
            r#"{"order_id": 42, "order_info": "Thanh toan don hang 42", "client_ip": "1.2.3.4"}"#,
        )
        .unwrap();
        assert_eq!(request.order_id, 42);
        assert_eq!(
            request.overrides.order_info.as_deref(),
            Some("Thanh toan don hang 42")
        );
        assert!(request.overrides.client_ip.is_none());
    }
}
