use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;

use super::{tag_request, AppState};
use crate::auth::Identity;
use crate::database::entities::OrderStatus;
use crate::error::AppError;
use crate::middleware::error::success_response;
use crate::services::CreateOrderRequest;

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/orders", post(create_order))
        .route("/api/orders/{id}", get(get_order))
        .route("/api/orders/{id}/status", patch(update_status))
        .route("/api/orders/{id}/cancel", post(cancel_order))
}

/// POST /api/orders
pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    identity: Identity,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    info!(user_id = identity.user_id, method = %request.method_payment, "create order request");
    let details = tag_request(state.orders.create_order(&identity, request).await, &headers)?;
    Ok((StatusCode::CREATED, success_response(details)))
}

/// GET /api/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    identity: Identity,
    Path(order_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let details = tag_request(state.orders.get_order(&identity, order_id).await, &headers)?;
    Ok(success_response(details))
}

/// PATCH /api/orders/{id}/status
pub async fn update_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    identity: Identity,
    Path(order_id): Path<i64>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let order = tag_request(
        state
            .orders
            .update_status(&identity, order_id, request.status)
            .await,
        &headers,
    )?;
    Ok(success_response(order))
}

/// POST /api/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    identity: Identity,
    Path(order_id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let order = tag_request(state.orders.cancel_order(&identity, order_id).await, &headers)?;
    Ok(success_response(order))
}
