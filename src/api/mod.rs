//! HTTP surface: routers, shared state and health endpoints

pub mod callbacks;
pub mod orders;
pub mod payments;

use axum::{
    extract::{FromRef, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::auth::JwtAuthenticator;
use crate::database::repository::Repository;
use crate::error::{AppError, AppResult};
use crate::health::{HealthChecker, HealthState};
use crate::middleware::error::get_request_id_from_headers;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::payments::factory::GatewayRegistry;
use crate::services::{CallbackProcessor, OrderService, PaymentInitiationService, PaymentLedger};

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub ledger: PaymentLedger,
    pub initiation: PaymentInitiationService,
    pub callbacks: CallbackProcessor,
    pub authenticator: Arc<JwtAuthenticator>,
    pub health: HealthChecker,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn Repository>,
        gateways: GatewayRegistry,
        authenticator: Arc<JwtAuthenticator>,
    ) -> Self {
        let ledger = PaymentLedger::new(repo.clone());
        Self {
            orders: OrderService::new(repo.clone(), ledger.clone()),
            initiation: PaymentInitiationService::new(repo.clone(), ledger.clone(), gateways.clone()),
            callbacks: CallbackProcessor::new(repo.clone(), ledger.clone(), gateways.clone()),
            health: HealthChecker::new(repo, gateways),
            ledger,
            authenticator,
        }
    }
}

impl FromRef<AppState> for Arc<JwtAuthenticator> {
    fn from_ref(state: &AppState) -> Self {
        state.authenticator.clone()
    }
}

/// Builds the full application router with request-id and logging layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .merge(orders::routes())
        .merge(payments::routes())
        .merge(callbacks::routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

/// Tags a handler error with the request id assigned by the request-id layer.
pub(crate) fn tag_request<T>(result: AppResult<T>, headers: &HeaderMap) -> AppResult<T> {
    result.map_err(|e: AppError| match get_request_id_from_headers(headers) {
        Some(request_id) => e.with_request_id(request_id),
        None => e,
    })
}

async fn health(State(state): State<AppState>) -> Response {
    let status = state.health.check_health().await;
    let code = if status.status == HealthState::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(status)).into_response()
}

async fn readiness(State(state): State<AppState>) -> Response {
    let status = state.health.check_health().await;
    if status.status == HealthState::Unhealthy {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready", "checks": status.checks })),
        )
            .into_response()
    } else {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ready" }))).into_response()
    }
}

async fn liveness() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "alive" }))
}
