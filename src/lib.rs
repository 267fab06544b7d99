//! Storefront API library
//!
//! Order placement against live stock and payment reconciliation with an
//! external card processor, exposed over an axum HTTP surface.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::{
    extract::{FromRef, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::timeout::TimeoutLayer;
use utoipa::ToSchema;

use crate::{
    auth::TokenVerifier,
    config::AppConfig,
    repositories::OrderRepository,
    services::{orders::OrderService, payment_gateway::PaymentGateway, payments::PaymentService},
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repo: Arc<dyn OrderRepository>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub token_verifier: Arc<TokenVerifier>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        repo: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let orders = OrderService::new(repo.clone(), config.payment_currency.clone());
        let payments = PaymentService::new(repo.clone(), gateway);
        let token_verifier = TokenVerifier::from_config(&config);

        Self {
            config: Arc::new(config),
            repo,
            orders: Arc::new(orders),
            payments: Arc::new(payments),
            token_verifier: Arc::new(token_verifier),
        }
    }
}

impl FromRef<AppState> for Arc<TokenVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.token_verifier.clone()
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Order and payment routes, mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    let orders = Router::new()
        .route(
            "/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        .route("/orders/:id", get(handlers::orders::get_order));

    let payments = Router::new()
        .route(
            "/payments/create-intent",
            post(handlers::payments::create_payment_intent),
        )
        .route("/payments/confirm", post(handlers::payments::confirm_payment))
        .route("/payments/:id", get(handlers::payments::get_payment_status));

    Router::new().merge(orders).merge(payments)
}

/// Full application router with request ids, tracing and the request timeout.
/// CORS and compression are left to the binary.
pub fn app_router(state: AppState) -> Router {
    let timeout = state.config.request_timeout();

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::openapi_routes())
        .layer(TimeoutLayer::new(timeout))
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    state.repo.ping().await?;

    Ok(Json(ApiResponse::success(json!({
        "status": "ok",
        "service": "storefront-api",
        "environment": state.config.environment,
        "timestamp": Utc::now().to_rfc3339(),
    }))))
}
