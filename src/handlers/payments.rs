use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::{orders::OrderResponse, JsonBody};
use crate::{auth::AuthUser, errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePaymentIntentRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentIntentResponse {
    pub client_secret: String,
    pub payment_id: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ConfirmPaymentRequest {
    #[validate(length(min = 1, max = 255, message = "Payment intent id is required"))]
    pub payment_intent_id: String,
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentStatusResponse {
    pub status: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/create-intent",
    summary = "Create payment intent",
    description = "Open a payment intent for the full total of a pending order",
    request_body = CreatePaymentIntentRequest,
    responses(
        (status = 200, description = "Intent created", body = ApiResponse<PaymentIntentResponse>),
        (status = 400, description = "Order is not pending", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment processor failure", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    auth_user: AuthUser,
    JsonBody(request): JsonBody<CreatePaymentIntentRequest>,
) -> Result<Json<ApiResponse<PaymentIntentResponse>>, ServiceError> {
    let created = state
        .payments
        .create_payment_intent(auth_user.user_id, request.order_id)
        .await?;

    Ok(Json(ApiResponse::success(PaymentIntentResponse {
        client_secret: created.client_secret,
        payment_id: created.payment_id,
    })))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/confirm",
    summary = "Confirm payment",
    description = "Mark an order paid once its payment intent has succeeded",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Order paid", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Payment not succeeded, unknown or mismatched intent, or order already processed", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment processor failure", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    JsonBody(request): JsonBody<ConfirmPaymentRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    request.validate()?;

    let order = state
        .payments
        .confirm_payment(
            auth_user.user_id,
            request.order_id,
            request.payment_intent_id.trim(),
        )
        .await?;

    Ok(Json(ApiResponse::success(order.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    summary = "Payment status",
    description = "Current processor status of a payment intent",
    params(("id" = String, Path, description = "Payment intent id")),
    responses(
        (status = 200, description = "Status retrieved", body = ApiResponse<PaymentStatusResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Intent not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment processor failure", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn get_payment_status(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<PaymentStatusResponse>>, ServiceError> {
    let intent = state.payments.payment_status(auth_user.user_id, &id).await?;
    Ok(Json(ApiResponse::success(PaymentStatusResponse {
        status: intent.status,
    })))
}
