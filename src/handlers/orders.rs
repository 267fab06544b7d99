use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::JsonBody;
use crate::{
    auth::AuthUser,
    entities::{order_item, shipping_info, OrderStatus},
    errors::ServiceError,
    repositories::OrderDetails,
    services::orders::{CreateOrderCommand, OrderLine, ShippingDetails},
    ApiResponse, AppState,
};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 100, message = "Order must contain between 1 and 100 items"))]
    pub order_items: Vec<OrderItemRequest>,
    pub shipping_info: ShippingDetails,
}

impl CreateOrderRequest {
    fn validate_all(&self) -> Result<(), ServiceError> {
        self.validate()?;
        for item in &self.order_items {
            item.validate()?;
        }
        self.shipping_info.validate()?;
        Ok(())
    }

    fn into_command(self) -> CreateOrderCommand {
        CreateOrderCommand {
            items: self
                .order_items
                .into_iter()
                .map(|item| OrderLine {
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
                .collect(),
            shipping: self.shipping_info,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub line_number: i32,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl From<order_item::Model> for OrderItemResponse {
    fn from(item: order_item::Model) -> Self {
        Self {
            line_total: item.line_total(),
            id: item.id,
            product_id: item.product_id,
            line_number: item.line_number,
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ShippingInfoResponse {
    pub address: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub postal_code: String,
    pub phone_number: String,
}

impl From<shipping_info::Model> for ShippingInfoResponse {
    fn from(info: shipping_info::Model) -> Self {
        Self {
            address: info.address,
            city: info.city,
            state: info.state,
            country: info.country,
            postal_code: info.postal_code,
            phone_number: info.phone_number,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_reference: Option<String>,
    pub order_items: Vec<OrderItemResponse>,
    pub shipping_info: ShippingInfoResponse,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrderDetails> for OrderResponse {
    fn from(details: OrderDetails) -> Self {
        let OrderDetails {
            order,
            items,
            shipping_info,
        } = details;
        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status,
            total_amount: order.total_amount,
            currency: order.currency,
            payment_reference: order.payment_reference,
            order_items: items.into_iter().map(Into::into).collect(),
            shipping_info: shipping_info.into(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Place an order. Stock is reserved and prices are fixed at this moment.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    JsonBody(request): JsonBody<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    request.validate_all()?;

    let created = state
        .orders
        .create_order(auth_user.user_id, request.into_command())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(created.into())),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "The caller's orders, newest first",
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<Vec<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, ServiceError> {
    let orders = state.orders.list_orders(auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(
        orders.into_iter().map(Into::into).collect(),
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.orders.get_order(auth_user.user_id, id).await?;
    Ok(Json(ApiResponse::success(order.into())))
}
