use axum::{routing::get, Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Order & Payment API

Places orders against live product stock and reconciles card payments with
the payment processor.

## Authentication

Every `/api/v1` endpoint requires a bearer token:

```
Authorization: Bearer <your-jwt-token>
```

## Error Handling

Failures use one body shape with an HTTP status matching the failure class:

```json
{
  "error": "Bad Request",
  "code": "conflict",
  "message": "Insufficient stock for product 550e8400-e29b-41d4-a716-446655440000",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "orders", description = "Order placement and lookup"),
        (name = "payments", description = "Payment intents and confirmation")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::payments::create_payment_intent,
        crate::handlers::payments::confirm_payment,
        crate::handlers::payments::get_payment_status,
    ),
    components(
        schemas(
            crate::handlers::orders::CreateOrderRequest,
            crate::handlers::orders::OrderItemRequest,
            crate::handlers::orders::OrderResponse,
            crate::handlers::orders::OrderItemResponse,
            crate::handlers::orders::ShippingInfoResponse,
            crate::services::orders::ShippingDetails,
            crate::entities::OrderStatus,
            crate::handlers::payments::CreatePaymentIntentRequest,
            crate::handlers::payments::PaymentIntentResponse,
            crate::handlers::payments::ConfirmPaymentRequest,
            crate::handlers::payments::PaymentStatusResponse,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerSecurity)
)]
pub struct ApiDocV1;

/// Serves the generated document at `/api-docs/openapi.json`.
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}
