#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use storefront_api::{
    app_router,
    auth::Claims,
    config::AppConfig,
    entities::product,
    errors::ServiceError,
    repositories::InMemoryOrderRepository,
    services::payment_gateway::{
        CreateIntentRequest, PaymentGateway, PaymentIntent, METADATA_ORDER_ID, METADATA_USER_ID,
    },
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &str = "k3Jd9xQz7LmN2pRt5VwY8bHc1FgS4uXe6AiO0oPqZyTrWvEsDlKjHgFdSaQwErTy";

/// Scriptable payment processor. Intents start in `requires_payment_method`;
/// tests move them along with [`FakeGateway::set_status`].
#[derive(Default)]
pub struct FakeGateway {
    intents: Mutex<HashMap<String, PaymentIntent>>,
    created: AtomicUsize,
    get_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn set_status(&self, intent_id: &str, status: &str) {
        let mut intents = self.intents.lock().unwrap();
        let intent = intents.get_mut(intent_id).expect("unknown intent");
        intent.status = status.to_string();
    }

    pub fn set_amount(&self, intent_id: &str, amount: i64) {
        let mut intents = self.intents.lock().unwrap();
        let intent = intents.get_mut(intent_id).expect("unknown intent");
        intent.amount = amount;
    }

    pub fn intent(&self, intent_id: &str) -> Option<PaymentIntent> {
        self.intents.lock().unwrap().get(intent_id).cloned()
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("pi_fake_{}", n);
        let intent = PaymentIntent {
            id: id.clone(),
            client_secret: Some(format!("{}_secret", id)),
            status: "requires_payment_method".to_string(),
            amount: request.amount,
            currency: request.currency,
            metadata: HashMap::from([
                (METADATA_ORDER_ID.to_string(), request.order_id.to_string()),
                (METADATA_USER_ID.to_string(), request.user_id.to_string()),
            ]),
        };
        self.intents.lock().unwrap().insert(id, intent.clone());
        Ok(intent)
    }

    async fn get_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServiceError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.intent(intent_id)
            .ok_or_else(|| ServiceError::NotFound("Payment intent not found".to_string()))
    }
}

pub fn test_config() -> AppConfig {
    AppConfig::new(
        "sqlite::memory:".to_string(),
        TEST_SECRET.to_string(),
        "test".to_string(),
    )
}

pub fn token_for(config: &AppConfig, user_id: Uuid) -> String {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + chrono::Duration::hours(1)).timestamp(),
        iat: now.timestamp(),
        iss: config.auth_issuer.clone(),
        aud: config.auth_audience.clone(),
        email: Some("buyer@example.com".to_string()),
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .expect("encode access token")
}

/// Router over the in-memory repository and [`FakeGateway`].
pub struct TestApp {
    router: Router,
    pub repo: InMemoryOrderRepository,
    pub gateway: Arc<FakeGateway>,
    pub config: AppConfig,
    pub user_id: Uuid,
    token: String,
}

impl TestApp {
    pub fn new() -> Self {
        let config = test_config();
        let repo = InMemoryOrderRepository::new();
        let gateway = Arc::new(FakeGateway::default());
        let state = AppState::new(config.clone(), Arc::new(repo.clone()), gateway.clone());
        let user_id = Uuid::new_v4();
        let token = token_for(&config, user_id);

        Self {
            router: app_router(state),
            repo,
            gateway,
            config,
            user_id,
            token,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        token_for(&self.config, user_id)
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    pub async fn seed_product(&self, price: Decimal, stock: i32) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.repo
            .insert_product(product::Model {
                id,
                name: format!("Test Product {}", &id.to_string()[..8]),
                price,
                stock,
                created_at: now,
                updated_at: now,
            })
            .await;
        id
    }

    pub async fn stock(&self, product_id: Uuid) -> i32 {
        self.repo
            .product(product_id)
            .await
            .expect("seeded product")
            .stock
    }

    /// Places an order through the HTTP surface and returns the response.
    pub async fn place_order(&self, lines: &[(Uuid, i32)]) -> Response {
        self.request_authenticated(Method::POST, "/api/v1/orders", Some(order_body(lines)))
            .await
    }
}

pub fn order_body(lines: &[(Uuid, i32)]) -> Value {
    let items: Vec<Value> = lines
        .iter()
        .map(|(product_id, quantity)| json!({ "product_id": product_id, "quantity": quantity }))
        .collect();
    json!({
        "order_items": items,
        "shipping_info": {
            "address": "742 Evergreen Terrace",
            "city": "Springfield",
            "state": "OR",
            "country": "US",
            "postal_code": "97403",
            "phone_number": "555-0113"
        }
    })
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
