//! The Stripe adapter against a local HTTP double.

use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use storefront_api::{
    errors::ServiceError,
    middleware_helpers::RetryConfig,
    services::payment_gateway::{CreateIntentRequest, PaymentGateway, StripeConfig, StripeGateway},
};
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway(server: &MockServer) -> StripeGateway {
    StripeGateway::new(StripeConfig {
        secret_key: "sk_test_123".to_string(),
        api_base: server.uri(),
        timeout: Duration::from_secs(2),
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_factor: 2.0,
            jitter: 0.0,
        },
    })
    .expect("gateway client")
}

fn request() -> CreateIntentRequest {
    CreateIntentRequest {
        order_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        amount: 3998,
        currency: "usd".to_string(),
    }
}

fn intent_json(request: &CreateIntentRequest, status: &str) -> serde_json::Value {
    json!({
        "id": "pi_3MtwBwLkdIwHu7ix28a3tqPa",
        "object": "payment_intent",
        "client_secret": "pi_3MtwBwLkdIwHu7ix28a3tqPa_secret_YrKJUKribcBjcG8HVhfZluoGH",
        "status": status,
        "amount": request.amount,
        "currency": request.currency,
        "metadata": {
            "order_id": request.order_id.to_string(),
            "user_id": request.user_id.to_string()
        }
    })
}

#[tokio::test]
async fn create_intent_posts_form_with_metadata_and_idempotency_key() {
    let server = MockServer::start().await;
    let req = request();

    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(header("authorization", "Basic c2tfdGVzdF8xMjM6"))
        .and(header("Idempotency-Key", req.idempotency_key().as_str()))
        .and(body_string_contains("amount=3998"))
        .and(body_string_contains("currency=usd"))
        .and(body_string_contains(format!(
            "metadata%5Border_id%5D={}",
            req.order_id
        )))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(intent_json(&req, "requires_payment_method")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let intent = gateway(&server).create_intent(req.clone()).await.unwrap();
    assert_eq!(intent.id, "pi_3MtwBwLkdIwHu7ix28a3tqPa");
    assert_eq!(intent.amount, 3998);
    assert!(intent.client_secret.is_some());
    assert_eq!(intent.order_id(), Some(req.order_id.to_string().as_str()));
}

#[tokio::test]
async fn server_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    let req = request();

    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream hiccup"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent_json(&req, "requires_payment_method")))
        .expect(1)
        .mount(&server)
        .await;

    let intent = gateway(&server).create_intent(req).await.unwrap();
    assert_eq!(intent.status, "requires_payment_method");
}

#[tokio::test]
async fn exhausted_retries_surface_as_external_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    assert_matches!(
        gateway(&server).get_intent("pi_flaky").await,
        Err(ServiceError::ExternalServiceError(_))
    );
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "type": "invalid_request_error", "message": "Amount must be at least 50 cents" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    assert_matches!(
        gateway(&server).create_intent(request()).await,
        Err(ServiceError::ExternalServiceError(_))
    );
}

#[tokio::test]
async fn get_intent_reads_status_and_maps_missing_to_not_found() {
    let server = MockServer::start().await;
    let req = request();

    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_3MtwBwLkdIwHu7ix28a3tqPa"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent_json(&req, "succeeded")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "type": "invalid_request_error", "code": "resource_missing" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateway(&server);
    let intent = gw.get_intent("pi_3MtwBwLkdIwHu7ix28a3tqPa").await.unwrap();
    assert!(intent.is_succeeded());
    assert_eq!(intent.amount, 3998);

    assert_matches!(
        gw.get_intent("pi_missing").await,
        Err(ServiceError::NotFound(_))
    );
    for bad in ["../charges", "pi_123?expand[]=customer", "pi_123#x"] {
        assert_matches!(gw.get_intent(bad).await, Err(ServiceError::ValidationError(_)));
    }
}
