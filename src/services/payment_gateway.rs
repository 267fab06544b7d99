use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use reqwest::StatusCode;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    entities::order,
    errors::ServiceError,
    middleware_helpers::retry::{with_retry, RetryConfig, RetryPolicy},
};

/// Gateway status meaning the funds were captured.
pub const INTENT_SUCCEEDED: &str = "succeeded";

/// Metadata keys written on every intent.
pub const METADATA_ORDER_ID: &str = "order_id";
pub const METADATA_USER_ID: &str = "user_id";

/// Converts a currency amount to integer minor units (cents).
/// Rounds half away from zero: 10.005 becomes 1001.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "Amount cannot be negative: {}",
            amount
        )));
    }

    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|cents| cents.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| {
            ServiceError::ValidationError(format!("Amount {} is out of range", amount))
        })
}

/// The processor's view of a payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub status: String,
    /// Amount in minor units
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentIntent {
    pub fn is_succeeded(&self) -> bool {
        self.status == INTENT_SUCCEEDED
    }

    pub fn order_id(&self) -> Option<&str> {
        self.metadata.get(METADATA_ORDER_ID).map(String::as_str)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.metadata.get(METADATA_USER_ID).map(String::as_str)
    }
}

/// Parameters for a new payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateIntentRequest {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub currency: String,
}

impl CreateIntentRequest {
    pub fn for_order(order: &order::Model) -> Result<Self, ServiceError> {
        Ok(Self {
            order_id: order.id,
            user_id: order.user_id,
            amount: to_minor_units(order.total_amount)?,
            currency: order.currency.clone(),
        })
    }

    /// Same key for every attempt on the same order, so retries never create a second intent.
    pub fn idempotency_key(&self) -> String {
        format!("order-{}-intent-{}", self.order_id, self.amount)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a payment intent for the given amount.
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, ServiceError>;

    /// Fetches the current state of an intent.
    async fn get_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServiceError>;
}

/// Processor object ids are `[A-Za-z0-9_]+`; anything else never reaches a URL.
pub fn is_valid_intent_id(intent_id: &str) -> bool {
    !intent_id.is_empty()
        && intent_id.len() <= 255
        && intent_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Failure from a single processor call, before mapping to [`ServiceError`].
#[derive(Debug)]
enum GatewayError {
    Transport(reqwest::Error),
    Status { status: StatusCode, body: String },
    Decode(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Transport(e) => write!(f, "transport error: {}", e),
            GatewayError::Status { status, body } => {
                write!(f, "processor returned {}: {}", status, body)
            }
            GatewayError::Decode(msg) => write!(f, "invalid processor response: {}", msg),
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        counter!("storefront.payment_gateway.errors", 1);
        match err {
            GatewayError::Status { status, .. } if status == StatusCode::NOT_FOUND => {
                ServiceError::NotFound("Payment intent not found".to_string())
            }
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

/// Retries transport failures, rate limiting and processor-side errors.
struct TransientGatewayErrors;

impl RetryPolicy<GatewayError> for TransientGatewayErrors {
    fn is_retryable(&self, error: &GatewayError) -> bool {
        match error {
            GatewayError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            GatewayError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            GatewayError::Decode(_) => false,
        }
    }
}

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: String,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl StripeConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            secret_key: cfg.stripe_secret_key.clone(),
            api_base: cfg.stripe_api_base.trim_end_matches('/').to_string(),
            timeout: cfg.gateway_timeout(),
            retry: cfg.gateway_retry(),
        }
    }
}

impl fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Payment intents against the Stripe REST API (form-encoded, basic auth).
#[derive(Clone, Debug)]
pub struct StripeGateway {
    config: StripeConfig,
    client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { config, client })
    }

    fn intents_url(&self) -> String {
        format!("{}/v1/payment_intents", self.config.api_base)
    }

    async fn read_intent(response: reqwest::Response) -> Result<PaymentIntent, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status { status, body });
        }
        response
            .json::<PaymentIntent>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn post_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        let params = [
            ("amount", request.amount.to_string()),
            ("currency", request.currency.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            (
                "metadata[order_id]",
                request.order_id.to_string(),
            ),
            ("metadata[user_id]", request.user_id.to_string()),
        ];

        let response = self
            .client
            .post(self.intents_url())
            .basic_auth(&self.config.secret_key, Some(""))
            .header("Idempotency-Key", request.idempotency_key())
            .form(&params)
            .send()
            .await
            .map_err(GatewayError::Transport)?;

        Self::read_intent(response).await
    }

    async fn fetch_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        let response = self
            .client
            .get(format!("{}/{}", self.intents_url(), intent_id))
            .basic_auth(&self.config.secret_key, Some(""))
            .send()
            .await
            .map_err(GatewayError::Transport)?;

        Self::read_intent(response).await
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = request.amount))]
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        let intent = with_retry(&self.config.retry, &TransientGatewayErrors, || {
            self.post_intent(&request)
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create payment intent");
            ServiceError::from(e)
        })?;

        info!(intent_id = %intent.id, "Payment intent created");
        Ok(intent)
    }

    #[instrument(skip(self))]
    async fn get_intent(&self, intent_id: &str) -> Result<PaymentIntent, ServiceError> {
        if !is_valid_intent_id(intent_id) {
            return Err(ServiceError::ValidationError(
                "Invalid payment intent id".to_string(),
            ));
        }

        with_retry(&self.config.retry, &TransientGatewayErrors, || {
            self.fetch_intent(intent_id)
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to retrieve payment intent");
            ServiceError::from(e)
        })
    }
}
