use crate::{
    entities::OrderStatus,
    errors::ServiceError,
    repositories::{OrderDetails, OrderRepository},
    services::{
        order_status::{ensure_transition, verify_payment},
        payment_gateway::{CreateIntentRequest, PaymentGateway, PaymentIntent},
    },
};
use metrics::counter;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// What a client needs to complete payment for an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentCreated {
    pub payment_id: String,
    pub client_secret: String,
}

/// Creates payment intents and reconciles their outcome with orders.
#[derive(Clone)]
pub struct PaymentService {
    repo: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentService {
    pub fn new(repo: Arc<dyn OrderRepository>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { repo, gateway }
    }

    async fn owned_order(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        self.repo
            .find_order_for_user(order_id, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    fn ensure_pending(details: &OrderDetails) -> Result<(), ServiceError> {
        ensure_transition(&details.order, OrderStatus::Paid)
    }

    /// Opens a payment intent for the order's total. The order must belong
    /// to the caller and still be pending.
    #[instrument(skip(self))]
    pub async fn create_payment_intent(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<IntentCreated, ServiceError> {
        let details = self.owned_order(user_id, order_id).await?;
        Self::ensure_pending(&details)?;

        let request = CreateIntentRequest::for_order(&details.order)?;
        let intent = self.gateway.create_intent(request).await?;
        let client_secret = intent.client_secret.clone().ok_or_else(|| {
            ServiceError::ExternalServiceError(format!(
                "Payment intent {} has no client secret",
                intent.id
            ))
        })?;

        info!(order_id = %order_id, payment_id = %intent.id, "Payment intent ready");
        Ok(IntentCreated {
            payment_id: intent.id,
            client_secret,
        })
    }

    /// Moves a pending order to paid once the processor reports the intent
    /// as succeeded for this order's exact amount.
    ///
    /// The processor is queried before anything is written. The status change
    /// is a single conditional update, so of two concurrent confirmations at
    /// most one succeeds and the other sees `InvalidStatus`.
    #[instrument(skip(self))]
    pub async fn confirm_payment(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        payment_intent_id: &str,
    ) -> Result<OrderDetails, ServiceError> {
        let details = self.owned_order(user_id, order_id).await?;
        Self::ensure_pending(&details)?;

        let intent = self
            .gateway
            .get_intent(payment_intent_id)
            .await
            .map_err(|e| match e {
                ServiceError::NotFound(_) => ServiceError::PaymentMismatch(format!(
                    "Payment intent {} does not exist",
                    payment_intent_id
                )),
                other => other,
            })?;
        verify_payment(&details.order, &intent).map_err(|e| {
            warn!(order_id = %order_id, payment_id = %intent.id, status = %intent.status, error = %e, "Payment not accepted");
            e
        })?;

        if !self.repo.mark_paid(order_id, &intent.id).await? {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} has already been processed",
                order_id
            )));
        }

        counter!("storefront.payments.confirmed", 1);
        info!(order_id = %order_id, payment_id = %intent.id, "Order marked paid");

        self.repo
            .find_order(order_id)
            .await?
            .ok_or_else(|| ServiceError::InternalError(format!("Order {} vanished", order_id)))
    }

    /// Live processor status of an intent created for one of the caller's orders.
    #[instrument(skip(self))]
    pub async fn payment_status(
        &self,
        user_id: Uuid,
        payment_intent_id: &str,
    ) -> Result<PaymentIntent, ServiceError> {
        let intent = self.gateway.get_intent(payment_intent_id).await?;
        let caller = user_id.to_string();
        if intent.user_id() != Some(caller.as_str()) {
            return Err(ServiceError::NotFound(
                "Payment intent not found".to_string(),
            ));
        }
        Ok(intent)
    }
}
