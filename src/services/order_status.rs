use crate::{
    entities::order::{self, OrderStatus},
    errors::ServiceError,
    services::payment_gateway::{to_minor_units, PaymentIntent},
};

/// Fails unless `order` may move from its current status to `next`.
pub fn ensure_transition(order: &order::Model, next: OrderStatus) -> Result<(), ServiceError> {
    if order.status.can_transition(next) {
        Ok(())
    } else {
        Err(ServiceError::InvalidStatus(format!(
            "Order {} cannot move from {} to {}",
            order.id, order.status, next
        )))
    }
}

/// Guard for pending -> paid. The intent must have succeeded and must carry
/// this order's id and exact total in minor units.
pub fn verify_payment(order: &order::Model, intent: &PaymentIntent) -> Result<(), ServiceError> {
    ensure_transition(order, OrderStatus::Paid)?;

    if !intent.is_succeeded() {
        return Err(ServiceError::PaymentNotSucceeded(format!(
            "Payment intent {} has status {}",
            intent.id, intent.status
        )));
    }

    let expected_order_id = order.id.to_string();
    if intent.order_id() != Some(expected_order_id.as_str()) {
        return Err(ServiceError::PaymentMismatch(format!(
            "Payment intent {} does not belong to order {}",
            intent.id, order.id
        )));
    }

    let expected_amount = to_minor_units(order.total_amount)?;
    if intent.amount != expected_amount || !intent.currency.eq_ignore_ascii_case(&order.currency)
    {
        return Err(ServiceError::PaymentMismatch(format!(
            "Payment intent {} is for {} {}, order {} expects {} {}",
            intent.id,
            intent.amount,
            intent.currency,
            order.id,
            expected_amount,
            order.currency
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn order(status: OrderStatus) -> order::Model {
        let now = Utc::now();
        order::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            shipping_info_id: Uuid::new_v4(),
            total_amount: dec!(39.98),
            currency: "usd".into(),
            status,
            payment_reference: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn intent_for(order: &order::Model, status: &str, amount: i64) -> PaymentIntent {
        PaymentIntent {
            id: "pi_123".into(),
            client_secret: None,
            status: status.into(),
            amount,
            currency: "usd".into(),
            metadata: HashMap::from([("order_id".to_string(), order.id.to_string())]),
        }
    }

    #[test]
    fn succeeded_matching_intent_passes() {
        let order = order(OrderStatus::Pending);
        let intent = intent_for(&order, "succeeded", 3998);
        assert!(verify_payment(&order, &intent).is_ok());
    }

    #[test]
    fn requires_action_is_not_enough() {
        let order = order(OrderStatus::Pending);
        let intent = intent_for(&order, "requires_action", 3998);
        assert_matches!(
            verify_payment(&order, &intent),
            Err(ServiceError::PaymentNotSucceeded(_))
        );
    }

    #[test]
    fn already_paid_order_is_rejected() {
        let order = order(OrderStatus::Paid);
        let intent = intent_for(&order, "succeeded", 3998);
        assert_matches!(
            verify_payment(&order, &intent),
            Err(ServiceError::InvalidStatus(_))
        );
    }

    #[test]
    fn amount_mismatch_is_rejected() {
        let order = order(OrderStatus::Pending);
        let intent = intent_for(&order, "succeeded", 100);
        assert_matches!(
            verify_payment(&order, &intent),
            Err(ServiceError::PaymentMismatch(_))
        );
    }

    #[test]
    fn intent_for_another_order_is_rejected() {
        let order = order(OrderStatus::Pending);
        let other = self::order(OrderStatus::Pending);
        let intent = intent_for(&other, "succeeded", 3998);
        assert_matches!(
            verify_payment(&order, &intent),
            Err(ServiceError::PaymentMismatch(_))
        );
    }
}
