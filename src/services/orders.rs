use crate::{
    entities::{order, order_item, shipping_info, OrderStatus},
    errors::ServiceError,
    repositories::{OrderDetails, OrderRepository},
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Upper bound on lines in a single order.
pub const MAX_ORDER_LINES: usize = 100;

/// One requested line: which product and how many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Delivery address supplied when placing an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingDetails {
    #[validate(length(min = 1, max = 255, message = "Address is required"))]
    pub address: String,
    #[validate(length(min = 1, max = 255, message = "City is required"))]
    pub city: String,
    #[validate(length(min = 1, max = 255, message = "State is required"))]
    pub state: String,
    #[validate(length(min = 1, max = 255, message = "Country is required"))]
    pub country: String,
    #[validate(length(min = 1, max = 255, message = "Postal code is required"))]
    pub postal_code: String,
    #[validate(length(min = 1, max = 255, message = "Phone number is required"))]
    pub phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrderCommand {
    pub items: Vec<OrderLine>,
    pub shipping: ShippingDetails,
}

impl CreateOrderCommand {
    fn validate(&self) -> Result<(), ServiceError> {
        if self.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "Order must contain at least one item".to_string(),
            ));
        }
        if self.items.len() > MAX_ORDER_LINES {
            return Err(ServiceError::ValidationError(format!(
                "Order cannot contain more than {} items",
                MAX_ORDER_LINES
            )));
        }
        if let Some(line) = self.items.iter().find(|line| line.quantity <= 0) {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for product {} must be greater than zero",
                line.product_id
            )));
        }
        self.shipping.validate()?;
        Ok(())
    }
}

/// Places and reads orders.
#[derive(Clone)]
pub struct OrderService {
    repo: Arc<dyn OrderRepository>,
    currency: String,
}

impl OrderService {
    pub fn new(repo: Arc<dyn OrderRepository>, currency: impl Into<String>) -> Self {
        Self {
            repo,
            currency: currency.into().to_ascii_lowercase(),
        }
    }

    /// Places an order in one atomic unit.
    ///
    /// Each line is checked against current stock, decremented with a
    /// conditional write and priced from the catalog at this moment. Any
    /// failing line discards the whole unit, including earlier decrements.
    #[instrument(skip(self, command), fields(user_id = %user_id, lines = command.items.len()))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        command: CreateOrderCommand,
    ) -> Result<OrderDetails, ServiceError> {
        command.validate()?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let mut unit = self.repo.begin().await?;
        let mut items = Vec::with_capacity(command.items.len());
        let mut total = Decimal::ZERO;

        for (index, line) in command.items.iter().enumerate() {
            let product = unit.find_product(line.product_id).await?.ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", line.product_id))
            })?;

            if product.stock < line.quantity {
                warn!(product_id = %product.id, requested = line.quantity, available = product.stock, "Insufficient stock");
                counter!("storefront.orders.stock_conflicts", 1);
                return Err(ServiceError::InsufficientStock(format!(
                    "Insufficient stock for product {}",
                    product.id
                )));
            }

            if !unit.decrement_stock(product.id, line.quantity).await? {
                warn!(product_id = %product.id, "Stock changed before decrement");
                counter!("storefront.orders.stock_conflicts", 1);
                return Err(ServiceError::InsufficientStock(format!(
                    "Insufficient stock for product {}",
                    product.id
                )));
            }

            let unit_price = product.price.round_dp(2);
            total += unit_price * Decimal::from(line.quantity);
            items.push(order_item::Model {
                id: Uuid::new_v4(),
                order_id,
                product_id: product.id,
                line_number: index as i32 + 1,
                quantity: line.quantity,
                unit_price,
                created_at: now,
            });
        }

        let shipping = command.shipping;
        let shipping_info = shipping_info::Model {
            id: Uuid::new_v4(),
            address: shipping.address,
            city: shipping.city,
            state: shipping.state,
            country: shipping.country,
            postal_code: shipping.postal_code,
            phone_number: shipping.phone_number,
            created_at: now,
        };
        let order = order::Model {
            id: order_id,
            user_id,
            shipping_info_id: shipping_info.id,
            total_amount: total,
            currency: self.currency.clone(),
            status: OrderStatus::Pending,
            payment_reference: None,
            created_at: now,
            updated_at: now,
        };

        unit.insert_shipping_info(shipping_info.clone()).await?;
        unit.insert_order(order.clone()).await?;
        for item in &items {
            unit.insert_order_item(item.clone()).await?;
        }
        unit.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order");
            e
        })?;

        counter!("storefront.orders.created", 1);
        info!(order_id = %order_id, total = %total, "Order created");

        Ok(OrderDetails {
            order,
            items,
            shipping_info,
        })
    }

    /// An order owned by `user_id`. Orders of other users are reported as missing.
    #[instrument(skip(self))]
    pub async fn get_order(&self, user_id: Uuid, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        self.repo
            .find_order_for_user(order_id, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    #[instrument(skip(self))]
    pub async fn list_orders(&self, user_id: Uuid) -> Result<Vec<OrderDetails>, ServiceError> {
        self.repo.list_orders_for_user(user_id).await
    }
}
