use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::entities::{order, order_item, product, shipping_info};
use crate::errors::ServiceError;

pub mod memory;
pub mod order_repository;

pub use memory::InMemoryOrderRepository;
pub use order_repository::SeaOrmOrderRepository;

/// An order together with its lines (in line order) and delivery address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDetails {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub shipping_info: shipping_info::Model,
}

impl OrderDetails {
    /// Sum of quantity times snapshotted unit price over all lines.
    pub fn items_total(&self) -> Decimal {
        self.items.iter().map(order_item::Model::line_total).sum()
    }
}

/// Persistence for orders.
///
/// Writes that belong to order placement go through an [`OrderUnitOfWork`]
/// obtained from [`OrderRepository::begin`]; everything staged there is
/// discarded unless [`OrderUnitOfWork::commit`] succeeds.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn OrderUnitOfWork>, ServiceError>;

    async fn find_order(&self, order_id: Uuid) -> Result<Option<OrderDetails>, ServiceError>;

    async fn find_order_for_user(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<OrderDetails>, ServiceError>;

    /// The user's orders, newest first.
    async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<OrderDetails>, ServiceError>;

    /// Sets `paid` and the payment reference only if the order is still
    /// `pending`. Returns false when no row matched.
    async fn mark_paid(&self, order_id: Uuid, payment_reference: &str)
        -> Result<bool, ServiceError>;

    async fn ping(&self) -> Result<(), ServiceError>;
}

/// Atomic unit for order placement. Dropping it without `commit` rolls back.
#[async_trait]
pub trait OrderUnitOfWork: Send {
    async fn find_product(&mut self, product_id: Uuid)
        -> Result<Option<product::Model>, ServiceError>;

    /// Subtracts `quantity` from stock only if at least that much is available.
    /// Returns false when the product is missing or stock is insufficient.
    async fn decrement_stock(&mut self, product_id: Uuid, quantity: i32)
        -> Result<bool, ServiceError>;

    async fn insert_shipping_info(&mut self, info: shipping_info::Model)
        -> Result<(), ServiceError>;

    async fn insert_order(&mut self, order: order::Model) -> Result<(), ServiceError>;

    async fn insert_order_item(&mut self, item: order_item::Model) -> Result<(), ServiceError>;

    async fn commit(self: Box<Self>) -> Result<(), ServiceError>;
}
