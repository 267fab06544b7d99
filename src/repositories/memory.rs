use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{OrderDetails, OrderRepository, OrderUnitOfWork};
use crate::entities::{order, order_item, product, shipping_info, OrderStatus};
use crate::errors::ServiceError;

#[derive(Clone, Debug, Default)]
struct MemoryStore {
    products: HashMap<Uuid, product::Model>,
    shipping_infos: HashMap<Uuid, shipping_info::Model>,
    orders: HashMap<Uuid, order::Model>,
    order_items: Vec<order_item::Model>,
}

impl MemoryStore {
    fn details(&self, order: &order::Model) -> Result<OrderDetails, ServiceError> {
        let shipping_info = self
            .shipping_infos
            .get(&order.shipping_info_id)
            .cloned()
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Order {} references missing shipping info {}",
                    order.id, order.shipping_info_id
                ))
            })?;
        let mut items: Vec<_> = self
            .order_items
            .iter()
            .filter(|item| item.order_id == order.id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.line_number);

        Ok(OrderDetails {
            order: order.clone(),
            items,
            shipping_info,
        })
    }
}

/// Process-local repository for tests and local runs.
///
/// A unit of work holds the store lock until it commits or is dropped, so
/// order placements are serialized. Writes go to a staged copy that replaces
/// the store on commit.
#[derive(Clone, Debug, Default)]
pub struct InMemoryOrderRepository {
    store: Arc<Mutex<MemoryStore>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a catalog product.
    pub async fn insert_product(&self, product: product::Model) {
        self.store
            .lock()
            .await
            .products
            .insert(product.id, product);
    }

    pub async fn product(&self, product_id: Uuid) -> Option<product::Model> {
        self.store.lock().await.products.get(&product_id).cloned()
    }

    pub async fn order_count(&self) -> usize {
        self.store.lock().await.orders.len()
    }

    pub async fn order_item_count(&self) -> usize {
        self.store.lock().await.order_items.len()
    }

    pub async fn shipping_info_count(&self) -> usize {
        self.store.lock().await.shipping_infos.len()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn begin(&self) -> Result<Box<dyn OrderUnitOfWork>, ServiceError> {
        let guard = self.store.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, staged }))
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<OrderDetails>, ServiceError> {
        let store = self.store.lock().await;
        store
            .orders
            .get(&order_id)
            .map(|order| store.details(order))
            .transpose()
    }

    async fn find_order_for_user(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<OrderDetails>, ServiceError> {
        let store = self.store.lock().await;
        store
            .orders
            .get(&order_id)
            .filter(|order| order.user_id == user_id)
            .map(|order| store.details(order))
            .transpose()
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<OrderDetails>, ServiceError> {
        let store = self.store.lock().await;
        let mut orders: Vec<&order::Model> = store
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders.into_iter().map(|order| store.details(order)).collect()
    }

    async fn mark_paid(
        &self,
        order_id: Uuid,
        payment_reference: &str,
    ) -> Result<bool, ServiceError> {
        let mut store = self.store.lock().await;
        match store.orders.get_mut(&order_id) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.status = OrderStatus::Paid;
                order.payment_reference = Some(payment_reference.to_string());
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryStore>,
    staged: MemoryStore,
}

#[async_trait]
impl OrderUnitOfWork for MemoryUnitOfWork {
    async fn find_product(
        &mut self,
        product_id: Uuid,
    ) -> Result<Option<product::Model>, ServiceError> {
        Ok(self.staged.products.get(&product_id).cloned())
    }

    async fn decrement_stock(
        &mut self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        match self.staged.products.get_mut(&product_id) {
            Some(product) if product.stock >= quantity => {
                product.stock -= quantity;
                product.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_shipping_info(
        &mut self,
        info: shipping_info::Model,
    ) -> Result<(), ServiceError> {
        self.staged.shipping_infos.insert(info.id, info);
        Ok(())
    }

    async fn insert_order(&mut self, order: order::Model) -> Result<(), ServiceError> {
        if !self.staged.shipping_infos.contains_key(&order.shipping_info_id) {
            return Err(ServiceError::InternalError(format!(
                "Order {} references unknown shipping info {}",
                order.id, order.shipping_info_id
            )));
        }
        self.staged.orders.insert(order.id, order);
        Ok(())
    }

    async fn insert_order_item(&mut self, item: order_item::Model) -> Result<(), ServiceError> {
        if !self.staged.orders.contains_key(&item.order_id) {
            return Err(ServiceError::InternalError(format!(
                "Order item {} references unknown order {}",
                item.id, item.order_id
            )));
        }
        self.staged.order_items.push(item);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        let MemoryUnitOfWork { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
