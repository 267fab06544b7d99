use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, TransactionTrait,
};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::{OrderDetails, OrderRepository, OrderUnitOfWork};
use crate::entities::{order, order_item, product, shipping_info, OrderStatus};
use crate::errors::ServiceError;

fn db_error(context: &'static str) -> impl Fn(DbErr) -> ServiceError {
    move |e| {
        error!(error = %e, "{}", context);
        ServiceError::DatabaseError(e)
    }
}

/// Order persistence on a SeaORM connection (PostgreSQL or SQLite).
#[derive(Clone, Debug)]
pub struct SeaOrmOrderRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmOrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Loads lines and shipping info for a batch of orders in two queries.
    async fn hydrate(&self, orders: Vec<order::Model>) -> Result<Vec<OrderDetails>, ServiceError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let shipping_ids: Vec<Uuid> = orders.iter().map(|o| o.shipping_info_id).collect();

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .order_by_asc(order_item::Column::LineNumber)
            .all(self.get_db())
            .await
            .map_err(db_error("Failed to load order items"))?;

        let mut shipping: HashMap<Uuid, shipping_info::Model> = shipping_info::Entity::find()
            .filter(shipping_info::Column::Id.is_in(shipping_ids))
            .all(self.get_db())
            .await
            .map_err(db_error("Failed to load shipping info"))?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        for item in items {
            items_by_order.entry(item.order_id).or_default().push(item);
        }

        orders
            .into_iter()
            .map(|order| {
                let shipping_info = shipping.remove(&order.shipping_info_id).ok_or_else(|| {
                    ServiceError::InternalError(format!(
                        "Order {} references missing shipping info {}",
                        order.id, order.shipping_info_id
                    ))
                })?;
                let items = items_by_order.remove(&order.id).unwrap_or_default();
                Ok(OrderDetails {
                    order,
                    items,
                    shipping_info,
                })
            })
            .collect()
    }

    async fn hydrate_one(
        &self,
        order: Option<order::Model>,
    ) -> Result<Option<OrderDetails>, ServiceError> {
        match order {
            Some(order) => Ok(self.hydrate(vec![order]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OrderRepository for SeaOrmOrderRepository {
    async fn begin(&self) -> Result<Box<dyn OrderUnitOfWork>, ServiceError> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(db_error("Failed to start transaction"))?;
        Ok(Box::new(SeaOrmUnitOfWork { txn }))
    }

    #[instrument(skip(self))]
    async fn find_order(&self, order_id: Uuid) -> Result<Option<OrderDetails>, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(self.get_db())
            .await
            .map_err(db_error("Failed to load order"))?;
        self.hydrate_one(order).await
    }

    #[instrument(skip(self))]
    async fn find_order_for_user(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<OrderDetails>, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(self.get_db())
            .await
            .map_err(db_error("Failed to load order"))?;
        self.hydrate_one(order).await
    }

    #[instrument(skip(self))]
    async fn list_orders_for_user(&self, user_id: Uuid) -> Result<Vec<OrderDetails>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .all(self.get_db())
            .await
            .map_err(db_error("Failed to list orders"))?;
        self.hydrate(orders).await
    }

    #[instrument(skip(self))]
    async fn mark_paid(
        &self,
        order_id: Uuid,
        payment_reference: &str,
    ) -> Result<bool, ServiceError> {
        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid.to_value()))
            .col_expr(
                order::Column::PaymentReference,
                Expr::value(payment_reference.to_string()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending.to_value()))
            .exec(self.get_db())
            .await
            .map_err(db_error("Failed to mark order paid"))?;

        debug!(rows = result.rows_affected, "Conditional pending -> paid update");
        Ok(result.rows_affected == 1)
    }

    async fn ping(&self) -> Result<(), ServiceError> {
        self.db
            .execute_unprepared("SELECT 1")
            .await
            .map(|_| ())
            .map_err(db_error("Database ping failed"))
    }
}

/// A database transaction. Rolled back by SeaORM when dropped uncommitted.
struct SeaOrmUnitOfWork {
    txn: DatabaseTransaction,
}

#[async_trait]
impl OrderUnitOfWork for SeaOrmUnitOfWork {
    async fn find_product(
        &mut self,
        product_id: Uuid,
    ) -> Result<Option<product::Model>, ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&self.txn)
            .await
            .map_err(db_error("Failed to load product"))
    }

    async fn decrement_stock(
        &mut self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gte(quantity))
            .exec(&self.txn)
            .await
            .map_err(db_error("Failed to decrement stock"))?;
        Ok(result.rows_affected == 1)
    }

    async fn insert_shipping_info(
        &mut self,
        info: shipping_info::Model,
    ) -> Result<(), ServiceError> {
        shipping_info::Entity::insert(info.into_active_model())
            .exec_without_returning(&self.txn)
            .await
            .map(|_| ())
            .map_err(db_error("Failed to insert shipping info"))
    }

    async fn insert_order(&mut self, order: order::Model) -> Result<(), ServiceError> {
        order::Entity::insert(order.into_active_model())
            .exec_without_returning(&self.txn)
            .await
            .map(|_| ())
            .map_err(db_error("Failed to insert order"))
    }

    async fn insert_order_item(&mut self, item: order_item::Model) -> Result<(), ServiceError> {
        order_item::Entity::insert(item.into_active_model())
            .exec_without_returning(&self.txn)
            .await
            .map(|_| ())
            .map_err(db_error("Failed to insert order item"))
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        self.txn
            .commit()
            .await
            .map_err(db_error("Failed to commit transaction"))
    }
}
