use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Catalog product. This service only reads price and stock and decrements stock.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(length(
        min = 1,
        max = 255,
        message = "Product name must be between 1 and 255 characters"
    ))]
    pub name: String,

    /// Current unit price
    pub price: Decimal,

    /// Units available; never negative
    #[validate(range(min = 0, message = "Stock cannot be negative"))]
    pub stock: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        active_model.updated_at = Set(Utc::now());

        let model: Model = active_model.clone().try_into().map_err(|_| {
            DbErr::Custom("Failed to convert ActiveModel to Model for validation".to_string())
        })?;
        model
            .validate()
            .map_err(|err| DbErr::Custom(format!("Product validation failed: {}", err)))?;

        Ok(active_model)
    }
}
