//! The SeaORM repository against an in-memory SQLite database.

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, IntoActiveModel};
use storefront_api::{
    db::{establish_connection_with_config, run_migrations, DbConfig},
    entities::{product, OrderStatus},
    errors::ServiceError,
    repositories::{OrderRepository, OrderUnitOfWork, SeaOrmOrderRepository},
    services::orders::{CreateOrderCommand, OrderLine, OrderService, ShippingDetails},
};
use uuid::Uuid;

async fn database() -> Arc<DatabaseConnection> {
    let pool = establish_connection_with_config(&DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    })
    .await
    .expect("sqlite connection");
    run_migrations(&pool).await.expect("migrations");
    Arc::new(pool)
}

async fn seed(db: &DatabaseConnection, price: Decimal, stock: i32) -> Uuid {
    let now = Utc::now();
    let id = Uuid::new_v4();
    product::Model {
        id,
        name: "Sample".to_string(),
        price,
        stock,
        created_at: now,
        updated_at: now,
    }
    .into_active_model()
    .insert(db)
    .await
    .expect("seed product");
    id
}

async fn stock(db: &DatabaseConnection, id: Uuid) -> i32 {
    product::Entity::find_by_id(id)
        .one(db)
        .await
        .unwrap()
        .expect("product exists")
        .stock
}

fn command(lines: &[(Uuid, i32)]) -> CreateOrderCommand {
    CreateOrderCommand {
        items: lines
            .iter()
            .map(|&(product_id, quantity)| OrderLine {
                product_id,
                quantity,
            })
            .collect(),
        shipping: ShippingDetails {
            address: "221B Baker Street".into(),
            city: "London".into(),
            state: "Greater London".into(),
            country: "GB".into(),
            postal_code: "NW1 6XE".into(),
            phone_number: "+44 20 7224 3688".into(),
        },
    }
}

#[tokio::test]
async fn placed_order_round_trips_through_the_database() {
    let db = database().await;
    let repo = Arc::new(SeaOrmOrderRepository::new(db.clone()));
    let service = OrderService::new(repo.clone(), "usd");
    let mug = seed(&db, dec!(19.99), 10).await;
    let tea = seed(&db, dec!(4.50), 5).await;
    let user = Uuid::new_v4();

    let created = service
        .create_order(user, command(&[(mug, 2), (tea, 1)]))
        .await
        .unwrap();
    assert_eq!(created.order.total_amount, dec!(44.48));

    let stored = repo
        .find_order_for_user(created.order.id, user)
        .await
        .unwrap()
        .expect("order stored");
    assert_eq!(stored.order.status, OrderStatus::Pending);
    assert_eq!(stored.order.total_amount.round_dp(2), dec!(44.48));
    assert_eq!(stored.items.len(), 2);
    assert_eq!(stored.items[0].line_number, 1);
    assert_eq!(stored.items[0].product_id, mug);
    assert_eq!(stored.items[1].unit_price.round_dp(2), dec!(4.50));
    assert_eq!(stored.items_total().round_dp(2), dec!(44.48));
    assert_eq!(stored.shipping_info.city, "London");

    assert_eq!(stock(&db, mug).await, 8);
    assert_eq!(stock(&db, tea).await, 4);

    assert!(repo
        .find_order_for_user(created.order.id, Uuid::new_v4())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn out_of_stock_line_rolls_back_the_transaction() {
    let db = database().await;
    let repo = Arc::new(SeaOrmOrderRepository::new(db.clone()));
    let service = OrderService::new(repo.clone(), "usd");
    let a = seed(&db, dec!(1.00), 10).await;
    let b = seed(&db, dec!(2.00), 1).await;
    let c = seed(&db, dec!(3.00), 10).await;
    let user = Uuid::new_v4();

    let result = service
        .create_order(user, command(&[(a, 4), (b, 2), (c, 1)]))
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    assert_eq!(stock(&db, a).await, 10);
    assert_eq!(stock(&db, b).await, 1);
    assert_eq!(stock(&db, c).await, 10);
    assert!(repo.list_orders_for_user(user).await.unwrap().is_empty());
}

#[tokio::test]
async fn conditional_decrement_refuses_to_go_negative() {
    let db = database().await;
    let repo = SeaOrmOrderRepository::new(db.clone());
    let widget = seed(&db, dec!(5.00), 5).await;

    let mut unit = repo.begin().await.unwrap();
    assert!(unit.decrement_stock(widget, 3).await.unwrap());
    assert!(!unit.decrement_stock(widget, 3).await.unwrap());
    assert!(!unit.decrement_stock(Uuid::new_v4(), 1).await.unwrap());
    unit.commit().await.unwrap();

    assert_eq!(stock(&db, widget).await, 2);
}

#[tokio::test]
async fn mark_paid_is_a_one_shot_transition() {
    let db = database().await;
    let repo = Arc::new(SeaOrmOrderRepository::new(db.clone()));
    let service = OrderService::new(repo.clone(), "usd");
    let mug = seed(&db, dec!(19.99), 10).await;

    let created = service
        .create_order(Uuid::new_v4(), command(&[(mug, 1)]))
        .await
        .unwrap();

    assert!(repo.mark_paid(created.order.id, "pi_first").await.unwrap());
    assert!(!repo.mark_paid(created.order.id, "pi_second").await.unwrap());
    assert!(!repo.mark_paid(Uuid::new_v4(), "pi_other").await.unwrap());

    let stored = repo.find_order(created.order.id).await.unwrap().unwrap();
    assert_eq!(stored.order.status, OrderStatus::Paid);
    assert_eq!(stored.order.payment_reference.as_deref(), Some("pi_first"));
}

#[tokio::test]
async fn orders_are_listed_newest_first() {
    let db = database().await;
    let repo = Arc::new(SeaOrmOrderRepository::new(db.clone()));
    let service = OrderService::new(repo.clone(), "usd");
    let mug = seed(&db, dec!(1.00), 10).await;
    let user = Uuid::new_v4();

    let older = service.create_order(user, command(&[(mug, 1)])).await.unwrap();
    let newer = service.create_order(user, command(&[(mug, 2)])).await.unwrap();

    // Push the first order back in time so ordering does not depend on clock resolution.
    let mut backdated = older.order.clone().into_active_model();
    backdated.created_at = sea_orm::Set(Utc::now() - Duration::days(1));
    backdated.update(db.as_ref()).await.unwrap();

    let listed = repo.list_orders_for_user(user).await.unwrap();
    let ids: Vec<Uuid> = listed.iter().map(|d| d.order.id).collect();
    assert_eq!(ids, vec![newer.order.id, older.order.id]);
    assert_eq!(listed[0].items.len(), 1);
    assert!(repo.ping().await.is_ok());
}
