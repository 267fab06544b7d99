use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DatabaseBackend;

pub struct Migrator;

/// Money column. SQLite caps decimal precision at 16 digits.
fn money_column<T: IntoIden>(manager: &SchemaManager, column: T) -> ColumnDef {
    let mut def = ColumnDef::new(column);
    match manager.get_database_backend() {
        DatabaseBackend::Sqlite => def.decimal_len(16, 4),
        _ => def.decimal_len(19, 4),
    };
    def
}

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_products_table::Migration),
            Box::new(m20240101_000002_create_shipping_infos_table::Migration),
            Box::new(m20240101_000003_create_orders_table::Migration),
            Box::new(m20240101_000004_create_order_items_table::Migration),
        ]
    }
}

mod m20240101_000001_create_products_table {

    use super::money_column;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(
                            money_column(manager, Products::Price)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::Stock)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(Products::Stock).gte(0)),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Name,
        Price,
        Stock,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_shipping_infos_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_shipping_infos_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ShippingInfos::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ShippingInfos::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ShippingInfos::Address).string().not_null())
                        .col(ColumnDef::new(ShippingInfos::City).string().not_null())
                        .col(ColumnDef::new(ShippingInfos::State).string().not_null())
                        .col(ColumnDef::new(ShippingInfos::Country).string().not_null())
                        .col(
                            ColumnDef::new(ShippingInfos::PostalCode)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShippingInfos::PhoneNumber)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ShippingInfos::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ShippingInfos::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ShippingInfos {
        Table,
        Id,
        Address,
        City,
        State,
        Country,
        PostalCode,
        PhoneNumber,
        CreatedAt,
    }
}

mod m20240101_000003_create_orders_table {

    use super::m20240101_000002_create_shipping_infos_table::ShippingInfos;
    use super::money_column;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::ShippingInfoId).uuid().not_null())
                        .col(
                            money_column(manager, Orders::TotalAmount)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(Orders::Status)
                                .string_len(20)
                                .not_null()
                                .default("pending"),
                        )
                        .col(ColumnDef::new(Orders::PaymentReference).string().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_shipping_info")
                                .from(Orders::Table, Orders::ShippingInfoId)
                                .to(ShippingInfos::Table, ShippingInfos::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        UserId,
        ShippingInfoId,
        TotalAmount,
        Currency,
        Status,
        PaymentReference,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000004_create_order_items_table {

    use super::m20240101_000001_create_products_table::Products;
    use super::m20240101_000003_create_orders_table::Orders;
    use super::money_column;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::LineNumber).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(OrderItems::Quantity).gt(0)),
                        )
                        .col(
                            money_column(manager, OrderItems::UnitPrice)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_product")
                                .from(OrderItems::Table, OrderItems::ProductId)
                                .to(Products::Table, Products::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        LineNumber,
        Quantity,
        UnitPrice,
        CreatedAt,
    }
}
