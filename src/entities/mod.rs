pub mod order;
pub mod order_item;
pub mod product;
pub mod shipping_info;

pub use order::OrderStatus;
