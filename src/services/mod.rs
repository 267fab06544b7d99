// Order placement and reads
pub mod orders;

// Lifecycle rules for orders
pub mod order_status;

// Payment processor adapter and reconciliation
pub mod payment_gateway;
pub mod payments;
