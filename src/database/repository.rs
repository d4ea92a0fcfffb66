use async_trait::async_trait;

use crate::database::entities::{
    CartItem, NewOrder, NewOrderItem, NewPayment, Order, OrderItem, Payment, Product,
};
use crate::database::error::DbResult;

/// Entry point to the relational store.
///
/// Reads on the repository itself never lock. Anything that mutates orders,
/// payments or stock goes through [`RepositoryTransaction`].
#[async_trait]
pub trait Repository: Send + Sync {
    async fn begin(&self) -> DbResult<Box<dyn RepositoryTransaction>>;

    async fn find_order(&self, order_id: i64) -> DbResult<Option<Order>>;

    async fn find_payment_by_order(&self, order_id: i64) -> DbResult<Option<Payment>>;

    async fn order_items(&self, order_id: i64) -> DbResult<Vec<OrderItem>>;

    async fn find_product(&self, product_id: i64) -> DbResult<Option<Product>>;

    async fn ping(&self) -> DbResult<()>;
}

/// A unit of work. Dropping it without `commit` discards every change.
#[async_trait]
pub trait RepositoryTransaction: Send {
    /// Loads the order and holds its row lock until commit/rollback.
    async fn lock_order(&mut self, order_id: i64) -> DbResult<Option<Order>>;

    async fn insert_order(&mut self, order: NewOrder) -> DbResult<Order>;

    /// Persists status, payment status and payment method; bumps `updated_at`.
    async fn save_order(&mut self, order: &Order) -> DbResult<Order>;

    async fn order_items(&mut self, order_id: i64) -> DbResult<Vec<OrderItem>>;

    async fn insert_order_item(&mut self, item: NewOrderItem) -> DbResult<OrderItem>;

    async fn find_payment_by_order(&mut self, order_id: i64) -> DbResult<Option<Payment>>;

    /// Fails with a unique violation if the order already has a payment.
    async fn insert_payment(&mut self, payment: NewPayment) -> DbResult<Payment>;

    async fn save_payment(&mut self, payment: &Payment) -> DbResult<Payment>;

    async fn lock_product(&mut self, product_id: i64) -> DbResult<Option<Product>>;

    /// Adds `delta` (may be negative) to the product's stock.
    async fn adjust_stock(&mut self, product_id: i64, delta: i32) -> DbResult<Product>;

    async fn cart_items(&mut self, user_id: i64) -> DbResult<Vec<CartItem>>;

    async fn delete_cart_items(&mut self, cart_item_ids: &[i64]) -> DbResult<u64>;

    /// Recomputes and stores the cart total from the remaining items.
    async fn refresh_cart_total(&mut self, user_id: i64) -> DbResult<i64>;

    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}
