use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use crate::database::entities::{
    CartItem, NewOrder, NewOrderItem, NewPayment, Order, OrderItem, Payment, Product,
};
use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::{Repository, RepositoryTransaction};

const ORDER_COLUMNS: &str = "id, user_id, shipping_address, status, method_payment, \
     payment_status, total_amount, total_items, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, order_id, payment_method, payment_status, amount, \
     transaction_id, transaction_time, payment_info, created_at, updated_at";

const ORDER_ITEM_COLUMNS: &str = "id, order_id, product_id, quantity, price";

const PRODUCT_COLUMNS: &str = "id, title, price, stock";

/// Postgres-backed repository
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations
    pub async fn run_migrations(&self) -> DbResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::from_sqlx(e.into()))?;
        info!("Database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn begin(&self) -> DbResult<Box<dyn RepositoryTransaction>> {
        let tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        Ok(Box::new(PgRepositoryTransaction { tx }))
    }

    async fn find_order(&self, order_id: i64) -> DbResult<Option<Order>> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_payment_by_order(&self, order_id: i64) -> DbResult<Option<Payment>> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE order_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn order_items(&self, order_id: i64) -> DbResult<Vec<OrderItem>> {
        sqlx::query_as::<_, OrderItem>(&format!(
            "SELECT {} FROM order_items WHERE order_id = $1 ORDER BY id ASC",
            ORDER_ITEM_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_product(&self, product_id: i64) -> DbResult<Option<Product>> {
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products WHERE id = $1",
            PRODUCT_COLUMNS
        ))
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}

pub struct PgRepositoryTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RepositoryTransaction for PgRepositoryTransaction {
    async fn lock_order(&mut self, order_id: i64) -> DbResult<Option<Order>> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {} FROM orders WHERE id = $1 FOR UPDATE",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn insert_order(&mut self, order: NewOrder) -> DbResult<Order> {
        sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders (user_id, shipping_address, method_payment, total_amount, total_items)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order.user_id)
        .bind(order.shipping_address)
        .bind(order.method_payment)
        .bind(order.total_amount)
        .bind(order.total_items)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn save_order(&mut self, order: &Order) -> DbResult<Order> {
        sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders
             SET status = $2, payment_status = $3, method_payment = $4, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order.id)
        .bind(order.status)
        .bind(order.payment_status)
        .bind(order.method_payment)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("order", order.id))
    }

    async fn order_items(&mut self, order_id: i64) -> DbResult<Vec<OrderItem>> {
        sqlx::query_as::<_, OrderItem>(&format!(
            "SELECT {} FROM order_items WHERE order_id = $1 ORDER BY id ASC",
            ORDER_ITEM_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn insert_order_item(&mut self, item: NewOrderItem) -> DbResult<OrderItem> {
        sqlx::query_as::<_, OrderItem>(&format!(
            "INSERT INTO order_items (order_id, product_id, quantity, price)
             VALUES ($1, $2, $3, $4)
             RETURNING {}",
            ORDER_ITEM_COLUMNS
        ))
        .bind(item.order_id)
        .bind(item.product_id)
        .bind(item.quantity)
        .bind(item.price)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_payment_by_order(&mut self, order_id: i64) -> DbResult<Option<Payment>> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE order_id = $1 FOR UPDATE",
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> DbResult<Payment> {
        sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments (order_id, payment_method, payment_status, amount, payment_info)
             VALUES ($1, $2, 'PENDING', $3, $4)
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(payment.order_id)
        .bind(payment.payment_method)
        .bind(payment.amount)
        .bind(payment.payment_info)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn save_payment(&mut self, payment: &Payment) -> DbResult<Payment> {
        sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments
             SET payment_method = $2, payment_status = $3, amount = $4, transaction_id = $5,
                 transaction_time = $6, payment_info = $7, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(payment.id)
        .bind(payment.payment_method)
        .bind(payment.payment_status)
        .bind(payment.amount)
        .bind(payment.transaction_id.as_deref())
        .bind(payment.transaction_time)
        .bind(payment.payment_info.as_deref())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("payment", payment.id))
    }

    async fn lock_product(&mut self, product_id: i64) -> DbResult<Option<Product>> {
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {} FROM products WHERE id = $1 FOR UPDATE",
            PRODUCT_COLUMNS
        ))
        .bind(product_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn adjust_stock(&mut self, product_id: i64, delta: i32) -> DbResult<Product> {
        sqlx::query_as::<_, Product>(&format!(
            "UPDATE products SET stock = stock + $2 WHERE id = $1 RETURNING {}",
            PRODUCT_COLUMNS
        ))
        .bind(product_id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("product", product_id))
    }

    async fn cart_items(&mut self, user_id: i64) -> DbResult<Vec<CartItem>> {
        sqlx::query_as::<_, CartItem>(
            "SELECT id, user_id, product_id, quantity
             FROM cart_items
             WHERE user_id = $1
             ORDER BY id ASC
             FOR UPDATE",
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn delete_cart_items(&mut self, cart_item_ids: &[i64]) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE id = ANY($1)")
            .bind(cart_item_ids)
            .execute(&mut *self.tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn refresh_cart_total(&mut self, user_id: i64) -> DbResult<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(ci.quantity::BIGINT * p.price), 0)::BIGINT
             FROM cart_items ci
             JOIN products p ON p.id = ci.product_id
             WHERE ci.user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        sqlx::query(
            "INSERT INTO carts (user_id, total_price) VALUES ($1, $2)
             ON CONFLICT (user_id) DO UPDATE SET total_price = EXCLUDED.total_price, updated_at = NOW()",
        )
        .bind(user_id)
        .bind(total)
        .execute(&mut *self.tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        debug!(user_id, total, "Cart total refreshed");
        Ok(total)
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.tx.commit().await.map_err(DatabaseError::from_sqlx)
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.tx.rollback().await.map_err(DatabaseError::from_sqlx)
    }
}
