//! Process-local repository.
//!
//! A single mutex guards the whole state, so transactions are fully
//! serialized. A transaction edits a private copy and publishes it on commit.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::database::entities::{
    CartItem, NewOrder, NewOrderItem, NewPayment, Order, OrderItem, OrderStatus, Payment,
    PaymentStatus, Product,
};
use crate::database::error::{DatabaseError, DatabaseErrorKind, DbResult};
use crate::database::repository::{Repository, RepositoryTransaction};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    orders: BTreeMap<i64, Order>,
    order_items: BTreeMap<i64, OrderItem>,
    payments: BTreeMap<i64, Payment>,
    products: BTreeMap<i64, Product>,
    cart_items: BTreeMap<i64, CartItem>,
    cart_totals: BTreeMap<i64, i64>,
    next_id: i64,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone, Default)]
pub struct MemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_product(&self, title: &str, price: i64, stock: i32) -> Product {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let product = Product {
            id,
            title: title.to_string(),
            price,
            stock,
        };
        state.products.insert(id, product.clone());
        product
    }

    pub async fn add_cart_item(&self, user_id: i64, product_id: i64, quantity: i32) -> CartItem {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let item = CartItem {
            id,
            user_id,
            product_id,
            quantity,
        };
        state.cart_items.insert(id, item.clone());
        item
    }

    pub async fn cart_total(&self, user_id: i64) -> i64 {
        let state = self.state.lock().await;
        state.cart_totals.get(&user_id).copied().unwrap_or(0)
    }

    pub async fn remaining_cart_items(&self, user_id: i64) -> Vec<CartItem> {
        let state = self.state.lock().await;
        state
            .cart_items
            .values()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Every payment row recorded for the order. More than one would be a bug.
    pub async fn payments_for_order(&self, order_id: i64) -> Vec<Payment> {
        let state = self.state.lock().await;
        state
            .payments
            .values()
            .filter(|payment| payment.order_id == order_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn begin(&self) -> DbResult<Box<dyn RepositoryTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn find_order(&self, order_id: i64) -> DbResult<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn find_payment_by_order(&self, order_id: i64) -> DbResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .values()
            .find(|payment| payment.order_id == order_id)
            .cloned())
    }

    async fn order_items(&self, order_id: i64) -> DbResult<Vec<OrderItem>> {
        let state = self.state.lock().await;
        Ok(state
            .order_items
            .values()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn find_product(&self, product_id: i64) -> DbResult<Option<Product>> {
        Ok(self.state.lock().await.products.get(&product_id).cloned())
    }

    async fn ping(&self) -> DbResult<()> {
        Ok(())
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl RepositoryTransaction for MemoryTransaction {
    async fn lock_order(&mut self, order_id: i64) -> DbResult<Option<Order>> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn insert_order(&mut self, order: NewOrder) -> DbResult<Order> {
        let id = self.working.allocate_id();
        let now = Utc::now();
        let order = Order {
            id,
            user_id: order.user_id,
            shipping_address: order.shipping_address,
            status: OrderStatus::Pending,
            method_payment: order.method_payment,
            payment_status: PaymentStatus::Pending,
            total_amount: order.total_amount,
            total_items: order.total_items,
            created_at: now,
            updated_at: now,
        };
        self.working.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn save_order(&mut self, order: &Order) -> DbResult<Order> {
        let stored = self
            .working
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| DatabaseError::not_found("order", order.id))?;
        stored.status = order.status;
        stored.payment_status = order.payment_status;
        stored.method_payment = order.method_payment;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn order_items(&mut self, order_id: i64) -> DbResult<Vec<OrderItem>> {
        Ok(self
            .working
            .order_items
            .values()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn insert_order_item(&mut self, item: NewOrderItem) -> DbResult<OrderItem> {
        if !self.working.orders.contains_key(&item.order_id) {
            return Err(DatabaseError::not_found("order", item.order_id));
        }
        let id = self.working.allocate_id();
        let item = OrderItem {
            id,
            order_id: item.order_id,
            product_id: item.product_id,
            quantity: item.quantity,
            price: item.price,
        };
        self.working.order_items.insert(id, item.clone());
        Ok(item)
    }

    async fn find_payment_by_order(&mut self, order_id: i64) -> DbResult<Option<Payment>> {
        Ok(self
            .working
            .payments
            .values()
            .find(|payment| payment.order_id == order_id)
            .cloned())
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> DbResult<Payment> {
        if self
            .working
            .payments
            .values()
            .any(|existing| existing.order_id == payment.order_id)
        {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "payments_order_id_key".to_string(),
            }));
        }
        let id = self.working.allocate_id();
        let now = Utc::now();
        let payment = Payment {
            id,
            order_id: payment.order_id,
            payment_method: payment.payment_method,
            payment_status: PaymentStatus::Pending,
            amount: payment.amount,
            transaction_id: None,
            transaction_time: None,
            payment_info: payment.payment_info,
            created_at: now,
            updated_at: now,
        };
        self.working.payments.insert(id, payment.clone());
        Ok(payment)
    }

    async fn save_payment(&mut self, payment: &Payment) -> DbResult<Payment> {
        let stored = self
            .working
            .payments
            .get_mut(&payment.id)
            .ok_or_else(|| DatabaseError::not_found("payment", payment.id))?;
        stored.payment_method = payment.payment_method;
        stored.payment_status = payment.payment_status;
        stored.amount = payment.amount;
        stored.transaction_id = payment.transaction_id.clone();
        stored.transaction_time = payment.transaction_time;
        stored.payment_info = payment.payment_info.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn lock_product(&mut self, product_id: i64) -> DbResult<Option<Product>> {
        Ok(self.working.products.get(&product_id).cloned())
    }

    async fn adjust_stock(&mut self, product_id: i64, delta: i32) -> DbResult<Product> {
        let product = self
            .working
            .products
            .get_mut(&product_id)
            .ok_or_else(|| DatabaseError::not_found("product", product_id))?;
        let stock = product.stock.checked_add(delta).ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::CheckViolation {
                constraint: "products_stock_range".to_string(),
            })
        })?;
        if stock < 0 {
            return Err(DatabaseError::new(DatabaseErrorKind::CheckViolation {
                constraint: "products_stock_non_negative".to_string(),
            }));
        }
        product.stock = stock;
        Ok(product.clone())
    }

    async fn cart_items(&mut self, user_id: i64) -> DbResult<Vec<CartItem>> {
        Ok(self
            .working
            .cart_items
            .values()
            .filter(|item| item.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_cart_items(&mut self, cart_item_ids: &[i64]) -> DbResult<u64> {
        let mut removed = 0;
        for id in cart_item_ids {
            if self.working.cart_items.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn refresh_cart_total(&mut self, user_id: i64) -> DbResult<i64> {
        let total = self
            .working
            .cart_items
            .values()
            .filter(|item| item.user_id == user_id)
            .map(|item| {
                let price = self
                    .working
                    .products
                    .get(&item.product_id)
                    .map(|product| product.price)
                    .unwrap_or(0);
                price * i64::from(item.quantity)
            })
            .sum();
        self.working.cart_totals.insert(user_id, total);
        Ok(total)
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        Ok(())
    }
}
