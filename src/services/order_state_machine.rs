//! Order lifecycle: checkout from the cart, status progression and cancellation.
//!
//! ```text
//! PENDING -> CONFIRMED -> PROCESSING -> SHIPPING -> DELIVERED
//!    |
//!    +----> CANCELLED
//! ```
//!
//! Cancelling puts every ordered quantity back in stock and refunds a PAID
//! payment in the same transaction.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::Identity;
use crate::database::entities::{
    NewOrder, NewOrderItem, Order, OrderItem, OrderStatus, Payment, PaymentMethod, PaymentStatus,
};
use crate::database::repository::{Repository, RepositoryTransaction};
use crate::error::{AppError, AppResult, DomainError};
use crate::services::payment_ledger::{lock_order, PaymentLedger};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub shipping_address: String,
    pub method_payment: PaymentMethod,
    /// Cart items to check out; `None` takes the whole cart.
    #[serde(default)]
    pub cart_item_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payment: Option<Payment>,
}

#[derive(Clone)]
pub struct OrderService {
    repo: Arc<dyn Repository>,
    ledger: PaymentLedger,
}

impl OrderService {
    pub fn new(repo: Arc<dyn Repository>, ledger: PaymentLedger) -> Self {
        Self { repo, ledger }
    }

    pub async fn create_order(
        &self,
        identity: &Identity,
        request: CreateOrderRequest,
    ) -> AppResult<OrderDetails> {
        let shipping_address = request.shipping_address.trim().to_string();
        if shipping_address.is_empty() {
            return Err(AppError::missing_field("shipping_address"));
        }

        let mut tx = self.repo.begin().await?;

        let cart = tx.cart_items(identity.user_id).await?;
        let selected = match &request.cart_item_ids {
            None => cart,
            Some(ids) => {
                let wanted: BTreeSet<i64> = ids.iter().copied().collect();
                let selected: Vec<_> = cart
                    .into_iter()
                    .filter(|item| wanted.contains(&item.id))
                    .collect();
                if selected.len() != wanted.len() {
                    return Err(AppError::validation(
                        "cart_item_ids",
                        "every selected item must belong to the caller's cart",
                    ));
                }
                selected
            }
        };
        if selected.is_empty() {
            return Err(DomainError::EmptyCart.into());
        }

        // Duplicate lines for one product share its stock, so sum per product
        let mut requested: BTreeMap<i64, i32> = BTreeMap::new();
        for item in &selected {
            if item.quantity <= 0 {
                return Err(AppError::validation(
                    "quantity",
                    format!("cart item {} has a non-positive quantity", item.id),
                ));
            }
            let quantity = requested.entry(item.product_id).or_insert(0);
            *quantity = quantity
                .checked_add(item.quantity)
                .ok_or_else(|| AppError::validation("quantity", "item count overflows"))?;
        }

        // Validate every product before touching stock
        let mut prices: BTreeMap<i64, i64> = BTreeMap::new();
        for (&product_id, &quantity) in &requested {
            let product = tx.lock_product(product_id).await?.ok_or_else(|| {
                AppError::from(DomainError::ProductNotFound { product_id })
            })?;
            if product.stock < quantity {
                return Err(DomainError::InsufficientStock {
                    product_id,
                    available: product.stock,
                    requested: quantity,
                }
                .into());
            }
            prices.insert(product_id, product.price);
        }

        let mut lines = Vec::with_capacity(selected.len());
        let mut total_amount: i64 = 0;
        let mut total_items: i32 = 0;
        for item in &selected {
            let price = prices.get(&item.product_id).copied().ok_or_else(|| {
                AppError::from(DomainError::ProductNotFound {
                    product_id: item.product_id,
                })
            })?;
            total_amount = price
                .checked_mul(i64::from(item.quantity))
                .and_then(|line| total_amount.checked_add(line))
                .ok_or_else(|| AppError::validation("quantity", "order total overflows"))?;
            total_items = total_items
                .checked_add(item.quantity)
                .ok_or_else(|| AppError::validation("quantity", "item count overflows"))?;
            lines.push((item.product_id, item.quantity, price));
        }

        let order = tx
            .insert_order(NewOrder {
                user_id: identity.user_id,
                shipping_address,
                method_payment: request.method_payment,
                total_amount,
                total_items,
            })
            .await?;
        let payment = self
            .ledger
            .create_pending_in(tx.as_mut(), &order, None)
            .await?;

        for (&product_id, &quantity) in &requested {
            tx.adjust_stock(product_id, -quantity).await?;
        }

        let mut items = Vec::with_capacity(lines.len());
        for (product_id, quantity, price) in lines {
            items.push(
                tx.insert_order_item(NewOrderItem {
                    order_id: order.id,
                    product_id,
                    quantity,
                    price,
                })
                .await?,
            );
        }

        let consumed: Vec<i64> = selected.iter().map(|item| item.id).collect();
        tx.delete_cart_items(&consumed).await?;
        let remaining_total = tx.refresh_cart_total(identity.user_id).await?;

        tx.commit().await?;

        info!(
            order_id = order.id,
            user_id = identity.user_id,
            total_amount = order.total_amount,
            items = items.len(),
            remaining_cart_total = remaining_total,
            "order created"
        );

        Ok(OrderDetails {
            order,
            items,
            payment: Some(payment),
        })
    }

    pub async fn get_order(&self, identity: &Identity, order_id: i64) -> AppResult<OrderDetails> {
        let order = self
            .repo
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::from(DomainError::OrderNotFound { order_id }))?;
        identity.require_owner_or_admin(order.user_id)?;

        let items = self.repo.order_items(order_id).await?;
        let payment = self.repo.find_payment_by_order(order_id).await?;
        Ok(OrderDetails {
            order,
            items,
            payment,
        })
    }

    /// Administrative status change. Moving to CANCELLED performs the full
    /// cancellation (restock and refund).
    pub async fn update_status(
        &self,
        identity: &Identity,
        order_id: i64,
        target: OrderStatus,
    ) -> AppResult<Order> {
        identity.require_admin()?;

        let mut tx = self.repo.begin().await?;
        let mut order = lock_order(tx.as_mut(), order_id).await?;

        if target == OrderStatus::Cancelled {
            self.cancel_in(tx.as_mut(), &mut order).await?;
        } else {
            ensure_transition(&order, target)?;
            let from = order.status;
            order.status = target;
            order = tx.save_order(&order).await?;
            info!(order_id, from = %from, to = %target, "order status updated");
        }

        tx.commit().await?;
        Ok(order)
    }

    /// Owner cancellation of a PENDING order.
    pub async fn cancel_order(&self, identity: &Identity, order_id: i64) -> AppResult<Order> {
        let mut tx = self.repo.begin().await?;
        let mut order = lock_order(tx.as_mut(), order_id).await?;

        if order.user_id != identity.user_id {
            return Err(DomainError::Forbidden {
                reason: "only the customer who placed the order may cancel it".to_string(),
            }
            .into());
        }

        self.cancel_in(tx.as_mut(), &mut order).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn cancel_in(
        &self,
        tx: &mut dyn RepositoryTransaction,
        order: &mut Order,
    ) -> AppResult<()> {
        ensure_transition(order, OrderStatus::Cancelled)?;

        let items = tx.order_items(order.id).await?;
        for item in &items {
            tx.adjust_stock(item.product_id, item.quantity).await?;
        }

        if order.payment_status == PaymentStatus::Paid {
            self.ledger.refund_in(tx, order).await?;
        }

        order.status = OrderStatus::Cancelled;
        *order = tx.save_order(order).await?;

        info!(
            order_id = order.id,
            restocked_items = items.len(),
            payment_status = %order.payment_status,
            "order cancelled"
        );
        Ok(())
    }
}

fn ensure_transition(order: &Order, target: OrderStatus) -> AppResult<()> {
    if order.status.can_transition_to(target) {
        Ok(())
    } else {
        warn!(
            order_id = order.id,
            from = %order.status,
            to = %target,
            "rejected order status transition"
        );
        Err(DomainError::InvalidTransition {
            from: order.status,
            to: target,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryRepository;
    use crate::error::ErrorCode;

    struct Fixture {
        repo: MemoryRepository,
        orders: OrderService,
        ledger: PaymentLedger,
    }

    fn fixture() -> Fixture {
        let repo = MemoryRepository::new();
        let shared: Arc<dyn Repository> = Arc::new(repo.clone());
        let ledger = PaymentLedger::new(shared.clone());
        let orders = OrderService::new(shared, ledger.clone());
        Fixture {
            repo,
            orders,
            ledger,
        }
    }

    fn checkout(method: PaymentMethod) -> CreateOrderRequest {
        CreateOrderRequest {
            shipping_address: "12 Trang Tien, Ha Noi".to_string(),
            method_payment: method,
            cart_item_ids: None,
        }
    }

    #[tokio::test]
    async fn checkout_decrements_stock_and_creates_pending_payment() {
        let f = fixture();
        let book = f.repo.insert_product("Dune", 120000, 5).await;
        f.repo.add_cart_item(1, book.id, 2).await;

        let details = f
            .orders
            .create_order(&Identity::user(1), checkout(PaymentMethod::Cod))
            .await
            .unwrap();

        assert_eq!(details.order.total_amount, 240000);
        assert_eq!(details.order.total_items, 2);
        assert_eq!(details.order.status, OrderStatus::Pending);
        assert_eq!(details.items.len(), 1);
        let payment = details.payment.unwrap();
        assert_eq!(payment.payment_status, PaymentStatus::Pending);
        assert_eq!(payment.amount, 240000);

        let stock = f.repo.find_product(book.id).await.unwrap().unwrap().stock;
        assert_eq!(stock, 3);
        assert!(f.repo.remaining_cart_items(1).await.is_empty());
        assert_eq!(f.repo.cart_total(1).await, 0);
    }

    #[tokio::test]
    async fn insufficient_stock_leaves_everything_untouched() {
        let f = fixture();
        let book = f.repo.insert_product("Dune", 120000, 1).await;
        f.repo.add_cart_item(1, book.id, 2).await;

        let err = f
            .orders
            .create_order(&Identity::user(1), checkout(PaymentMethod::Cod))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InsufficientStock);
        assert_eq!(f.repo.find_product(book.id).await.unwrap().unwrap().stock, 1);
        assert_eq!(f.repo.remaining_cart_items(1).await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_lines_for_one_product_share_its_stock() {
        let f = fixture();
        let book = f.repo.insert_product("Dune", 120000, 3).await;
        f.repo.add_cart_item(1, book.id, 2).await;
        f.repo.add_cart_item(1, book.id, 2).await;

        let err = f
            .orders
            .create_order(&Identity::user(1), checkout(PaymentMethod::Cod))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InsufficientStock);
        assert_eq!(err.status_code(), 422);
        assert_eq!(f.repo.find_product(book.id).await.unwrap().unwrap().stock, 3);
        assert_eq!(f.repo.remaining_cart_items(1).await.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_lines_within_stock_are_taken_together() {
        let f = fixture();
        let book = f.repo.insert_product("Dune Messiah", 110000, 4).await;
        f.repo.add_cart_item(1, book.id, 1).await;
        f.repo.add_cart_item(1, book.id, 3).await;

        let details = f
            .orders
            .create_order(&Identity::user(1), checkout(PaymentMethod::Cod))
            .await
            .unwrap();
        assert_eq!(details.items.len(), 2);
        assert_eq!(details.order.total_items, 4);
        assert_eq!(details.order.total_amount, 440000);
        assert_eq!(f.repo.find_product(book.id).await.unwrap().unwrap().stock, 0);
    }

    #[tokio::test]
    async fn blank_shipping_address_is_a_missing_field() {
        let f = fixture();
        let book = f.repo.insert_product("Dune", 120000, 5).await;
        f.repo.add_cart_item(1, book.id, 1).await;

        let mut request = checkout(PaymentMethod::Cod);
        request.shipping_address = "   ".to_string();
        let err = f
            .orders
            .create_order(&Identity::user(1), request)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ValidationError);
        assert_eq!(err.status_code(), 400);
        assert!(err.user_message().contains("shipping_address"));
        assert_eq!(f.repo.remaining_cart_items(1).await.len(), 1);
    }

    #[tokio::test]
    async fn empty_cart_is_rejected() {
        let f = fixture();
        let err = f
            .orders
            .create_order(&Identity::user(1), checkout(PaymentMethod::Cod))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::EmptyCart);
    }

    #[tokio::test]
    async fn stepwise_progression_succeeds_and_skips_fail() {
        let f = fixture();
        let book = f.repo.insert_product("Dune", 120000, 5).await;
        f.repo.add_cart_item(1, book.id, 1).await;
        let order = f
            .orders
            .create_order(&Identity::user(1), checkout(PaymentMethod::Cod))
            .await
            .unwrap()
            .order;
        let admin = Identity::admin(99);

        let err = f
            .orders
            .update_status(&admin, order.id, OrderStatus::Processing)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InvalidTransition);
        assert!(err.user_message().contains("PENDING"));
        assert!(err.user_message().contains("PROCESSING"));

        for target in [
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipping,
            OrderStatus::Delivered,
        ] {
            let updated = f
                .orders
                .update_status(&admin, order.id, target)
                .await
                .unwrap();
            assert_eq!(updated.status, target);
        }
    }

    #[tokio::test]
    async fn non_admin_cannot_update_status() {
        let f = fixture();
        let err = f
            .orders
            .update_status(&Identity::user(1), 1, OrderStatus::Confirmed)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn cancel_restores_stock_and_refunds_paid_order() {
        let f = fixture();
        let dune = f.repo.insert_product("Dune", 120000, 5).await;
        let emma = f.repo.insert_product("Emma", 90000, 4).await;
        f.repo.add_cart_item(1, dune.id, 2).await;
        f.repo.add_cart_item(1, emma.id, 3).await;
        let order = f
            .orders
            .create_order(&Identity::user(1), checkout(PaymentMethod::Banking))
            .await
            .unwrap()
            .order;
        f.ledger
            .confirm_online(order.id, Some("FT1".to_string()), None)
            .await
            .unwrap();

        let cancelled = f
            .orders
            .cancel_order(&Identity::user(1), order.id)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);

        assert_eq!(f.repo.find_product(dune.id).await.unwrap().unwrap().stock, 5);
        assert_eq!(f.repo.find_product(emma.id).await.unwrap().unwrap().stock, 4);
        let payment = f.repo.find_payment_by_order(order.id).await.unwrap().unwrap();
        assert_eq!(payment.payment_status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn only_owner_may_cancel_and_only_from_pending() {
        let f = fixture();
        let book = f.repo.insert_product("Dune", 120000, 5).await;
        f.repo.add_cart_item(1, book.id, 1).await;
        let order = f
            .orders
            .create_order(&Identity::user(1), checkout(PaymentMethod::Cod))
            .await
            .unwrap()
            .order;

        let err = f
            .orders
            .cancel_order(&Identity::user(2), order.id)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::Forbidden);

        f.orders
            .update_status(&Identity::admin(99), order.id, OrderStatus::Confirmed)
            .await
            .unwrap();
        let err = f
            .orders
            .cancel_order(&Identity::user(1), order.id)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InvalidTransition);
        assert_eq!(f.repo.find_product(book.id).await.unwrap().unwrap().stock, 4);
    }
}
