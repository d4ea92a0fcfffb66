//! Payment row state transitions.
//!
//! Every operation updates `payments.payment_status` and
//! `orders.payment_status` together inside one transaction, so the two never
//! diverge. The `*_in` variants run inside a caller's transaction; the plain
//! variants open and commit their own.
//!
//! ```text
//! PENDING --confirm--> PAID --refund--> REFUNDED
//!    |  ^
//!  fail |
//!    v  |  (gateway retry)
//!   FAILED
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::database::entities::{
    NewPayment, Order, OrderStatus, Payment, PaymentMethod, PaymentStatus,
};
use crate::database::repository::{Repository, RepositoryTransaction};
use crate::error::{AppError, AppResult, DomainError};

/// Order and payment as they stand after a ledger operation
#[derive(Debug, Clone, Serialize)]
pub struct PaymentRecord {
    pub order: Order,
    pub payment: Payment,
}

/// Details of a successful online settlement
#[derive(Debug, Clone)]
pub struct OnlineConfirmation {
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub transaction_time: DateTime<Utc>,
    pub info: Option<String>,
}

#[derive(Clone)]
pub struct PaymentLedger {
    repo: Arc<dyn Repository>,
}

impl PaymentLedger {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub async fn create_pending(&self, order_id: i64) -> AppResult<PaymentRecord> {
        let mut tx = self.repo.begin().await?;
        let order = lock_order(tx.as_mut(), order_id).await?;
        let payment = self.create_pending_in(tx.as_mut(), &order, None).await?;
        tx.commit().await?;
        Ok(PaymentRecord { order, payment })
    }

    /// Manual reconciliation of an online or bank-transfer payment.
    pub async fn confirm_online(
        &self,
        order_id: i64,
        transaction_id: Option<String>,
        info: Option<String>,
    ) -> AppResult<PaymentRecord> {
        let mut tx = self.repo.begin().await?;
        let mut order = lock_order(tx.as_mut(), order_id).await?;
        let confirmation = OnlineConfirmation {
            method: order.method_payment,
            transaction_id,
            transaction_time: Utc::now(),
            info,
        };
        let payment = self
            .confirm_online_in(tx.as_mut(), &mut order, confirmation)
            .await?;
        tx.commit().await?;
        Ok(PaymentRecord { order, payment })
    }

    pub async fn confirm_cod(&self, order_id: i64) -> AppResult<PaymentRecord> {
        let mut tx = self.repo.begin().await?;
        let mut order = lock_order(tx.as_mut(), order_id).await?;
        let payment = self.confirm_cod_in(tx.as_mut(), &mut order).await?;
        tx.commit().await?;
        Ok(PaymentRecord { order, payment })
    }

    pub async fn refund(&self, order_id: i64) -> AppResult<PaymentRecord> {
        let mut tx = self.repo.begin().await?;
        let mut order = lock_order(tx.as_mut(), order_id).await?;
        let payment = self.refund_in(tx.as_mut(), &mut order).await?;
        tx.commit().await?;
        Ok(PaymentRecord { order, payment })
    }

    pub async fn fail(&self, order_id: i64, reason: &str) -> AppResult<PaymentRecord> {
        let mut tx = self.repo.begin().await?;
        let mut order = lock_order(tx.as_mut(), order_id).await?;
        let payment = self.fail_in(tx.as_mut(), &mut order, reason).await?;
        tx.commit().await?;
        Ok(PaymentRecord { order, payment })
    }

    pub async fn create_pending_in(
        &self,
        tx: &mut dyn RepositoryTransaction,
        order: &Order,
        info: Option<String>,
    ) -> AppResult<Payment> {
        let payment = tx
            .insert_payment(NewPayment {
                order_id: order.id,
                payment_method: order.method_payment,
                amount: order.total_amount,
                payment_info: info,
            })
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    AppError::from(DomainError::DuplicatePayment { order_id: order.id })
                } else {
                    AppError::from(e)
                }
            })?;

        info!(
            order_id = order.id,
            payment_id = payment.id,
            method = %payment.payment_method,
            amount = payment.amount,
            "pending payment recorded"
        );
        Ok(payment)
    }

    pub async fn confirm_online_in(
        &self,
        tx: &mut dyn RepositoryTransaction,
        order: &mut Order,
        confirmation: OnlineConfirmation,
    ) -> AppResult<Payment> {
        ensure_not_cancelled(order)?;
        ensure_unsettled(order)?;

        order.method_payment = confirmation.method;
        let mut payment = self.payment_for_update(tx, order).await?;
        payment.payment_method = confirmation.method;
        payment.amount = order.total_amount;
        payment.transaction_id = confirmation.transaction_id;
        payment.transaction_time = Some(confirmation.transaction_time);
        payment.payment_info = confirmation.info;

        sync_status(tx, order, &mut payment, PaymentStatus::Paid).await?;
        info!(
            order_id = order.id,
            method = %payment.payment_method,
            transaction_id = ?payment.transaction_id,
            "payment confirmed"
        );
        Ok(payment)
    }

    pub async fn confirm_cod_in(
        &self,
        tx: &mut dyn RepositoryTransaction,
        order: &mut Order,
    ) -> AppResult<Payment> {
        if order.method_payment != PaymentMethod::Cod {
            return Err(DomainError::WrongPaymentMethod {
                order_id: order.id,
                expected: PaymentMethod::Cod,
                actual: order.method_payment,
            }
            .into());
        }
        ensure_not_cancelled(order)?;
        ensure_unsettled(order)?;

        let mut payment = self.payment_for_update(tx, order).await?;
        payment.payment_method = PaymentMethod::Cod;
        payment.amount = order.total_amount;
        payment.transaction_time = Some(Utc::now());
        payment.payment_info = Some("Cash collected on delivery".to_string());

        sync_status(tx, order, &mut payment, PaymentStatus::Paid).await?;
        info!(order_id = order.id, "cash on delivery payment confirmed");
        Ok(payment)
    }

    pub async fn refund_in(
        &self,
        tx: &mut dyn RepositoryTransaction,
        order: &mut Order,
    ) -> AppResult<Payment> {
        let mut payment = payment_of(tx, order.id).await?;
        if payment.payment_status != PaymentStatus::Paid
            || order.payment_status != PaymentStatus::Paid
        {
            return Err(DomainError::InvalidPaymentState {
                order_id: order.id,
                status: payment.payment_status,
                reason: "can only refund paid payments".to_string(),
            }
            .into());
        }

        payment.payment_info = Some(match payment.payment_info.take() {
            Some(previous) if !previous.is_empty() => format!("{}; refunded", previous),
            _ => "refunded".to_string(),
        });

        sync_status(tx, order, &mut payment, PaymentStatus::Refunded).await?;
        info!(order_id = order.id, amount = payment.amount, "payment refunded");
        Ok(payment)
    }

    /// Records a failed attempt. The order stays payable; a later successful
    /// attempt may still move it to PAID.
    pub async fn fail_in(
        &self,
        tx: &mut dyn RepositoryTransaction,
        order: &mut Order,
        reason: &str,
    ) -> AppResult<Payment> {
        if order.payment_status.is_settled() {
            return Err(DomainError::InvalidPaymentState {
                order_id: order.id,
                status: order.payment_status,
                reason: "settled payments cannot be marked failed".to_string(),
            }
            .into());
        }

        let mut payment = self.payment_for_update(tx, order).await?;
        payment.payment_info = Some(reason.to_string());

        sync_status(tx, order, &mut payment, PaymentStatus::Failed).await?;
        info!(order_id = order.id, reason, "payment failed");
        Ok(payment)
    }

    /// The order's payment row, created on the spot if checkout never made one.
    async fn payment_for_update(
        &self,
        tx: &mut dyn RepositoryTransaction,
        order: &Order,
    ) -> AppResult<Payment> {
        match tx.find_payment_by_order(order.id).await? {
            Some(payment) => Ok(payment),
            None => self.create_pending_in(tx, order, None).await,
        }
    }
}

pub(crate) async fn lock_order(
    tx: &mut dyn RepositoryTransaction,
    order_id: i64,
) -> AppResult<Order> {
    tx.lock_order(order_id)
        .await?
        .ok_or_else(|| DomainError::OrderNotFound { order_id }.into())
}

async fn payment_of(tx: &mut dyn RepositoryTransaction, order_id: i64) -> AppResult<Payment> {
    tx.find_payment_by_order(order_id)
        .await?
        .ok_or_else(|| DomainError::PaymentNotFound { order_id }.into())
}

fn ensure_not_cancelled(order: &Order) -> AppResult<()> {
    if order.status == OrderStatus::Cancelled {
        return Err(DomainError::InvalidPaymentState {
            order_id: order.id,
            status: order.payment_status,
            reason: "order is cancelled".to_string(),
        }
        .into());
    }
    Ok(())
}

fn ensure_unsettled(order: &Order) -> AppResult<()> {
    match order.payment_status {
        PaymentStatus::Paid => Err(DomainError::AlreadyPaid { order_id: order.id }.into()),
        PaymentStatus::Refunded => Err(DomainError::InvalidPaymentState {
            order_id: order.id,
            status: PaymentStatus::Refunded,
            reason: "refunded payments cannot be confirmed again".to_string(),
        }
        .into()),
        PaymentStatus::Pending | PaymentStatus::Failed => Ok(()),
    }
}

async fn sync_status(
    tx: &mut dyn RepositoryTransaction,
    order: &mut Order,
    payment: &mut Payment,
    status: PaymentStatus,
) -> AppResult<()> {
    payment.payment_status = status;
    order.payment_status = status;
    *payment = tx.save_payment(payment).await?;
    *order = tx.save_order(order).await?;
    Ok(())
}
