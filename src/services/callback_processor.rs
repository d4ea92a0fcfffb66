//! Applies verified gateway callbacks to orders and payments.
//!
//! Providers deliver at least once and may race each other (redirect and IPN
//! for the same payment). Resolution, the idempotency check, the amount check
//! and the write all happen under the order's row lock in one transaction, so
//! a second delivery always observes the first one's result.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::entities::{OrderStatus, PaymentStatus};
use crate::database::repository::Repository;
use crate::error::{AppError, AppResult, DomainError};
use crate::payments::factory::GatewayRegistry;
use crate::payments::reference::TransactionReference;
use crate::payments::types::{CallbackParams, CallbackResult, GatewayName};
use crate::services::payment_ledger::{lock_order, OnlineConfirmation, PaymentLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackStatus {
    AppliedPaid,
    AppliedFailed,
    AlreadyConfirmed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallbackOutcome {
    pub status: CallbackStatus,
    pub order_id: i64,
    pub payment_status: PaymentStatus,
    pub message: String,
}

#[derive(Clone)]
pub struct CallbackProcessor {
    repo: Arc<dyn Repository>,
    ledger: PaymentLedger,
    gateways: GatewayRegistry,
}

impl CallbackProcessor {
    pub fn new(repo: Arc<dyn Repository>, ledger: PaymentLedger, gateways: GatewayRegistry) -> Self {
        Self {
            repo,
            ledger,
            gateways,
        }
    }

    pub async fn process(
        &self,
        gateway_name: GatewayName,
        params: &CallbackParams,
    ) -> AppResult<CallbackOutcome> {
        let gateway = self.gateways.get(gateway_name)?;

        if let Err(e) = gateway.verify_callback(params) {
            warn!(gateway = %gateway_name, error = %e, "callback rejected");
            return Err(e.into());
        }

        let event = gateway.parse_callback(params).map_err(|e| {
            warn!(gateway = %gateway_name, error = %e, "malformed callback");
            AppError::from(e)
        })?;

        let reference = TransactionReference::parse(&event.transaction_reference).ok_or_else(|| {
            warn!(
                gateway = %gateway_name,
                transaction_reference = %event.transaction_reference,
                "callback reference does not name an order"
            );
            AppError::validation("transaction_reference", "malformed transaction reference")
        })?;
        let order_id = reference.order_id;

        let mut tx = self.repo.begin().await?;
        let mut order = lock_order(tx.as_mut(), order_id).await.map_err(|e| {
            warn!(gateway = %gateway_name, order_id, error = %e, "callback order not resolved");
            e
        })?;

        if order.payment_status.is_settled() {
            tx.rollback().await?;
            info!(
                gateway = %gateway_name,
                order_id,
                payment_status = %order.payment_status,
                "duplicate callback ignored"
            );
            return Ok(CallbackOutcome {
                status: CallbackStatus::AlreadyConfirmed,
                order_id,
                payment_status: order.payment_status,
                message: format!("Order #{} already confirmed", order_id),
            });
        }

        if order.status == OrderStatus::Cancelled {
            warn!(
                gateway = %gateway_name,
                order_id,
                success = event.is_success(),
                "callback for cancelled order needs manual reconciliation"
            );
            return Err(DomainError::InvalidPaymentState {
                order_id,
                status: order.payment_status,
                reason: "order is cancelled".to_string(),
            }
            .into());
        }

        if !event.matches_amount(order.total_amount) {
            warn!(
                gateway = %gateway_name,
                order_id,
                expected = order.total_amount,
                received = event.amount(),
                "callback amount mismatch"
            );
            return Err(AppError::from(DomainError::AmountMismatch {
                order_id,
                expected: order.total_amount,
                received: event.amount(),
            })
            .with_context(format!(
                "transaction reference {}",
                event.transaction_reference
            )));
        }

        let outcome = match &event.result {
            CallbackResult::Success => {
                let confirmation = OnlineConfirmation {
                    method: gateway.payment_method(),
                    transaction_id: event.transaction_id.clone(),
                    transaction_time: event.transaction_time.unwrap_or_else(Utc::now),
                    info: Some(event.info.clone()),
                };
                self.ledger
                    .confirm_online_in(tx.as_mut(), &mut order, confirmation)
                    .await?;
                CallbackOutcome {
                    status: CallbackStatus::AppliedPaid,
                    order_id,
                    payment_status: PaymentStatus::Paid,
                    message: format!("Order #{} paid", order_id),
                }
            }
            CallbackResult::Failure { code, message } => {
                self.ledger
                    .fail_in(tx.as_mut(), &mut order, &event.info)
                    .await?;
                CallbackOutcome {
                    status: CallbackStatus::AppliedFailed,
                    order_id,
                    payment_status: PaymentStatus::Failed,
                    message: format!("Payment for order #{} failed ({}): {}", order_id, code, message),
                }
            }
        };

        tx.commit().await?;
        info!(
            gateway = %gateway_name,
            order_id,
            transaction_reference = %event.transaction_reference,
            status = ?outcome.status,
            "callback applied"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::entities::{NewOrder, PaymentMethod};
    use crate::database::memory::MemoryRepository;
    use crate::error::ErrorCode;
    use crate::payments::providers::{VnpayConfig, VnpayGateway};
    use crate::payments::signature::encode_component;

    const SECRET: &str = "VNPAYTESTSECRET";

    fn gateway() -> VnpayGateway {
        VnpayGateway::new(VnpayConfig {
            tmn_code: "BOOKS001".to_string(),
            hash_secret: SECRET.to_string(),
            pay_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
            return_url: String::new(),
            version: "2.1.0".to_string(),
            order_type: "other".to_string(),
            locale: "vn".to_string(),
            expire_minutes: 15,
        })
    }

    fn processor(repo: &MemoryRepository) -> CallbackProcessor {
        let shared: Arc<dyn Repository> = Arc::new(repo.clone());
        CallbackProcessor::new(
            shared.clone(),
            PaymentLedger::new(shared),
            GatewayRegistry::with_gateways(vec![Arc::new(gateway())]),
        )
    }

    async fn seed_order(repo: &MemoryRepository, total_amount: i64) -> i64 {
        let shared: Arc<dyn Repository> = Arc::new(repo.clone());
        let mut tx = repo.begin().await.unwrap();
        let order = tx
            .insert_order(NewOrder {
                user_id: 1,
                shipping_address: "1 Hang Bai, Ha Noi".to_string(),
                method_payment: PaymentMethod::Vnpay,
                total_amount,
                total_items: 1,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        PaymentLedger::new(shared).create_pending(order.id).await.unwrap();
        order.id
    }

    fn callback(order_id: i64, amount: i64, response_code: &str) -> CallbackParams {
        let reference = format!("ORDER{}_1700000000000", order_id);
        let amount = amount.to_string();
        let pairs = [
            ("vnp_Amount", amount.as_str()),
            ("vnp_BankCode", "NCB"),
            ("vnp_OrderInfo", "Thanh toan don hang"),
            ("vnp_PayDate", "20231115093005"),
            ("vnp_ResponseCode", response_code),
            ("vnp_TmnCode", "BOOKS001"),
            ("vnp_TransactionNo", "14226112"),
            ("vnp_TxnRef", reference.as_str()),
        ];
        let decoded = CallbackParams {
            raw_query: None,
            params: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        let hash = gateway().sign_callback(&decoded);
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, encode_component(v)))
            .collect::<Vec<_>>()
            .join("&");
        CallbackParams::from_raw_query(&format!("{}&vnp_SecureHash={}", query, hash))
    }

    #[tokio::test]
    async fn success_then_duplicate_is_already_confirmed() {
        let repo = MemoryRepository::new();
        let processor = processor(&repo);
        let order_id = seed_order(&repo, 150000).await;

        let first = processor
            .process(GatewayName::Vnpay, &callback(order_id, 15000000, "00"))
            .await
            .unwrap();
        assert_eq!(first.status, CallbackStatus::AppliedPaid);
        let paid = repo.find_payment_by_order(order_id).await.unwrap().unwrap();
        assert_eq!(paid.transaction_id.as_deref(), Some("14226112"));

        let second = processor
            .process(GatewayName::Vnpay, &callback(order_id, 15000000, "00"))
            .await
            .unwrap();
        assert_eq!(second.status, CallbackStatus::AlreadyConfirmed);
        let after = repo.find_payment_by_order(order_id).await.unwrap().unwrap();
        assert_eq!(after.transaction_time, paid.transaction_time);
        assert_eq!(after.updated_at, paid.updated_at);
    }

    #[tokio::test]
    async fn failure_code_marks_failed() {
        let repo = MemoryRepository::new();
        let processor = processor(&repo);
        let order_id = seed_order(&repo, 80000).await;

        let outcome = processor
            .process(GatewayName::Vnpay, &callback(order_id, 8000000, "07"))
            .await
            .unwrap();
        assert_eq!(outcome.status, CallbackStatus::AppliedFailed);

        let order = repo.find_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Failed);
        let payment = repo.find_payment_by_order(order_id).await.unwrap().unwrap();
        assert!(payment.payment_info.unwrap().contains("07"));
    }

    #[tokio::test]
    async fn amount_mismatch_leaves_state_unchanged() {
        let repo = MemoryRepository::new();
        let processor = processor(&repo);
        let order_id = seed_order(&repo, 150000).await;

        for amount in [14999900, 15000100, 15000001] {
            let err = processor
                .process(GatewayName::Vnpay, &callback(order_id, amount, "00"))
                .await
                .unwrap_err();
            assert_eq!(err.error_code(), ErrorCode::AmountMismatch);
            let context = err.context.unwrap_or_default();
            assert!(context.contains(&format!("ORDER{}_", order_id)));
        }
        let order = repo.find_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn tampered_hash_is_rejected_without_mutation() {
        let repo = MemoryRepository::new();
        let processor = processor(&repo);
        let order_id = seed_order(&repo, 150000).await;

        let mut params = callback(order_id, 15000000, "00");
        let hash = params.params.get("vnp_SecureHash").cloned().unwrap();
        let flipped: String = hash
            .chars()
            .enumerate()
            .map(|(i, c)| if i == 0 { if c == 'a' { 'b' } else { 'a' } } else { c })
            .collect();
        params.raw_query = params
            .raw_query
            .map(|raw| raw.replace(&hash, &flipped));
        params.params.insert("vnp_SecureHash".to_string(), flipped);

        let err = processor
            .process(GatewayName::Vnpay, &params)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::SignatureInvalid);
        let order = repo.find_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let repo = MemoryRepository::new();
        let processor = processor(&repo);
        let err = processor
            .process(GatewayName::Vnpay, &callback(777, 15000000, "00"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::OrderNotFound);
    }
}
