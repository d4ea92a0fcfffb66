//! Starts an online payment for an existing order.
//!
//! The PENDING payment row is written and committed before the gateway is
//! contacted, so a timeout never leaves anything beyond PENDING behind and
//! the whole call can be retried with a fresh reference.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::Identity;
use crate::database::entities::{OrderStatus, PaymentStatus};
use crate::database::repository::Repository;
use crate::error::{AppError, AppResult, DomainError};
use crate::payments::factory::GatewayRegistry;
use crate::payments::reference::TransactionReference;
use crate::payments::types::{GatewayName, GatewayPaymentRequest, GatewayPaymentResponse};
use crate::services::payment_ledger::{lock_order, PaymentLedger};

/// Optional caller overrides for the gateway defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentOverrides {
    pub order_info: Option<String>,
    pub return_url: Option<String>,
    pub notify_url: Option<String>,
    #[serde(skip)]
    pub client_ip: Option<String>,
}

#[derive(Clone)]
pub struct PaymentInitiationService {
    repo: Arc<dyn Repository>,
    ledger: PaymentLedger,
    gateways: GatewayRegistry,
}

impl PaymentInitiationService {
    pub fn new(repo: Arc<dyn Repository>, ledger: PaymentLedger, gateways: GatewayRegistry) -> Self {
        Self {
            repo,
            ledger,
            gateways,
        }
    }

    pub async fn create_payment(
        &self,
        identity: &Identity,
        gateway_name: GatewayName,
        order_id: i64,
        overrides: PaymentOverrides,
    ) -> AppResult<GatewayPaymentResponse> {
        let gateway = self.gateways.get(gateway_name)?;
        let reference = TransactionReference::generate(order_id);
        let method = gateway.payment_method();

        let mut tx = self.repo.begin().await?;
        let mut order = lock_order(tx.as_mut(), order_id).await?;
        identity.require_owner_or_admin(order.user_id)?;

        if order.status == OrderStatus::Cancelled {
            return Err(DomainError::InvalidPaymentState {
                order_id,
                status: order.payment_status,
                reason: "order is cancelled".to_string(),
            }
            .into());
        }
        match order.payment_status {
            PaymentStatus::Paid => return Err(DomainError::AlreadyPaid { order_id }.into()),
            PaymentStatus::Refunded => {
                return Err(DomainError::InvalidPaymentState {
                    order_id,
                    status: PaymentStatus::Refunded,
                    reason: "refunded orders cannot be paid again".to_string(),
                }
                .into())
            }
            PaymentStatus::Pending | PaymentStatus::Failed => {}
        }

        // A FAILED payment stays FAILED until a successful callback settles it
        let note = format!("awaiting {} payment, reference {}", gateway_name, reference);
        order.method_payment = method;
        order = tx.save_order(&order).await?;

        match tx.find_payment_by_order(order_id).await? {
            Some(mut payment) => {
                payment.payment_method = method;
                payment.amount = order.total_amount;
                payment.transaction_id = None;
                payment.transaction_time = None;
                payment.payment_info = Some(match payment.payment_info.take() {
                    Some(previous) if !previous.is_empty() => format!("{}; {}", previous, note),
                    _ => note,
                });
                tx.save_payment(&payment).await?;
            }
            None => {
                self.ledger
                    .create_pending_in(tx.as_mut(), &order, Some(note))
                    .await?;
            }
        }
        tx.commit().await?;

        let request = GatewayPaymentRequest {
            order_id,
            amount: order.total_amount,
            transaction_reference: reference.to_string(),
            order_info: overrides.order_info,
            return_url: overrides.return_url,
            notify_url: overrides.notify_url,
            client_ip: overrides.client_ip,
        };

        match gateway.create_payment(request).await {
            Ok(response) => {
                info!(
                    order_id,
                    gateway = %gateway_name,
                    transaction_reference = %response.transaction_reference,
                    "payment initiated"
                );
                Ok(response)
            }
            Err(e) => {
                warn!(
                    order_id,
                    gateway = %gateway_name,
                    error = %e,
                    "payment initiation failed, payment left PENDING"
                );
                Err(AppError::from(e))
            }
        }
    }
}
