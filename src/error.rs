//! Unified error handling for the bookstore backend
//!
//! Every service operation returns [`AppResult`]. Errors carry a stable
//! machine-readable [`ErrorCode`], an HTTP status and a user-facing message.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::database::entities::{OrderStatus, PaymentMethod, PaymentStatus};

/// Error codes for programmatic handling by clients and payment providers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Not found (404)
    OrderNotFound,
    PaymentNotFound,
    ProductNotFound,

    // Conflict (409)
    AlreadyPaid,
    WrongPaymentMethod,
    DuplicatePayment,

    // Invalid state (422)
    InvalidTransition,
    InvalidPaymentState,
    AmountMismatch,
    InsufficientStock,

    // Callback / gateway errors
    SignatureInvalid,
    GatewayRejected,
    GatewayUnavailable,

    // Access
    Unauthorized,
    Forbidden,

    // Infrastructure (5xx)
    DatabaseError,
    ConfigurationError,

    // Generic
    EmptyCart,
    ValidationError,
    InternalError,
}

/// Business rule violations raised by the order and payment services
#[derive(Debug, Clone)]
pub enum DomainError {
    OrderNotFound {
        order_id: i64,
    },
    PaymentNotFound {
        order_id: i64,
    },
    ProductNotFound {
        product_id: i64,
    },
    AlreadyPaid {
        order_id: i64,
    },
    WrongPaymentMethod {
        order_id: i64,
        expected: PaymentMethod,
        actual: PaymentMethod,
    },
    /// A second payment row was about to be created for the same order
    DuplicatePayment {
        order_id: i64,
    },
    InvalidTransition {
        from: OrderStatus,
        to: OrderStatus,
    },
    InvalidPaymentState {
        order_id: i64,
        status: PaymentStatus,
        reason: String,
    },
    AmountMismatch {
        order_id: i64,
        expected: i64,
        received: i64,
    },
    InsufficientStock {
        product_id: i64,
        available: i32,
        requested: i32,
    },
    EmptyCart,
    Unauthenticated {
        reason: String,
    },
    Forbidden {
        reason: String,
    },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// Errors produced while talking to (or hearing from) payment gateways
#[derive(Debug, Clone)]
pub enum ExternalError {
    SignatureInvalid {
        gateway: String,
    },
    GatewayRejected {
        gateway: String,
        provider_code: String,
        message: String,
    },
    GatewayUnavailable {
        gateway: String,
        message: String,
        timed_out: bool,
    },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    MissingField { field: String },
    InvalidField { field: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }))
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::MissingField {
            field: field.into(),
        }))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: message.into(),
            },
        ))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => 404,
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::ProductNotFound { .. } => 404,
                DomainError::AlreadyPaid { .. } => 409,
                DomainError::WrongPaymentMethod { .. } => 409,
                DomainError::DuplicatePayment { .. } => 409,
                DomainError::InvalidTransition { .. } => 422,
                DomainError::InvalidPaymentState { .. } => 422,
                DomainError::AmountMismatch { .. } => 422,
                DomainError::InsufficientStock { .. } => 422,
                DomainError::EmptyCart => 400,
                DomainError::Unauthenticated { .. } => 401,
                DomainError::Forbidden { .. } => 403,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::SignatureInvalid { .. } => 401,
                ExternalError::GatewayRejected { .. } => 400,
                ExternalError::GatewayUnavailable { .. } => 502,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::ProductNotFound { .. } => ErrorCode::ProductNotFound,
                DomainError::AlreadyPaid { .. } => ErrorCode::AlreadyPaid,
                DomainError::WrongPaymentMethod { .. } => ErrorCode::WrongPaymentMethod,
                DomainError::DuplicatePayment { .. } => ErrorCode::DuplicatePayment,
                DomainError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
                DomainError::InvalidPaymentState { .. } => ErrorCode::InvalidPaymentState,
                DomainError::AmountMismatch { .. } => ErrorCode::AmountMismatch,
                DomainError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
                DomainError::EmptyCart => ErrorCode::EmptyCart,
                DomainError::Unauthenticated { .. } => ErrorCode::Unauthorized,
                DomainError::Forbidden { .. } => ErrorCode::Forbidden,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::SignatureInvalid { .. } => ErrorCode::SignatureInvalid,
                ExternalError::GatewayRejected { .. } => ErrorCode::GatewayRejected,
                ExternalError::GatewayUnavailable { .. } => ErrorCode::GatewayUnavailable,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { order_id } => {
                    format!("Order #{} not found", order_id)
                }
                DomainError::PaymentNotFound { order_id } => {
                    format!("No payment recorded for order #{}", order_id)
                }
                DomainError::ProductNotFound { product_id } => {
                    format!("Product #{} not found", product_id)
                }
                DomainError::AlreadyPaid { order_id } => {
                    format!("Order #{} has already been paid", order_id)
                }
                DomainError::WrongPaymentMethod {
                    order_id,
                    expected,
                    actual,
                } => format!(
                    "Order #{} uses payment method {}, expected {}",
                    order_id, actual, expected
                ),
                DomainError::DuplicatePayment { order_id } => {
                    format!("Order #{} already has a payment record", order_id)
                }
                DomainError::InvalidTransition { from, to } => {
                    format!("Cannot change order status from {} to {}", from, to)
                }
                DomainError::InvalidPaymentState {
                    order_id,
                    status,
                    reason,
                } => format!(
                    "Payment for order #{} is {}: {}",
                    order_id, status, reason
                ),
                DomainError::AmountMismatch {
                    order_id,
                    expected,
                    received,
                } => format!(
                    "Amount mismatch for order #{}: expected {}, received {}",
                    order_id, expected, received
                ),
                DomainError::InsufficientStock {
                    product_id,
                    available,
                    requested,
                } => format!(
                    "Insufficient stock for product #{}: available {}, requested {}",
                    product_id, available, requested
                ),
                DomainError::EmptyCart => "No cart items selected for checkout".to_string(),
                DomainError::Unauthenticated { reason } => {
                    format!("Authentication required: {}", reason)
                }
                DomainError::Forbidden { reason } => format!("Access denied: {}", reason),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::SignatureInvalid { gateway } => {
                    format!("Invalid {} callback signature", gateway)
                }
                ExternalError::GatewayRejected {
                    gateway,
                    provider_code,
                    message,
                } => format!(
                    "{} rejected the payment request ({}): {}",
                    gateway, provider_code, message
                ),
                ExternalError::GatewayUnavailable {
                    gateway, timed_out, ..
                } => {
                    if *timed_out {
                        format!("{} did not respond in time. Please try again", gateway)
                    } else {
                        format!("{} is temporarily unavailable. Please try again", gateway)
                    }
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid {}: {}", field, reason)
                }
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::SignatureInvalid { .. } => false,
                ExternalError::GatewayRejected { .. } => false,
                ExternalError::GatewayUnavailable { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        AppError::domain(err)
    }
}

// From<DatabaseError> lives in database/error.rs

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_mismatch_error() {
        let error = AppError::domain(DomainError::AmountMismatch {
            order_id: 42,
            expected: 150000,
            received: 150001,
        });

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::AmountMismatch);
        assert!(error.user_message().contains("expected 150000"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_invalid_transition_names_both_states() {
        let error = AppError::domain(DomainError::InvalidTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Processing,
        });

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::InvalidTransition);
        let message = error.user_message();
        assert!(message.contains("PENDING"));
        assert!(message.contains("PROCESSING"));
    }

    #[test]
    fn test_gateway_unavailable_is_retryable() {
        let error = AppError::new(AppErrorKind::External(ExternalError::GatewayUnavailable {
            gateway: "momo".to_string(),
            message: "connect timeout".to_string(),
            timed_out: true,
        }));

        assert_eq!(error.status_code(), 502);
        assert_eq!(error.error_code(), ErrorCode::GatewayUnavailable);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::SignatureInvalid).unwrap();
        assert_eq!(json, "\"SIGNATURE_INVALID\"");
    }
}
