use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid signature from {gateway}")]
    SignatureInvalid { gateway: String },

    #[error("Invalid callback from {gateway}: {message}")]
    InvalidCallback { gateway: String, message: String },

    #[error("Gateway rejected request: gateway={gateway}, code={provider_code}, message={message}")]
    GatewayRejected {
        gateway: String,
        provider_code: String,
        message: String,
    },

    #[error("Gateway unavailable: gateway={gateway}, message={message}")]
    GatewayUnavailable {
        gateway: String,
        message: String,
        timed_out: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::SignatureInvalid { .. } => false,
            PaymentError::InvalidCallback { .. } => false,
            PaymentError::GatewayRejected { .. } => false,
            PaymentError::GatewayUnavailable { .. } => true,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::SignatureInvalid { .. } => 401,
            PaymentError::InvalidCallback { .. } => 400,
            PaymentError::GatewayRejected { .. } => 400,
            PaymentError::GatewayUnavailable { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::SignatureInvalid { .. } => "Invalid callback signature".to_string(),
            PaymentError::InvalidCallback { message, .. } => {
                format!("Malformed payment callback: {}", message)
            }
            PaymentError::GatewayRejected { message, .. } => {
                format!("Payment gateway rejected the request: {}", message)
            }
            PaymentError::GatewayUnavailable { .. } => {
                "Payment gateway is temporarily unavailable".to_string()
            }
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        let kind = match err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            PaymentError::SignatureInvalid { gateway } => {
                AppErrorKind::External(ExternalError::SignatureInvalid { gateway })
            }
            PaymentError::InvalidCallback { gateway, message } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: format!("{} callback", gateway),
                    reason: message,
                })
            }
            PaymentError::GatewayRejected {
                gateway,
                provider_code,
                message,
            } => AppErrorKind::External(ExternalError::GatewayRejected {
                gateway,
                provider_code,
                message,
            }),
            PaymentError::GatewayUnavailable {
                gateway,
                message,
                timed_out,
            } => AppErrorKind::External(ExternalError::GatewayUnavailable {
                gateway,
                message,
                timed_out,
            }),
        };

        AppError::new(kind)
    }
}
