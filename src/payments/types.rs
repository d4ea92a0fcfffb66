use crate::database::entities::PaymentMethod;
use crate::payments::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum GatewayName {
    Momo,
    Vnpay,
}

impl GatewayName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Momo => "momo",
            GatewayName::Vnpay => "vnpay",
        }
    }

    pub fn payment_method(&self) -> PaymentMethod {
        match self {
            GatewayName::Momo => PaymentMethod::Momo,
            GatewayName::Vnpay => PaymentMethod::Vnpay,
        }
    }
}

impl std::fmt::Display for GatewayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "momo" => Ok(GatewayName::Momo),
            "vnpay" => Ok(GatewayName::Vnpay),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported gateway: {}", value),
                field: Some("gateway".to_string()),
            }),
        }
    }
}

/// Everything a gateway needs to build a payment-initiation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPaymentRequest {
    pub order_id: i64,
    /// Order total in VND, before any minor-unit conversion
    pub amount: i64,
    pub transaction_reference: String,
    pub order_info: Option<String>,
    pub return_url: Option<String>,
    pub notify_url: Option<String>,
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPaymentResponse {
    pub gateway: GatewayName,
    pub order_id: i64,
    pub transaction_reference: String,
    pub request_id: String,
    pub pay_url: String,
    pub deeplink: Option<String>,
    pub qr_code_url: Option<String>,
    pub message: String,
}

/// Inbound callback parameters.
///
/// `raw_query` keeps the transport encoding for signature checks that must
/// hash exactly what the provider sent; `params` holds decoded values.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub raw_query: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl CallbackParams {
    pub fn from_raw_query(raw_query: &str) -> Self {
        let params = url::form_urlencoded::parse(raw_query.as_bytes())
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        Self {
            raw_query: Some(raw_query.to_string()),
            params,
        }
    }

    /// Flatten a JSON object body. Numbers and booleans keep their textual form.
    pub fn from_json(body: &serde_json::Value) -> Result<Self, PaymentError> {
        let object = body.as_object().ok_or_else(|| PaymentError::ValidationError {
            message: "callback body must be a JSON object".to_string(),
            field: None,
        })?;
        let params = object
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    serde_json::Value::String(text) => text.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect();
        Ok(Self {
            raw_query: None,
            params,
        })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn require(&self, gateway: GatewayName, name: &str) -> Result<&str, PaymentError> {
        self.get(name)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| PaymentError::InvalidCallback {
                gateway: gateway.to_string(),
                message: format!("missing field {}", name),
            })
    }

    pub fn as_fields(&self) -> Vec<(&str, &str)> {
        self.params
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CallbackResult {
    Success,
    Failure { code: String, message: String },
}

/// A verified callback, normalised across gateways.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackEvent {
    pub gateway: GatewayName,
    pub transaction_reference: String,
    /// Amount exactly as declared by the gateway, in its own unit
    pub amount_minor: i64,
    /// How many gateway units make one VND (100 for VNPay, 1 for MoMo)
    pub minor_unit_factor: i64,
    pub result: CallbackResult,
    pub transaction_id: Option<String>,
    pub transaction_time: Option<DateTime<Utc>>,
    /// Diagnostic note stored on the payment row
    pub info: String,
}

impl CallbackEvent {
    pub fn is_success(&self) -> bool {
        matches!(self.result, CallbackResult::Success)
    }

    /// Declared amount in VND, truncated when not a whole multiple.
    pub fn amount(&self) -> i64 {
        self.amount_minor / self.minor_unit_factor.max(1)
    }

    /// Compared in gateway units so a fractional VND amount never matches.
    pub fn matches_amount(&self, expected_vnd: i64) -> bool {
        expected_vnd
            .checked_mul(self.minor_unit_factor.max(1))
            .map(|expected| expected == self.amount_minor)
            .unwrap_or(false)
    }
}
