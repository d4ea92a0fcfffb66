use crate::config::env_or;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::signature::{OrderedPlainCodec, SignatureCodec};
use crate::payments::types::{
    CallbackEvent, CallbackParams, CallbackResult, GatewayName, GatewayPaymentRequest,
    GatewayPaymentResponse,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use base64::Engine;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const CREATE_SIGNATURE_FIELDS: &[&str] = &[
    "accessKey",
    "amount",
    "extraData",
    "ipnUrl",
    "orderId",
    "orderInfo",
    "partnerCode",
    "redirectUrl",
    "requestId",
    "requestType",
];

const CALLBACK_SIGNATURE_FIELDS: &[&str] = &[
    "accessKey",
    "amount",
    "extraData",
    "message",
    "orderId",
    "orderInfo",
    "orderType",
    "partnerCode",
    "payType",
    "requestId",
    "responseTime",
    "resultCode",
    "transId",
];

const CREATE_CODEC: OrderedPlainCodec = OrderedPlainCodec::new("momo", CREATE_SIGNATURE_FIELDS);
const CALLBACK_CODEC: OrderedPlainCodec =
    OrderedPlainCodec::new("momo", CALLBACK_SIGNATURE_FIELDS);

const DEFAULT_ENDPOINT: &str = "https://test-payment.momo.vn/v2/gateway/api/create";

#[derive(Clone)]
pub struct MomoConfig {
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: String,
    pub redirect_url: String,
    pub ipn_url: String,
    pub request_type: String,
    pub lang: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for MomoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MomoConfig")
            .field("partner_code", &self.partner_code)
            .field("endpoint", &self.endpoint)
            .field("redirect_url", &self.redirect_url)
            .field("ipn_url", &self.ipn_url)
            .field("request_type", &self.request_type)
            .finish_non_exhaustive()
    }
}

impl MomoConfig {
    /// `Ok(None)` when no MoMo credentials are configured at all.
    pub fn from_env() -> PaymentResult<Option<Self>> {
        let partner_code = std::env::var("MOMO_PARTNER_CODE").ok();
        let access_key = std::env::var("MOMO_ACCESS_KEY").ok();
        let secret_key = std::env::var("MOMO_SECRET_KEY").ok();

        let (partner_code, access_key, secret_key) = match (partner_code, access_key, secret_key)
        {
            (None, None, None) => return Ok(None),
            (Some(p), Some(a), Some(s)) => (p, a, s),
            _ => {
                return Err(PaymentError::ValidationError {
                    message: "MOMO_PARTNER_CODE, MOMO_ACCESS_KEY and MOMO_SECRET_KEY must be set together"
                        .to_string(),
                    field: Some("MOMO_SECRET_KEY".to_string()),
                })
            }
        };

        let timeout_secs =
            env_or("MOMO_TIMEOUT_SECS", 30_u64).map_err(|e| PaymentError::ValidationError {
                message: e.to_string(),
                field: Some("MOMO_TIMEOUT_SECS".to_string()),
            })?;

        Ok(Some(Self {
            partner_code,
            access_key,
            secret_key,
            endpoint: std::env::var("MOMO_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            redirect_url: std::env::var("MOMO_REDIRECT_URL").unwrap_or_default(),
            ipn_url: std::env::var("MOMO_IPN_URL").unwrap_or_default(),
            request_type: std::env::var("MOMO_REQUEST_TYPE")
                .unwrap_or_else(|_| "captureWallet".to_string()),
            lang: std::env::var("MOMO_LANG").unwrap_or_else(|_| "vi".to_string()),
            timeout_secs,
        }))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MomoCreateRequest<'a> {
    partner_code: &'a str,
    access_key: &'a str,
    request_id: &'a str,
    amount: String,
    order_id: &'a str,
    order_info: &'a str,
    redirect_url: &'a str,
    ipn_url: &'a str,
    request_type: &'a str,
    extra_data: &'a str,
    lang: &'a str,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MomoCreateResponse {
    result_code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    pay_url: Option<String>,
    #[serde(default)]
    deeplink: Option<String>,
    #[serde(default)]
    qr_code_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MomoExtraData {
    order_id: i64,
}

pub struct MomoGateway {
    config: MomoConfig,
    http: PaymentHttpClient,
}

impl MomoGateway {
    pub fn new(config: MomoConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new("momo", Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    fn encode_extra_data(order_id: i64) -> PaymentResult<String> {
        let json = serde_json::to_vec(&MomoExtraData { order_id }).map_err(|e| {
            PaymentError::ValidationError {
                message: format!("failed to encode extraData: {}", e),
                field: Some("extraData".to_string()),
            }
        })?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    /// Signature over the fields MoMo hashes on inbound notifications.
    pub fn sign_callback(&self, params: &CallbackParams) -> String {
        let mut fields = params.as_fields();
        fields.retain(|(name, _)| *name != "accessKey");
        fields.push(("accessKey", self.config.access_key.as_str()));
        CALLBACK_CODEC.sign(&self.config.secret_key, &fields)
    }
}

#[async_trait]
impl PaymentGateway for MomoGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Momo
    }

    async fn create_payment(
        &self,
        request: GatewayPaymentRequest,
    ) -> PaymentResult<GatewayPaymentResponse> {
        if request.amount <= 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }

        let request_id = Uuid::new_v4().to_string();
        let amount = request.amount.to_string();
        let order_info = request
            .order_info
            .clone()
            .unwrap_or_else(|| format!("Thanh toan don hang #{}", request.order_id));
        let redirect_url = request
            .return_url
            .clone()
            .unwrap_or_else(|| self.config.redirect_url.clone());
        let ipn_url = request
            .notify_url
            .clone()
            .unwrap_or_else(|| self.config.ipn_url.clone());
        let extra_data = Self::encode_extra_data(request.order_id)?;

        let signature = CREATE_CODEC.sign(
            &self.config.secret_key,
            &[
                ("accessKey", self.config.access_key.as_str()),
                ("amount", amount.as_str()),
                ("extraData", extra_data.as_str()),
                ("ipnUrl", ipn_url.as_str()),
                ("orderId", request.transaction_reference.as_str()),
                ("orderInfo", order_info.as_str()),
                ("partnerCode", self.config.partner_code.as_str()),
                ("redirectUrl", redirect_url.as_str()),
                ("requestId", request_id.as_str()),
                ("requestType", self.config.request_type.as_str()),
            ],
        );

        let body = MomoCreateRequest {
            partner_code: &self.config.partner_code,
            access_key: &self.config.access_key,
            request_id: &request_id,
            amount,
            order_id: &request.transaction_reference,
            order_info: &order_info,
            redirect_url: &redirect_url,
            ipn_url: &ipn_url,
            request_type: &self.config.request_type,
            extra_data: &extra_data,
            lang: &self.config.lang,
            signature,
        };

        let raw: MomoCreateResponse = self.http.post_json(&self.config.endpoint, &body).await?;

        if raw.result_code != 0 {
            warn!(
                order_id = request.order_id,
                result_code = raw.result_code,
                "momo rejected payment creation"
            );
            return Err(PaymentError::GatewayRejected {
                gateway: "momo".to_string(),
                provider_code: raw.result_code.to_string(),
                message: raw.message,
            });
        }

        let pay_url = raw.pay_url.ok_or_else(|| PaymentError::GatewayUnavailable {
            gateway: "momo".to_string(),
            message: "success response without payUrl".to_string(),
            timed_out: false,
        })?;

        info!(
            order_id = request.order_id,
            transaction_reference = %request.transaction_reference,
            "momo payment created"
        );

        Ok(GatewayPaymentResponse {
            gateway: GatewayName::Momo,
            order_id: request.order_id,
            transaction_reference: request.transaction_reference,
            request_id,
            pay_url,
            deeplink: raw.deeplink,
            qr_code_url: raw.qr_code_url,
            message: raw.message,
        })
    }

    fn verify_callback(&self, params: &CallbackParams) -> PaymentResult<()> {
        let received = params.require(GatewayName::Momo, "signature")?;
        let mut fields = params.as_fields();
        // MoMo never echoes the access key; it is part of the hash regardless
        fields.retain(|(name, _)| *name != "accessKey");
        fields.push(("accessKey", self.config.access_key.as_str()));
        CALLBACK_CODEC.verify(&self.config.secret_key, &fields, received)
    }

    fn parse_callback(&self, params: &CallbackParams) -> PaymentResult<CallbackEvent> {
        let invalid = |message: String| PaymentError::InvalidCallback {
            gateway: "momo".to_string(),
            message,
        };

        let partner_code = params.require(GatewayName::Momo, "partnerCode")?;
        if partner_code != self.config.partner_code {
            return Err(invalid(format!("unexpected partnerCode {}", partner_code)));
        }

        let transaction_reference = params.require(GatewayName::Momo, "orderId")?.to_string();
        let amount_minor: i64 = params
            .require(GatewayName::Momo, "amount")?
            .trim()
            .parse()
            .map_err(|_| invalid("amount is not an integer".to_string()))?;
        let result_code = params.require(GatewayName::Momo, "resultCode")?.trim();
        let message = params.get("message").unwrap_or_default().to_string();
        let pay_type = params.get("payType").unwrap_or_default();

        let transaction_id = params
            .get("transId")
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let transaction_time = params
            .get("responseTime")
            .and_then(|value| value.trim().parse::<i64>().ok())
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single());

        let result = if result_code == "0" {
            CallbackResult::Success
        } else {
            CallbackResult::Failure {
                code: result_code.to_string(),
                message: message.clone(),
            }
        };

        Ok(CallbackEvent {
            gateway: GatewayName::Momo,
            transaction_reference,
            amount_minor,
            minor_unit_factor: 1,
            result,
            transaction_id,
            transaction_time,
            info: format!(
                "MoMo resultCode={} message={} payType={}",
                result_code, message, pay_type
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MomoConfig {
        MomoConfig {
            partner_code: "MOMOBKUN20180529".to_string(),
            access_key: "klm05TvNBzhg7h7j".to_string(),
            secret_key: "at67qH6mk8w5Y1nAyMoYKMWACiEi2bsa".to_string(),
            endpoint: "http://127.0.0.1:9/create".to_string(),
            redirect_url: "https://shop.example/momo/return".to_string(),
            ipn_url: "https://shop.example/api/payments/momo/ipn".to_string(),
            request_type: "captureWallet".to_string(),
            lang: "vi".to_string(),
            timeout_secs: 2,
        }
    }

    fn callback(result_code: &str, amount: &str) -> CallbackParams {
        CallbackParams::from_raw_query(&format!(
            "partnerCode=MOMOBKUN20180529&orderId=ORDER7_1700000000000&requestId=req-1\
             &amount={}&orderInfo=Thanh+toan&orderType=momo_wallet&transId=4088878653\
             &resultCode={}&message=Successful.&payType=qr&responseTime=1700000005000\
             &extraData=eyJvcmRlcklkIjo3fQ%3D%3D",
            amount, result_code
        ))
    }

    fn signed(gateway: &MomoGateway, mut params: CallbackParams) -> CallbackParams {
        let signature = gateway.sign_callback(&params);
        params.params.insert("signature".to_string(), signature);
        params
    }

    #[test]
    fn extra_data_is_base64_json() {
        let encoded = MomoGateway::encode_extra_data(7).unwrap();
        assert_eq!(encoded, "eyJvcmRlcklkIjo3fQ==");
    }

    #[test]
    fn valid_callback_verifies_and_parses() {
        let gateway = MomoGateway::new(config()).unwrap();
        let params = signed(&gateway, callback("0", "80000"));
        gateway.verify_callback(&params).unwrap();

        let event = gateway.parse_callback(&params).unwrap();
        assert!(event.is_success());
        assert_eq!(event.transaction_reference, "ORDER7_1700000000000");
        assert!(event.matches_amount(80000));
        assert_eq!(event.transaction_id.as_deref(), Some("4088878653"));
        assert_eq!(
            event.transaction_time.map(|t| t.timestamp_millis()),
            Some(1_700_000_005_000)
        );
    }

    #[test]
    fn changed_amount_breaks_the_signature() {
        let gateway = MomoGateway::new(config()).unwrap();
        let mut params = signed(&gateway, callback("0", "80000"));
        params.params.insert("amount".to_string(), "1000".to_string());
        assert!(matches!(
            gateway.verify_callback(&params),
            Err(PaymentError::SignatureInvalid { .. })
        ));
    }

    #[test]
    fn missing_signature_is_rejected() {
        let gateway = MomoGateway::new(config()).unwrap();
        assert!(gateway.verify_callback(&callback("0", "80000")).is_err());
    }

    #[test]
    fn non_zero_result_code_is_a_failure() {
        let gateway = MomoGateway::new(config()).unwrap();
        let event = gateway.parse_callback(&callback("1006", "80000")).unwrap();
        match event.result {
            CallbackResult::Failure { code, .. } => assert_eq!(code, "1006"),
            CallbackResult::Success => panic!("expected failure"),
        }
        assert!(event.info.contains("1006"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_gateway_unavailable() {
        let gateway = MomoGateway::new(config()).unwrap();
        let result = gateway
            .create_payment(GatewayPaymentRequest {
                order_id: 7,
                amount: 80000,
                transaction_reference: "ORDER7_1700000000000".to_string(),
                order_info: None,
                return_url: None,
                notify_url: None,
                client_ip: None,
            })
            .await;
        assert!(matches!(
            result,
            Err(PaymentError::GatewayUnavailable { .. })
        ));
    }
}
