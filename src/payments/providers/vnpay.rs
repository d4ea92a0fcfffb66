use crate::config::env_or;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::signature::{SignatureCodec, SortedEncodedCodec};
use crate::payments::types::{
    CallbackEvent, CallbackParams, CallbackResult, GatewayName, GatewayPaymentRequest,
    GatewayPaymentResponse,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use tracing::info;
use uuid::Uuid;

const SECURE_HASH: &str = "vnp_SecureHash";
const SECURE_HASH_TYPE: &str = "vnp_SecureHashType";
const CODEC: SortedEncodedCodec = SortedEncodedCodec::new("vnpay", &[SECURE_HASH, SECURE_HASH_TYPE]);

const DATE_FORMAT: &str = "%Y%m%d%H%M%S";
const GMT7_SECONDS: i32 = 7 * 3600;
const MINOR_UNIT_FACTOR: i64 = 100;
const DEFAULT_PAY_URL: &str = "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html";

#[derive(Clone)]
pub struct VnpayConfig {
    pub tmn_code: String,
    pub hash_secret: String,
    pub pay_url: String,
    pub return_url: String,
    pub version: String,
    pub order_type: String,
    pub locale: String,
    pub expire_minutes: i64,
}

impl std::fmt::Debug for VnpayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VnpayConfig")
            .field("tmn_code", &self.tmn_code)
            .field("pay_url", &self.pay_url)
            .field("return_url", &self.return_url)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl VnpayConfig {
    /// `Ok(None)` when no VNPay credentials are configured at all.
    pub fn from_env() -> PaymentResult<Option<Self>> {
        let tmn_code = std::env::var("VNPAY_TMN_CODE").ok();
        let hash_secret = std::env::var("VNPAY_HASH_SECRET").ok();

        let (tmn_code, hash_secret) = match (tmn_code, hash_secret) {
            (None, None) => return Ok(None),
            (Some(t), Some(h)) => (t, h),
            _ => {
                return Err(PaymentError::ValidationError {
                    message: "VNPAY_TMN_CODE and VNPAY_HASH_SECRET must be set together"
                        .to_string(),
                    field: Some("VNPAY_HASH_SECRET".to_string()),
                })
            }
        };

        let expire_minutes =
            env_or("VNPAY_EXPIRE_MINUTES", 15_i64).map_err(|e| PaymentError::ValidationError {
                message: e.to_string(),
                field: Some("VNPAY_EXPIRE_MINUTES".to_string()),
            })?;

        Ok(Some(Self {
            tmn_code,
            hash_secret,
            pay_url: std::env::var("VNPAY_PAY_URL").unwrap_or_else(|_| DEFAULT_PAY_URL.to_string()),
            return_url: std::env::var("VNPAY_RETURN_URL").unwrap_or_default(),
            version: std::env::var("VNPAY_VERSION").unwrap_or_else(|_| "2.1.0".to_string()),
            order_type: std::env::var("VNPAY_ORDER_TYPE").unwrap_or_else(|_| "other".to_string()),
            locale: std::env::var("VNPAY_LOCALE").unwrap_or_else(|_| "vn".to_string()),
            expire_minutes,
        }))
    }
}

pub struct VnpayGateway {
    config: VnpayConfig,
}

impl VnpayGateway {
    pub fn new(config: VnpayConfig) -> Self {
        Self { config }
    }

    fn gmt7() -> PaymentResult<FixedOffset> {
        FixedOffset::east_opt(GMT7_SECONDS).ok_or_else(|| PaymentError::ValidationError {
            message: "invalid GMT+7 offset".to_string(),
            field: None,
        })
    }

    /// Signed redirect URL for the given instant. The hash is appended last
    /// and is not itself part of the signed string.
    pub fn build_payment_url(
        &self,
        request: &GatewayPaymentRequest,
        now: DateTime<Utc>,
    ) -> PaymentResult<String> {
        let amount = request
            .amount
            .checked_mul(MINOR_UNIT_FACTOR)
            .filter(|amount| *amount > 0)
            .ok_or_else(|| PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            })?
            .to_string();

        let offset = Self::gmt7()?;
        let created = now.with_timezone(&offset);
        let expires = created + ChronoDuration::minutes(self.config.expire_minutes);
        let create_date = created.format(DATE_FORMAT).to_string();
        let expire_date = expires.format(DATE_FORMAT).to_string();

        let order_info = request
            .order_info
            .clone()
            .unwrap_or_else(|| format!("Thanh toan don hang #{}", request.order_id));
        let return_url = request
            .return_url
            .clone()
            .unwrap_or_else(|| self.config.return_url.clone());
        let client_ip = request
            .client_ip
            .clone()
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let fields = [
            ("vnp_Version", self.config.version.as_str()),
            ("vnp_Command", "pay"),
            ("vnp_TmnCode", self.config.tmn_code.as_str()),
            ("vnp_Amount", amount.as_str()),
            ("vnp_CurrCode", "VND"),
            ("vnp_TxnRef", request.transaction_reference.as_str()),
            ("vnp_OrderInfo", order_info.as_str()),
            ("vnp_OrderType", self.config.order_type.as_str()),
            ("vnp_Locale", self.config.locale.as_str()),
            ("vnp_ReturnUrl", return_url.as_str()),
            ("vnp_IpAddr", client_ip.as_str()),
            ("vnp_CreateDate", create_date.as_str()),
            ("vnp_ExpireDate", expire_date.as_str()),
        ];

        let query = CODEC.canonical_string(&fields);
        let secure_hash = CODEC.digest(&self.config.hash_secret, &query);
        Ok(format!(
            "{}?{}&{}={}",
            self.config.pay_url, query, SECURE_HASH, secure_hash
        ))
    }

    fn parse_pay_date(raw: &str) -> Option<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(raw.trim(), DATE_FORMAT).ok()?;
        let offset = FixedOffset::east_opt(GMT7_SECONDS)?;
        offset
            .from_local_datetime(&naive)
            .single()
            .map(|at| at.with_timezone(&Utc))
    }

    /// Signature over decoded callback params, as a VNPay server would compute it.
    pub fn sign_callback(&self, params: &CallbackParams) -> String {
        CODEC.sign(&self.config.hash_secret, &params.as_fields())
    }
}

/// Short descriptions for the response codes VNPay documents.
fn response_message(code: &str) -> &'static str {
    match code {
        "00" => "Transaction successful",
        "07" => "Amount deducted, transaction flagged as suspicious",
        "09" => "Card or account not registered for internet banking",
        "10" => "Card or account verification failed too many times",
        "11" => "Payment window expired",
        "12" => "Card or account is locked",
        "13" => "Wrong one-time password",
        "24" => "Customer cancelled the transaction",
        "51" => "Insufficient balance",
        "65" => "Daily transaction limit exceeded",
        "75" => "Bank under maintenance",
        "79" => "Wrong payment password too many times",
        _ => "Transaction failed",
    }
}

#[async_trait]
impl PaymentGateway for VnpayGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Vnpay
    }

    async fn create_payment(
        &self,
        request: GatewayPaymentRequest,
    ) -> PaymentResult<GatewayPaymentResponse> {
        let pay_url = self.build_payment_url(&request, Utc::now())?;

        info!(
            order_id = request.order_id,
            transaction_reference = %request.transaction_reference,
            "vnpay payment url built"
        );

        Ok(GatewayPaymentResponse {
            gateway: GatewayName::Vnpay,
            order_id: request.order_id,
            transaction_reference: request.transaction_reference,
            request_id: Uuid::new_v4().to_string(),
            pay_url,
            deeplink: None,
            qr_code_url: None,
            message: "Redirect the customer to pay_url".to_string(),
        })
    }

    fn verify_callback(&self, params: &CallbackParams) -> PaymentResult<()> {
        let received = params.require(GatewayName::Vnpay, SECURE_HASH)?;
        let canonical = match params.raw_query.as_deref() {
            Some(raw) => CODEC.canonical_from_raw_query(raw),
            None => CODEC.canonical_string(&params.as_fields()),
        };
        CODEC.verify_canonical(&self.config.hash_secret, &canonical, received)
    }

    fn parse_callback(&self, params: &CallbackParams) -> PaymentResult<CallbackEvent> {
        let invalid = |message: String| PaymentError::InvalidCallback {
            gateway: "vnpay".to_string(),
            message,
        };

        let tmn_code = params.require(GatewayName::Vnpay, "vnp_TmnCode")?;
        if tmn_code != self.config.tmn_code {
            return Err(invalid(format!("unexpected vnp_TmnCode {}", tmn_code)));
        }

        let transaction_reference = params.require(GatewayName::Vnpay, "vnp_TxnRef")?.to_string();
        let amount_minor: i64 = params
            .require(GatewayName::Vnpay, "vnp_Amount")?
            .trim()
            .parse()
            .map_err(|_| invalid("vnp_Amount is not an integer".to_string()))?;
        let response_code = params.require(GatewayName::Vnpay, "vnp_ResponseCode")?.trim();
        let transaction_status = params
            .get("vnp_TransactionStatus")
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let bank_code = params.get("vnp_BankCode").unwrap_or_default();

        let result = match (response_code, transaction_status) {
            ("00", None) | ("00", Some("00")) => CallbackResult::Success,
            ("00", Some(status)) => CallbackResult::Failure {
                code: status.to_string(),
                message: response_message(status).to_string(),
            },
            (code, _) => CallbackResult::Failure {
                code: code.to_string(),
                message: response_message(code).to_string(),
            },
        };

        let transaction_id = params
            .get("vnp_TransactionNo")
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let transaction_time = params.get("vnp_PayDate").and_then(Self::parse_pay_date);

        let info = match &result {
            CallbackResult::Success => format!(
                "VNPay responseCode={} bankCode={}",
                response_code, bank_code
            ),
            CallbackResult::Failure { code, message } => format!(
                "VNPay responseCode={} transactionStatus={} code={} bankCode={} message={}",
                response_code,
                transaction_status.unwrap_or("-"),
                code,
                bank_code,
                message
            ),
        };

        Ok(CallbackEvent {
            gateway: GatewayName::Vnpay,
            transaction_reference,
            amount_minor,
            minor_unit_factor: MINOR_UNIT_FACTOR,
            result,
            transaction_id,
            transaction_time,
            info,
        })
    }
}
