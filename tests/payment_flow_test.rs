use axum::{routing::post, Json, Router};
use bookstore_backend::auth::Identity;
use bookstore_backend::database::entities::{OrderStatus, PaymentMethod, PaymentStatus};
use bookstore_backend::database::memory::MemoryRepository;
use bookstore_backend::database::repository::Repository;
use bookstore_backend::error::ErrorCode;
use bookstore_backend::payments::factory::GatewayRegistry;
use bookstore_backend::payments::providers::{MomoConfig, MomoGateway, VnpayConfig, VnpayGateway};
use bookstore_backend::payments::signature::encode_component;
use bookstore_backend::payments::types::{CallbackParams, GatewayName};
use bookstore_backend::payments::PaymentGateway;
use bookstore_backend::services::{
    CallbackProcessor, CallbackStatus, CreateOrderRequest, OrderService,
    PaymentInitiationService, PaymentLedger, PaymentOverrides,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

const VNPAY_SECRET: &str = "VNPAYTESTSECRET";

fn vnpay_gateway() -> VnpayGateway {
    VnpayGateway::new(VnpayConfig {
        tmn_code: "BOOKS001".to_string(),
        hash_secret: VNPAY_SECRET.to_string(),
        pay_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
        return_url: "https://shop.example/vnpay/return".to_string(),
        version: "2.1.0".to_string(),
        order_type: "other".to_string(),
        locale: "vn".to_string(),
        expire_minutes: 15,
    })
}

fn momo_gateway(endpoint: &str) -> MomoGateway {
    MomoGateway::new(MomoConfig {
        partner_code: "MOMOBOOKS".to_string(),
        access_key: "F8BBA842ECF85".to_string(),
        secret_key: "K951B6PE1waDMi640xX08PD3vg6EkVlz".to_string(),
        endpoint: endpoint.to_string(),
        redirect_url: "https://shop.example/momo/return".to_string(),
        ipn_url: "https://shop.example/api/payments/momo/ipn".to_string(),
        request_type: "captureWallet".to_string(),
        lang: "vi".to_string(),
        timeout_secs: 5,
    })
    .unwrap()
}

struct Harness {
    repo: MemoryRepository,
    orders: OrderService,
    ledger: PaymentLedger,
    initiation: PaymentInitiationService,
    callbacks: CallbackProcessor,
}

fn harness(gateways: Vec<Arc<dyn PaymentGateway>>) -> Harness {
    let repo = MemoryRepository::new();
    let shared: Arc<dyn Repository> = Arc::new(repo.clone());
    let ledger = PaymentLedger::new(shared.clone());
    let registry = GatewayRegistry::with_gateways(gateways);
    Harness {
        orders: OrderService::new(shared.clone(), ledger.clone()),
        initiation: PaymentInitiationService::new(shared.clone(), ledger.clone(), registry.clone()),
        callbacks: CallbackProcessor::new(shared, ledger.clone(), registry),
        ledger,
        repo,
    }
}

/// Places an order for one copy of a book priced at `price` through the cart.
async fn place_order(h: &Harness, user_id: i64, price: i64, method: PaymentMethod) -> i64 {
    let product = h.repo.insert_product("Dế Mèn Phiêu Lưu Ký", price, 10).await;
    h.repo.add_cart_item(user_id, product.id, 1).await;
    let details = h
        .orders
        .create_order(
            &Identity::user(user_id),
            CreateOrderRequest {
                shipping_address: "12 Trang Tien, Ha Noi".to_string(),
                method_payment: method,
                cart_item_ids: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(details.order.total_amount, price);
    details.order.id
}

fn signed_vnpay_callback(reference: &str, amount: i64, response_code: &str) -> CallbackParams {
    let amount = amount.to_string();
    let pairs = [
        ("vnp_Amount", amount.as_str()),
        ("vnp_BankCode", "NCB"),
        ("vnp_CardType", "ATM"),
        ("vnp_OrderInfo", "Thanh toan don hang"),
        ("vnp_PayDate", "20231115093005"),
        ("vnp_ResponseCode", response_code),
        ("vnp_TmnCode", "BOOKS001"),
        ("vnp_TransactionNo", "14226112"),
        ("vnp_TransactionStatus", response_code),
        ("vnp_TxnRef", reference),
    ];
    let decoded = CallbackParams {
        raw_query: None,
        params: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    };
    let hash = vnpay_gateway().sign_callback(&decoded);
    let query = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, encode_component(v)))
        .collect::<Vec<_>>()
        .join("&");
    CallbackParams::from_raw_query(&format!(
        "{}&vnp_SecureHashType=HmacSHA512&vnp_SecureHash={}",
        query, hash
    ))
}

#[tokio::test]
async fn vnpay_success_marks_order_paid_and_duplicate_is_already_confirmed() {
    let h = harness(vec![Arc::new(vnpay_gateway())]);
    let order_id = place_order(&h, 1, 150000, PaymentMethod::Vnpay).await;
    let reference = format!("ORDER{}_1700000000000", order_id);

    let first = h
        .callbacks
        .process(
            GatewayName::Vnpay,
            &signed_vnpay_callback(&reference, 15000000, "00"),
        )
        .await
        .unwrap();
    assert_eq!(first.status, CallbackStatus::AppliedPaid);

    let order = h.repo.find_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(order.status, OrderStatus::Pending);
    let paid = h.repo.find_payment_by_order(order_id).await.unwrap().unwrap();
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.payment_method, PaymentMethod::Vnpay);
    assert_eq!(paid.transaction_id.as_deref(), Some("14226112"));
    assert!(paid.transaction_time.is_some());

    let duplicate = h
        .callbacks
        .process(
            GatewayName::Vnpay,
            &signed_vnpay_callback(&reference, 15000000, "00"),
        )
        .await
        .unwrap();
    assert_eq!(duplicate.status, CallbackStatus::AlreadyConfirmed);
    assert!(duplicate.message.contains("already confirmed"));

    let after = h.repo.find_payment_by_order(order_id).await.unwrap().unwrap();
    assert_eq!(after.transaction_time, paid.transaction_time);
    assert_eq!(h.repo.payments_for_order(order_id).await.len(), 1);
}

#[tokio::test]
async fn vnpay_failure_code_marks_payment_failed() {
    let h = harness(vec![Arc::new(vnpay_gateway())]);
    let order_id = place_order(&h, 1, 80000, PaymentMethod::Vnpay).await;
    let reference = format!("ORDER{}_1700000000000", order_id);

    let outcome = h
        .callbacks
        .process(
            GatewayName::Vnpay,
            &signed_vnpay_callback(&reference, 8000000, "07"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, CallbackStatus::AppliedFailed);

    let order = h.repo.find_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    let payment = h.repo.find_payment_by_order(order_id).await.unwrap().unwrap();
    assert_eq!(payment.payment_status, PaymentStatus::Failed);
    assert!(payment.payment_info.unwrap_or_default().contains("07"));

    // A later successful attempt may still settle the order
    let retry = h
        .callbacks
        .process(
            GatewayName::Vnpay,
            &signed_vnpay_callback(&format!("ORDER{}_1700000099999", order_id), 8000000, "00"),
        )
        .await
        .unwrap();
    assert_eq!(retry.status, CallbackStatus::AppliedPaid);
}

#[tokio::test]
async fn concurrent_duplicate_callbacks_apply_once() {
    let h = harness(vec![Arc::new(vnpay_gateway())]);
    let order_id = place_order(&h, 1, 150000, PaymentMethod::Vnpay).await;
    let params = signed_vnpay_callback(&format!("ORDER{}_1700000000000", order_id), 15000000, "00");

    let (a, b) = tokio::join!(
        h.callbacks.process(GatewayName::Vnpay, &params),
        h.callbacks.process(GatewayName::Vnpay, &params),
    );
    let mut statuses = vec![a.unwrap().status, b.unwrap().status];
    statuses.sort_by_key(|status| format!("{:?}", status));
    assert_eq!(
        statuses,
        vec![CallbackStatus::AlreadyConfirmed, CallbackStatus::AppliedPaid]
    );
    assert_eq!(h.repo.payments_for_order(order_id).await.len(), 1);
}

#[tokio::test]
async fn mismatched_amount_and_bad_signature_change_nothing() {
    let h = harness(vec![Arc::new(vnpay_gateway())]);
    let order_id = place_order(&h, 1, 150000, PaymentMethod::Vnpay).await;
    let reference = format!("ORDER{}_1700000000000", order_id);

    let err = h
        .callbacks
        .process(
            GatewayName::Vnpay,
            &signed_vnpay_callback(&reference, 15000100, "00"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::AmountMismatch);

    let mut forged = signed_vnpay_callback(&reference, 15000000, "00");
    forged.params.insert("vnp_Amount".to_string(), "100".to_string());
    forged.raw_query = None;
    let err = h
        .callbacks
        .process(GatewayName::Vnpay, &forged)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::SignatureInvalid);
    assert_eq!(err.status_code(), 401);

    let order = h.repo.find_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn callback_for_refunded_order_is_already_confirmed() {
    let h = harness(vec![Arc::new(vnpay_gateway())]);
    let order_id = place_order(&h, 1, 150000, PaymentMethod::Vnpay).await;
    let params = signed_vnpay_callback(&format!("ORDER{}_1700000000000", order_id), 15000000, "00");

    h.callbacks.process(GatewayName::Vnpay, &params).await.unwrap();
    h.ledger.refund(order_id).await.unwrap();

    let outcome = h.callbacks.process(GatewayName::Vnpay, &params).await.unwrap();
    assert_eq!(outcome.status, CallbackStatus::AlreadyConfirmed);
    let order = h.repo.find_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn vnpay_payment_url_round_trips_through_callback_verification() {
    let h = harness(vec![Arc::new(vnpay_gateway())]);
    let order_id = place_order(&h, 1, 150000, PaymentMethod::Cod).await;

    let response = h
        .initiation
        .create_payment(
            &Identity::user(1),
            GatewayName::Vnpay,
            order_id,
            PaymentOverrides {
                client_ip: Some("203.0.113.7".to_string()),
                ..PaymentOverrides::default()
            },
        )
        .await
        .unwrap();
    assert!(response.pay_url.contains("vnp_IpAddr=203.0.113.7"));
    assert!(response.pay_url.contains("vnp_Amount=15000000"));

    let query = response.pay_url.split_once('?').map(|(_, q)| q).unwrap();
    let gateway = vnpay_gateway();
    assert!(gateway
        .verify_callback(&CallbackParams::from_raw_query(query))
        .is_ok());

    let order = h.repo.find_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.method_payment, PaymentMethod::Vnpay);
}

async fn spawn_fake_momo(response: Value) -> (String, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let app = Router::new().route(
        "/v2/gateway/api/create",
        post(move |Json(body): Json<Value>| {
            let recorder = recorder.clone();
            let response = response.clone();
            async move {
                recorder.lock().await.push(body);
                Json(response)
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/v2/gateway/api/create", addr), seen)
}

#[tokio::test]
async fn momo_create_then_ipn_settles_order() {
    let (endpoint, seen) = spawn_fake_momo(json!({
        "partnerCode": "MOMOBOOKS",
        "resultCode": 0,
        "message": "Thành công.",
        "payUrl": "https://test-payment.momo.vn/v2/gateway/pay?t=abc",
        "deeplink": "momo://app?action=payWithApp",
    }))
    .await;
    let h = harness(vec![Arc::new(momo_gateway(&endpoint))]);
    let order_id = place_order(&h, 3, 150000, PaymentMethod::Cod).await;

    let response = h
        .initiation
        .create_payment(
            &Identity::user(3),
            GatewayName::Momo,
            order_id,
            PaymentOverrides::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.pay_url,
        "https://test-payment.momo.vn/v2/gateway/pay?t=abc"
    );

    let requests = seen.lock().await.clone();
    assert_eq!(requests.len(), 1);
    let sent = &requests[0];
    assert_eq!(sent["amount"], "150000");
    assert_eq!(sent["orderId"], response.transaction_reference.as_str());
    assert_eq!(sent["requestType"], "captureWallet");
    assert_eq!(sent["signature"].as_str().map(str::len), Some(64));

    let order = h.repo.find_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.method_payment, PaymentMethod::Momo);
    assert_eq!(order.payment_status, PaymentStatus::Pending);

    let mut ipn = CallbackParams::default();
    for (name, value) in [
        ("partnerCode", "MOMOBOOKS"),
        ("orderId", response.transaction_reference.as_str()),
        ("requestId", response.request_id.as_str()),
        ("amount", "150000"),
        ("orderInfo", sent["orderInfo"].as_str().unwrap_or_default()),
        ("orderType", "momo_wallet"),
        ("transId", "4088878653"),
        ("resultCode", "0"),
        ("message", "Thành công."),
        ("payType", "qr"),
        ("responseTime", "1700000000000"),
        ("extraData", sent["extraData"].as_str().unwrap_or_default()),
    ] {
        ipn.params.insert(name.to_string(), value.to_string());
    }
    let signature = momo_gateway(&endpoint).sign_callback(&ipn);
    ipn.params.insert("signature".to_string(), signature);

    let outcome = h.callbacks.process(GatewayName::Momo, &ipn).await.unwrap();
    assert_eq!(outcome.status, CallbackStatus::AppliedPaid);

    let payment = h.repo.find_payment_by_order(order_id).await.unwrap().unwrap();
    assert_eq!(payment.payment_status, PaymentStatus::Paid);
    assert_eq!(payment.payment_method, PaymentMethod::Momo);
    assert_eq!(payment.transaction_id.as_deref(), Some("4088878653"));
}

#[tokio::test]
async fn momo_rejection_leaves_payment_pending() {
    let (endpoint, _) = spawn_fake_momo(json!({
        "resultCode": 11,
        "message": "Truy cập bị từ chối.",
    }))
    .await;
    let h = harness(vec![Arc::new(momo_gateway(&endpoint))]);
    let order_id = place_order(&h, 3, 90000, PaymentMethod::Cod).await;

    let err = h
        .initiation
        .create_payment(
            &Identity::user(3),
            GatewayName::Momo,
            order_id,
            PaymentOverrides::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::GatewayRejected);
    assert_eq!(err.status_code(), 400);

    let payment = h.repo.find_payment_by_order(order_id).await.unwrap().unwrap();
    assert_eq!(payment.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn unreachable_momo_is_gateway_unavailable() {
    let h = harness(vec![Arc::new(momo_gateway(
        "http://127.0.0.1:9/v2/gateway/api/create",
    ))]);
    let order_id = place_order(&h, 3, 90000, PaymentMethod::Cod).await;

    let err = h
        .initiation
        .create_payment(
            &Identity::user(3),
            GatewayName::Momo,
            order_id,
            PaymentOverrides::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::GatewayUnavailable);
    assert!(err.is_retryable());

    let order = h.repo.find_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Pending);
}
