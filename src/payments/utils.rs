use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// JSON-over-HTTP client for gateway endpoints.
///
/// Calls are made exactly once. Any transport, timeout or decoding failure
/// surfaces as [`PaymentError::GatewayUnavailable`] so the caller can retry
/// the whole operation with a fresh request id.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    gateway: &'static str,
}

impl PaymentHttpClient {
    pub fn new(gateway: &'static str, timeout: Duration) -> PaymentResult<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::GatewayUnavailable {
                gateway: gateway.to_string(),
                message: format!("failed to initialize HTTP client: {}", e),
                timed_out: false,
            })?;

        Ok(Self { client, gateway })
    }

    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> PaymentResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.unavailable(format!("request failed: {}", e), e.is_timeout()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.unavailable(format!("failed to read response: {}", e), e.is_timeout()))?;

        serde_json::from_str::<T>(&text).map_err(|e| {
            warn!(gateway = self.gateway, status = %status, "unparseable gateway response");
            self.unavailable(format!("HTTP {}: invalid JSON response: {}", status, e), false)
        })
    }

    fn unavailable(&self, message: String, timed_out: bool) -> PaymentError {
        PaymentError::GatewayUnavailable {
            gateway: self.gateway.to_string(),
            message,
            timed_out,
        }
    }
}
