use crate::database::entities::PaymentMethod;
use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CallbackEvent, CallbackParams, GatewayName, GatewayPaymentRequest, GatewayPaymentResponse,
};
use async_trait::async_trait;

/// An external payment gateway.
///
/// `create_payment` builds and signs the outbound request; for redirect-style
/// gateways no network call is made. `verify_callback` must run before
/// `parse_callback` is trusted.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> GatewayName;

    fn payment_method(&self) -> PaymentMethod {
        self.name().payment_method()
    }

    async fn create_payment(
        &self,
        request: GatewayPaymentRequest,
    ) -> PaymentResult<GatewayPaymentResponse>;

    fn verify_callback(&self, params: &CallbackParams) -> PaymentResult<()>;

    fn parse_callback(&self, params: &CallbackParams) -> PaymentResult<CallbackEvent>;
}
