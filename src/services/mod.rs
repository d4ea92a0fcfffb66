//! Services module for order and payment business logic

pub mod callback_processor;
pub mod order_state_machine;
pub mod payment_initiation;
pub mod payment_ledger;

pub use callback_processor::{CallbackOutcome, CallbackProcessor, CallbackStatus};
pub use order_state_machine::{CreateOrderRequest, OrderDetails, OrderService};
pub use payment_initiation::{PaymentInitiationService, PaymentOverrides};
pub use payment_ledger::{OnlineConfirmation, PaymentLedger, PaymentRecord};
