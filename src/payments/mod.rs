pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod reference;
pub mod signature;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use factory::GatewayRegistry;
pub use provider::PaymentGateway;
pub use reference::TransactionReference;
pub use types::{CallbackEvent, CallbackParams, CallbackResult, GatewayName};
