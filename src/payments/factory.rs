use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{MomoConfig, MomoGateway, VnpayConfig, VnpayGateway};
use crate::payments::types::GatewayName;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// The set of gateways this process can talk to.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: BTreeMap<GatewayName, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    /// Register every gateway whose credentials are present in the environment.
    pub fn from_env() -> PaymentResult<Self> {
        let mut registry = Self::default();

        match MomoConfig::from_env()? {
            Some(config) => registry.register(Arc::new(MomoGateway::new(config)?)),
            None => info!(gateway = "momo", "gateway not configured, skipping"),
        }
        match VnpayConfig::from_env()? {
            Some(config) => registry.register(Arc::new(VnpayGateway::new(config))),
            None => info!(gateway = "vnpay", "gateway not configured, skipping"),
        }

        Ok(registry)
    }

    pub fn with_gateways(gateways: Vec<Arc<dyn PaymentGateway>>) -> Self {
        let mut registry = Self::default();
        for gateway in gateways {
            registry.register(gateway);
        }
        registry
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.name(), gateway);
    }

    pub fn get(&self, name: GatewayName) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&name)
            .cloned()
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("gateway {} is not configured", name),
                field: Some("gateway".to_string()),
            })
    }

    pub fn list_available(&self) -> Vec<GatewayName> {
        self.gateways.keys().copied().collect()
    }
}
