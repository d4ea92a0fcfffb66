//! Health check module
//! Reports the state of the store and of the payment gateway configuration

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, warn};

use crate::database::repository::Repository;
use crate::payments::factory::GatewayRegistry;

const DB_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    repo: Arc<dyn Repository>,
    gateways: GatewayRegistry,
}

impl HealthChecker {
    pub fn new(repo: Arc<dyn Repository>, gateways: GatewayRegistry) -> Self {
        Self {
            repo,
            gateways,
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let database = match timeout(DB_CHECK_TIMEOUT, check_database_health(self.repo.as_ref()))
            .await
        {
            Ok(Ok(response_time)) => ComponentHealth::up(Some(response_time)),
            Ok(Err(e)) => {
                error!("Database health check failed: {}", e);
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!("Database health check timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        };
        let database_down = database.status == ComponentState::Down;
        health_status
            .checks
            .insert("database".to_string(), database);

        let available = self.gateways.list_available();
        let gateways = if available.is_empty() {
            warn!("No payment gateway configured, only COD orders can be paid");
            ComponentHealth::warning(None, Some("no payment gateway configured".to_string()))
        } else {
            let names: Vec<&str> = available.iter().map(|name| name.as_str()).collect();
            ComponentHealth {
                details: Some(names.join(",")),
                ..ComponentHealth::up(None)
            }
        };
        let gateways_degraded = gateways.status != ComponentState::Up;
        health_status
            .checks
            .insert("payment_gateways".to_string(), gateways);

        health_status.status = if database_down {
            HealthState::Unhealthy
        } else if gateways_degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }
}

pub async fn check_database_health(
    repo: &dyn Repository,
) -> Result<u128, crate::database::error::DatabaseError> {
    let start = Instant::now();
    repo.ping().await?;
    Ok(start.elapsed().as_millis())
}
