//! Backend connection management and health checks
//!
//! A [`Connector`] turns a [`CacheConfig`] into a live [`Store`] handle. The
//! facade calls it once at construction; there is no reconnection within an
//! instance's lifetime.

use crate::cache::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Establishes store connections from configuration
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &CacheConfig) -> Result<Arc<dyn Store>>;
}

/// Connect through `connector` and run the handshake, bounded by `config.timeout`
pub async fn establish(connector: &dyn Connector, config: &CacheConfig) -> Result<Arc<dyn Store>> {
    info!(
        "Connecting cache '{}' to {}:{} (database: {})",
        config.name, config.host, config.port, config.database
    );

    let store = match tokio::time::timeout(config.timeout, connector.connect(config)).await {
        Ok(Ok(store)) => store,
        Ok(Err(e)) => return Err(as_connect_failure(e)),
        Err(_) => return Err(timed_out(config.timeout, "connect")),
    };

    handshake(store.as_ref(), config).await?;

    info!(
        "Cache '{}' connected ({} backend)",
        config.name,
        store.name()
    );
    Ok(store)
}

/// Ping an already created store handle, bounded by `config.timeout`
pub async fn handshake(store: &dyn Store, config: &CacheConfig) -> Result<()> {
    debug!("Handshake with {} backend", store.name());
    match tokio::time::timeout(config.timeout, store.ping()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(as_connect_failure(e)),
        Err(_) => Err(timed_out(config.timeout, "handshake")),
    }
}

fn as_connect_failure(error: CacheError) -> CacheError {
    match error {
        CacheError::ConnectFailure(_) => error,
        other => CacheError::ConnectFailure(other.to_string()),
    }
}

fn timed_out(timeout: Duration, stage: &str) -> CacheError {
    CacheError::ConnectFailure(format!(
        "{} timed out after {}ms",
        stage,
        timeout.as_millis()
    ))
}

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Backend is reachable and the facade is enabled
    Healthy,
    /// Backend answers, but slower than the configured threshold
    Degraded,
    /// Backend is unreachable or the facade is disabled
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub response_time_ms: u64,
    /// Backend name, when a store handle exists
    pub backend: Option<String>,
    /// Whether the facade was serving requests at check time
    pub enabled: bool,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl HealthCheckResult {
    fn healthy(response_time: Duration, backend: &str, degraded_threshold: Duration) -> Self {
        let status = if response_time > degraded_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            response_time_ms: response_time.as_millis() as u64,
            backend: Some(backend.to_string()),
            enabled: true,
            timestamp: Utc::now(),
            error: None,
        }
    }

    fn unhealthy(response_time: Duration, backend: Option<&str>, enabled: bool, error: &str) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: response_time.as_millis() as u64,
            backend: backend.map(str::to_string),
            enabled,
            timestamp: Utc::now(),
            error: Some(error.to_string()),
        }
    }
}

/// Ping the backend without changing facade state
pub(crate) async fn check_health(
    store: Option<&dyn Store>,
    enabled: bool,
    config: &CacheConfig,
) -> HealthCheckResult {
    let start = Instant::now();

    let store = match store {
        Some(store) => store,
        None => {
            let unavailable = CacheError::Unavailable("no backend installed".to_string());
            return HealthCheckResult::unhealthy(start.elapsed(), None, enabled, &unavailable.to_string());
        }
    };

    let outcome = tokio::time::timeout(config.timeout, store.ping()).await;
    let elapsed = start.elapsed();

    match outcome {
        Ok(Ok(())) if enabled => {
            debug!("Health check passed ({}ms)", elapsed.as_millis());
            HealthCheckResult::healthy(elapsed, store.name(), config.degraded_threshold)
        }
        Ok(Ok(())) => HealthCheckResult::unhealthy(
            elapsed,
            Some(store.name()),
            false,
            "facade disabled",
        ),
        Ok(Err(e)) => {
            warn!("Health check failed: {}", e);
            HealthCheckResult::unhealthy(elapsed, Some(store.name()), enabled, &e.to_string())
        }
        Err(_) => {
            warn!("Health check timed out after {:?}", config.timeout);
            HealthCheckResult::unhealthy(
                elapsed,
                Some(store.name()),
                enabled,
                &format!("ping timed out after {}ms", config.timeout.as_millis()),
            )
        }
    }
}
