//! Store health reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Response time above which a store counts as degraded unless it says otherwise
pub const DEFAULT_DEGRADED_THRESHOLD_MS: u64 = 1000;

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Store is responsive
    Healthy,
    /// Store is responsive but slow (above degraded threshold)
    Degraded,
    /// Store is not responsive or erroring
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Result of probing a store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHealth {
    /// Overall health status
    pub status: HealthStatus,
    /// Backend that was probed
    pub backend: String,
    /// Response time in milliseconds
    pub response_time_ms: u64,
    /// Error message (if unhealthy)
    pub error: Option<String>,
    /// Timestamp of the check
    pub checked_at: DateTime<Utc>,
}

impl StoreHealth {
    pub fn healthy(backend: &str, response_time: Duration, degraded_threshold_ms: u64) -> Self {
        let response_time_ms = response_time.as_millis() as u64;
        let status = if response_time_ms > degraded_threshold_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            backend: backend.to_string(),
            response_time_ms,
            error: None,
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(backend: &str, response_time: Duration, error: impl ToString) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            backend: backend.to_string(),
            response_time_ms: response_time.as_millis() as u64,
            error: Some(error.to_string()),
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_is_operational() {
        assert!(HealthStatus::Healthy.is_operational());
        assert!(HealthStatus::Degraded.is_operational());
        assert!(!HealthStatus::Unhealthy.is_operational());
    }

    #[test]
    fn test_degraded_threshold() {
        let fast = StoreHealth::healthy("memory", Duration::from_millis(50), 1000);
        assert_eq!(fast.status, HealthStatus::Healthy);
        assert_eq!(fast.response_time_ms, 50);

        let slow = StoreHealth::healthy("redis", Duration::from_millis(1500), 1000);
        assert_eq!(slow.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_unhealthy_result() {
        let result = StoreHealth::unhealthy("redis", Duration::from_millis(5000), "Connection refused");
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.error.as_deref(), Some("Connection refused"));
    }
}
