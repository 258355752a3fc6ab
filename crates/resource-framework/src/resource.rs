//! # Resource Abstraction
//!
//! Every external dependency (document database, cache, ...) implements [`Resource`]
//! so that the [`ResourceManager`](crate::ResourceManager) can bring the whole set up
//! and down as a unit.
//!
//! Methods take `&self`: a resource is shared with the orchestrator's tasks through
//! an `Arc`, so connection state lives behind interior mutability.
//!
//! The contract:
//!
//! - `connect` is called once at startup. Calling it again is not required to work.
//! - `close` on a resource that never connected, or was already closed, returns `Ok(())`.
//! - `ping` returns [`ResourceError::NotConnected`] before a successful `connect`.
//! - `name` is stable and used in logs and health reports.

use crate::error::ResourceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error};

#[async_trait]
pub trait Resource: Send + Sync {
    async fn connect(&self) -> Result<(), ResourceError>;

    async fn close(&self) -> Result<(), ResourceError>;

    async fn ping(&self) -> Result<(), ResourceError>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

/// Outcome of a single timed ping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub time: DateTime<Utc>,
    pub duration_ms: u64,
}

impl HealthCheck {
    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// Pings `resource` and reports the outcome. Never fails.
pub async fn check_health(resource: &dyn Resource) -> HealthCheck {
    let start = Instant::now();
    let result = resource.ping().await;
    let elapsed = start.elapsed();

    let (status, message) = match result {
        Ok(()) => {
            debug!(resource = resource.name(), ?elapsed, "Health check passed");
            (HealthStatus::Ok, None)
        }
        Err(e) => {
            error!(resource = resource.name(), error = %e, ?elapsed, "Health check failed");
            (HealthStatus::Error, Some(e.to_string()))
        }
    };

    HealthCheck {
        name: resource.name().to_string(),
        status,
        message,
        time: Utc::now(),
        duration_ms: elapsed.as_millis() as u64,
    }
}

/// Aggregate health of a set of resources, as served by a readiness probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
}

impl ReadinessReport {
    pub fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let status = if checks.iter().all(HealthCheck::is_ok) {
            HealthStatus::Ok
        } else {
            HealthStatus::Error
        };
        Self { status, checks }
    }

    pub fn is_ready(&self) -> bool {
        self.status == HealthStatus::Ok
    }

    pub fn check(&self, name: &str) -> Option<&HealthCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockResource;

    #[tokio::test]
    async fn check_health_reports_not_connected() {
        let cache = MockResource::new("cache");
        let check = check_health(&cache).await;
        assert_eq!(check.status, HealthStatus::Error);
        assert_eq!(check.message.as_deref(), Some("resource cache not connected"));

        cache.connect().await.unwrap();
        let check = check_health(&cache).await;
        assert!(check.is_ok());
        assert!(check.message.is_none());
    }

    #[test]
    fn health_check_serializes_lowercase_status_and_omits_empty_message() {
        let check = HealthCheck {
            name: "database".into(),
            status: HealthStatus::Ok,
            message: None,
            time: Utc::now(),
            duration_ms: 1,
        };
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json.get("message").is_none());
    }

    #[test]
    fn readiness_is_ok_only_when_every_check_is() {
        let ok = HealthCheck {
            name: "a".into(),
            status: HealthStatus::Ok,
            message: None,
            time: Utc::now(),
            duration_ms: 0,
        };
        let bad = HealthCheck {
            name: "b".into(),
            status: HealthStatus::Error,
            message: Some("down".into()),
            ..ok.clone()
        };
        assert!(ReadinessReport::from_checks(vec![ok.clone()]).is_ready());
        let report = ReadinessReport::from_checks(vec![ok, bad]);
        assert!(!report.is_ready());
        assert_eq!(report.check("b").and_then(|c| c.message.as_deref()), Some("down"));
    }
}
