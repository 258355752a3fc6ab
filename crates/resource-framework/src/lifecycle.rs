//! # Resource Lifecycle Orchestration
//!
//! [`ResourceManager`] owns the fixed set of process-wide resources and brings them
//! up and down as a unit.
//!
//! ## Fan-out / fan-in
//!
//! Both startup and shutdown spawn one task per resource. Each task times its own
//! call and reports `(index, outcome)` on an `mpsc` channel sized to the resource
//! count. The collector keeps receiving until every task has reported (or dropped
//! its sender), so a slow or failing resource never hides the others' outcomes.
//! Outcomes are stored by registration index, not arrival order, which keeps error
//! messages attached to the right resource.
//!
//! | Phase | On failure | Bounded by |
//! |-------|------------|------------|
//! | [`connect_all`](ResourceManager::connect_all) | every failure aggregated into one [`LifecycleError`]; fatal to startup | the resources' own timeouts |
//! | [`close_all`](ResourceManager::close_all) | logged per resource; sweep continues | `shutdown_timeout` (default 5s) |
//!
//! There is no ordering between resources and no retry.

use crate::error::ResourceError;
use crate::resource::{check_health, HealthCheck, HealthStatus, ReadinessReport, Resource};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A resource that completed its lifecycle call, and how long it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceOutcome {
    pub name: String,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFailure {
    pub name: String,
    pub error: ResourceError,
}

impl fmt::Display for ResourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.name, self.error)
    }
}

fn summarize(failures: &[ResourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// One or more resources failed to connect. `connected` lists the ones that did.
    #[error("failed to connect {} resource(s): {}", .failures.len(), summarize(.failures))]
    Connect {
        failures: Vec<ResourceFailure>,
        connected: Vec<ResourceOutcome>,
    },
}

impl LifecycleError {
    pub fn failed_resources(&self) -> Vec<&str> {
        match self {
            LifecycleError::Connect { failures, .. } => {
                failures.iter().map(|f| f.name.as_str()).collect()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReport {
    pub connected: Vec<ResourceOutcome>,
    pub elapsed: Duration,
}

/// Result of a best-effort shutdown sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub closed: Vec<ResourceOutcome>,
    pub failed: Vec<ResourceFailure>,
    /// Resources that had not reported when the shutdown timeout expired.
    pub timed_out: Vec<String>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Connect,
    Close,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Connect => "connect",
            Phase::Close => "close",
        }
    }
}

type Slot = Option<Result<Duration, ResourceError>>;

/// Connects, health-checks and closes a fixed set of resources concurrently.
pub struct ResourceManager {
    resources: Vec<Arc<dyn Resource>>,
    shutdown_timeout: Duration,
}

impl ResourceManager {
    pub fn new(resources: Vec<Arc<dyn Resource>>) -> Self {
        Self {
            resources,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn resources(&self) -> &[Arc<dyn Resource>] {
        &self.resources
    }

    pub fn names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name()).collect()
    }

    /// Runs `phase` on every resource concurrently and collects the outcomes by index.
    ///
    /// With a `deadline`, collection stops when it passes; unreported slots stay `None`.
    async fn fan_out(&self, phase: Phase, deadline: Option<Instant>) -> Vec<Slot> {
        let count = self.resources.len();
        let (tx, mut rx) = mpsc::channel::<(usize, Result<Duration, ResourceError>)>(count.max(1));

        for (index, resource) in self.resources.iter().enumerate() {
            let resource = Arc::clone(resource);
            let tx = tx.clone();
            let span = info_span!("resource", name = %resource.name(), phase = phase.as_str());
            tokio::spawn(
                async move {
                    let start = Instant::now();
                    let result = match phase {
                        Phase::Connect => resource.connect().await,
                        Phase::Close => resource.close().await,
                    };
                    let elapsed = start.elapsed();
                    match &result {
                        Ok(()) => info!(elapsed_ms = elapsed.as_millis() as u64, "Resource {} ok", phase.as_str()),
                        Err(e) => error!(elapsed_ms = elapsed.as_millis() as u64, error = %e, "Resource {} failed", phase.as_str()),
                    }
                    let _ = tx.send((index, result.map(|()| elapsed))).await;
                }
                .instrument(span),
            );
        }
        // Only the tasks hold senders now; `recv` yields `None` once all are done.
        drop(tx);

        let mut slots: Vec<Slot> = vec![None; count];
        let mut received = 0;
        while received < count {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => break,
                },
                None => rx.recv().await,
            };
            match next {
                Some((index, outcome)) => {
                    slots[index] = Some(outcome);
                    received += 1;
                }
                None => break,
            }
        }
        slots
    }

    /// Connects every resource concurrently.
    ///
    /// Waits for all of them, then fails if any failed. The error names every
    /// failing resource and carries the successful outcomes too.
    pub async fn connect_all(&self) -> Result<ConnectReport, LifecycleError> {
        let start = Instant::now();
        info!(count = self.resources.len(), "Connecting resources");

        let slots = self.fan_out(Phase::Connect, None).await;
        let mut connected = Vec::new();
        let mut failures = Vec::new();
        for (resource, slot) in self.resources.iter().zip(slots) {
            let name = resource.name().to_string();
            match slot {
                Some(Ok(elapsed)) => connected.push(ResourceOutcome { name, elapsed }),
                Some(Err(error)) => failures.push(ResourceFailure { name, error }),
                None => failures.push(ResourceFailure {
                    error: ResourceError::Failed {
                        resource: name.clone(),
                        reason: "connect task ended without reporting".into(),
                    },
                    name,
                }),
            }
        }

        let elapsed = start.elapsed();
        if !failures.is_empty() {
            error!(
                failed = failures.len(),
                connected = connected.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Resource initialization failed"
            );
            return Err(LifecycleError::Connect {
                failures,
                connected,
            });
        }

        info!(
            count = connected.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "All resources connected"
        );
        Ok(ConnectReport { connected, elapsed })
    }

    /// Closes every resource concurrently, best-effort, within the shutdown timeout.
    ///
    /// Never fails: per-resource errors and timeouts are logged and reported.
    pub async fn close_all(&self) -> ShutdownReport {
        let start = Instant::now();
        info!(
            count = self.resources.len(),
            timeout_ms = self.shutdown_timeout.as_millis() as u64,
            "Closing resources"
        );

        let deadline = start + self.shutdown_timeout;
        let slots = self.fan_out(Phase::Close, Some(deadline)).await;

        let mut report = ShutdownReport::default();
        for (resource, slot) in self.resources.iter().zip(slots) {
            let name = resource.name().to_string();
            match slot {
                Some(Ok(elapsed)) => report.closed.push(ResourceOutcome { name, elapsed }),
                Some(Err(error)) => report.failed.push(ResourceFailure { name, error }),
                None => {
                    warn!(resource = %name, "Resource did not close before the shutdown timeout");
                    report.timed_out.push(name);
                }
            }
        }
        report.elapsed = start.elapsed();

        if report.is_clean() {
            info!(elapsed_ms = report.elapsed.as_millis() as u64, "All resources closed");
        } else {
            warn!(
                failed = report.failed.len(),
                timed_out = report.timed_out.len(),
                "Resources closed with errors"
            );
        }
        report
    }

    /// Pings every resource concurrently. Checks are returned in registration order.
    pub async fn check_all(&self) -> ReadinessReport {
        let mut set = JoinSet::new();
        for (index, resource) in self.resources.iter().enumerate() {
            let resource = Arc::clone(resource);
            set.spawn(async move { (index, check_health(resource.as_ref()).await) });
        }

        let mut slots: Vec<Option<HealthCheck>> = vec![None; self.resources.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, check)) => slots[index] = Some(check),
                Err(e) => error!(error = %e, "Health check task failed"),
            }
        }

        let checks = self
            .resources
            .iter()
            .zip(slots)
            .map(|(resource, slot)| {
                slot.unwrap_or_else(|| HealthCheck {
                    name: resource.name().to_string(),
                    status: HealthStatus::Error,
                    message: Some("health check task failed".into()),
                    time: Utc::now(),
                    duration_ms: 0,
                })
            })
            .collect();
        ReadinessReport::from_checks(checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockResource;

    #[tokio::test]
    async fn empty_manager_connects_and_closes() {
        let manager = ResourceManager::new(Vec::new());
        let report = manager.connect_all().await.unwrap();
        assert!(report.connected.is_empty());
        assert!(manager.close_all().await.is_clean());
        assert!(manager.check_all().await.is_ready());
    }

    #[tokio::test]
    async fn failures_are_reported_in_registration_order() {
        let slow_bad = Arc::new(
            MockResource::new("first")
                .fail_connect("slow refusal")
                .connect_delay(Duration::from_millis(30)),
        );
        let fast_bad = Arc::new(MockResource::new("second").fail_connect("refused"));
        let resources: Vec<Arc<dyn Resource>> = vec![slow_bad, fast_bad];

        let err = ResourceManager::new(resources).connect_all().await.unwrap_err();
        assert_eq!(err.failed_resources(), vec!["first", "second"]);
    }
}
