//! # Mock Resources & Testing Guide
//!
//! [`MockResource`] implements [`Resource`] entirely in memory. It tracks whether it
//! is connected and how often each lifecycle method ran, and it can be told to fail
//! or to stall. Use it to test lifecycle orchestration and readiness reporting
//! without any real dependency.
//!
//! ## When to use mocks vs real resources
//!
//! | Feature | MockResource | Real resource |
//! |---------|--------------|---------------|
//! | **Speed** | Instant | Depends on the backend |
//! | **Failure injection** | `fail_connect`, `fail_close` | Hard to provoke |
//! | **Slow starts** | `connect_delay`, `close_delay` | Not controllable |
//! | **Use case** | Orchestrator and readiness logic | End-to-end flows |
//!
//! ## Example
//!
//! ```rust
//! use resource_framework::mock::MockResource;
//! use resource_framework::{Resource, ResourceManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let database = Arc::new(MockResource::new("database"));
//!     let cache = Arc::new(MockResource::new("cache").fail_connect("refused"));
//!
//!     let resources: Vec<Arc<dyn Resource>> = vec![database.clone(), cache.clone()];
//!     let manager = ResourceManager::new(resources);
//!     let err = manager.connect_all().await.unwrap_err();
//!
//!     // The failing resource is named, and the healthy one still connected.
//!     assert!(err.to_string().contains("cache"));
//!     assert!(database.is_connected());
//! }
//! ```

use crate::error::ResourceError;
use crate::resource::Resource;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// A configurable in-memory [`Resource`].
#[derive(Debug, Default)]
pub struct MockResource {
    name: String,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    close_calls: AtomicUsize,
    ping_calls: AtomicUsize,
    connect_error: Option<String>,
    close_error: Option<String>,
    connect_delay: Option<Duration>,
    close_delay: Option<Duration>,
}

impl MockResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Makes every `connect` fail with `reason`.
    pub fn fail_connect(mut self, reason: impl Into<String>) -> Self {
        self.connect_error = Some(reason.into());
        self
    }

    /// Makes every `close` of a connected mock fail with `reason`.
    pub fn fail_close(mut self, reason: impl Into<String>) -> Self {
        self.close_error = Some(reason.into());
        self
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = Some(delay);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn ping_calls(&self) -> usize {
        self.ping_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resource for MockResource {
    async fn connect(&self) -> Result<(), ResourceError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.connect_error {
            return Err(ResourceError::ConnectFailed {
                resource: self.name.clone(),
                reason: reason.clone(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), ResourceError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        // Closing an unconnected mock is always fine.
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        match &self.close_error {
            Some(reason) => Err(ResourceError::Failed {
                resource: self.name.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn ping(&self) -> Result<(), ResourceError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_connected() {
            Ok(())
        } else {
            Err(ResourceError::NotConnected(self.name.clone()))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
