//! Settings for [`HttpClient`](super::HttpClient).
//!
//! The defaults suit calls between internal services: JSON in both directions,
//! a 30s overall request budget, three retries with exponential backoff and a
//! breaker that opens once most of a meaningful sample of requests fail.

use std::collections::BTreeMap;
use std::time::Duration;

/// Decides whether an attempt is retried. `None` means no response arrived.
pub type RetryPredicate = fn(Option<u16>) -> bool;

/// Retries transport failures, server errors and rate limiting.
pub fn default_should_retry(status: Option<u16>) -> bool {
    match status {
        None | Some(0) => true,
        Some(code) => code >= 500 || code == 429,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Whole request, including reading the body.
    pub request: Duration,
    pub connect: Duration,
    pub tcp_keepalive: Duration,
    pub pool_idle: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            connect: Duration::from_secs(5),
            tcp_keepalive: Duration::from_secs(15),
            pool_idle: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub max_idle_per_host: usize,
    /// Opens a new connection per request when set.
    pub disable_keep_alives: bool,
    pub proxy_url: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            disable_keep_alives: false,
            proxy_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// No retry is scheduled past this much time since the first attempt.
    pub max_elapsed: Duration,
    pub multiplier: f64,
    pub should_retry: RetryPredicate,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            max_elapsed: Duration::from_secs(10),
            multiplier: 2.0,
            should_retry: default_should_retry,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_interval.as_secs_f64() {
            self.max_interval
        } else {
            Duration::from_secs_f64(scaled.max(0.0))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub name: String,
    /// Trial requests admitted while half-open; that many successes close the breaker.
    pub max_requests: u32,
    /// How often closed-state counts reset. Zero keeps them until the state changes.
    pub interval: Duration,
    /// How long the breaker stays open before admitting trial requests.
    pub timeout: Duration,
    /// Requests needed in the current window before the failure ratio is considered.
    pub min_requests: u32,
    pub failure_ratio: f64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "httpclient".to_string(),
            max_requests: 100,
            interval: Duration::ZERO,
            timeout: Duration::from_secs(5),
            min_requests: 10,
            failure_ratio: 0.6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Prefix for relative request paths. Empty means every path must be absolute.
    pub base_url: String,
    /// Names the remote service in logs.
    pub service_name: String,
    pub default_headers: BTreeMap<String, String>,
    pub timeouts: TimeoutConfig,
    pub transport: TransportConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Logs request and response bodies at debug.
    pub debug: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        let default_headers = [
            ("Content-Type", "application/json"),
            ("Accept", "application/json"),
            ("User-Agent", concat!("resource-sample/", env!("CARGO_PKG_VERSION"))),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            base_url: String::new(),
            service_name: String::new(),
            default_headers,
            timeouts: TimeoutConfig::default(),
            transport: TransportConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            debug: false,
        }
    }
}

impl HttpClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Also renames the circuit breaker after the service.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.circuit_breaker.name = format!("httpclient-{name}");
        self.service_name = name;
        self
    }

    pub fn with_default_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(key.into(), value.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request = timeout;
        self
    }

    pub fn with_retry_enabled(mut self, enabled: bool) -> Self {
        self.retry.enabled = enabled;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_circuit_breaker_enabled(mut self, enabled: bool) -> Self {
        self.circuit_breaker.enabled = enabled;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(4), Duration::from_millis(800));
        assert_eq!(retry.backoff(6), Duration::from_secs(2));
        assert_eq!(retry.backoff(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn default_predicate_retries_transient_outcomes_only() {
        for retried in [None, Some(0), Some(429), Some(500), Some(503)] {
            assert!(default_should_retry(retried), "{retried:?}");
        }
        for kept in [Some(200), Some(201), Some(400), Some(404), Some(409)] {
            assert!(!default_should_retry(kept), "{kept:?}");
        }
    }

    #[test]
    fn service_name_renames_breaker() {
        let config = HttpClientConfig::default()
            .with_service_name("billing")
            .with_default_header("X-Tenant", "acme")
            .with_max_retries(1);
        assert_eq!(config.circuit_breaker.name, "httpclient-billing");
        assert_eq!(config.default_headers["X-Tenant"], "acme");
        assert_eq!(config.default_headers["Accept"], "application/json");
        assert_eq!(config.retry.max_retries, 1);
    }
}
