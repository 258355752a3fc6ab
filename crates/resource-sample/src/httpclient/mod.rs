//! # Resilient HTTP Client
//!
//! [`HttpClient`] wraps a `reqwest` client for calls to other services:
//!
//! - **Retry**: transient outcomes (no response, 5xx, 429) are retried with
//!   exponential backoff, bounded by `max_retries` and `max_elapsed`. A
//!   transient response that is not retried becomes [`HttpError::Status`].
//! - **Circuit breaker**: one per client. A request together with all of its
//!   retries counts as a single outcome. While open, calls fail fast with
//!   [`HttpError::CircuitOpen`].
//! - **Request ids**: every request carries `X-Request-ID`, generated unless
//!   the caller supplies one, and the id is echoed on the [`HttpResponse`].
//!
//! Other 4xx responses are returned as-is; only the `*_json` helpers treat a
//! non-2xx status as an error.
//!
//! ```rust,no_run
//! use resource_sample::httpclient::{HttpClient, HttpClientConfig};
//! use serde_json::Value;
//!
//! # async fn demo() -> Result<(), resource_sample::httpclient::HttpError> {
//! let billing = HttpClient::new(
//!     HttpClientConfig::default()
//!         .with_base_url("http://billing.internal/api/v1")
//!         .with_service_name("billing"),
//! )?;
//! let invoice: Value = billing.get_json("invoices/42", &[]).await?;
//! # let _ = invoice;
//! # Ok(())
//! # }
//! ```

mod breaker;
mod config;

pub use breaker::{BreakerState, CircuitBreaker, Counts, Permit, Rejection};
pub use config::{
    default_should_retry, CircuitBreakerConfig, HttpClientConfig, RetryConfig, RetryPredicate,
    TimeoutConfig, TransportConfig,
};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::field::{display, Empty};
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const BODY_PREVIEW_CHARS: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("{method} {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        method: Method,
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {url} returned {status}")]
    Status {
        method: Method,
        url: String,
        status: u16,
        body: String,
    },

    #[error("circuit breaker {name} is open")]
    CircuitOpen { name: String },

    #[error("circuit breaker {name} is not admitting more trial requests")]
    TooManyRequests { name: String },

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),
}

impl HttpError {
    /// The response status, when the failure carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A fully read response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub request_id: String,
    /// Time spent on the final attempt.
    pub duration: Duration,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(HttpError::Decode)
    }
}

/// One logical request, replayed on every attempt.
struct Call {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    request_id: String,
}

pub struct HttpClient {
    config: HttpClientConfig,
    http: Client,
    base_url: Option<Url>,
    breaker: Option<CircuitBreaker>,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self, HttpError> {
        let base_url = if config.base_url.is_empty() {
            None
        } else {
            Some(parse_url(&config.base_url)?)
        };

        let timeouts = &config.timeouts;
        let transport = &config.transport;
        let idle_per_host = if transport.disable_keep_alives {
            0
        } else {
            transport.max_idle_per_host
        };
        let mut builder = Client::builder()
            .timeout(timeouts.request)
            .connect_timeout(timeouts.connect)
            .tcp_keepalive(timeouts.tcp_keepalive)
            .pool_idle_timeout(timeouts.pool_idle)
            .pool_max_idle_per_host(idle_per_host)
            .default_headers(header_map(&config.default_headers)?);
        if let Some(proxy) = &transport.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy).map_err(HttpError::Build)?);
        }
        let http = builder.build().map_err(HttpError::Build)?;

        let breaker = config
            .circuit_breaker
            .enabled
            .then(|| CircuitBreaker::new(config.circuit_breaker.clone()));

        info!(
            service = %config.service_name,
            base_url = %config.base_url,
            retry = config.retry.enabled,
            breaker = config.circuit_breaker.enabled,
            "HTTP client created"
        );
        Ok(Self {
            config,
            http,
            base_url,
            breaker,
        })
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// `None` when the breaker is disabled.
    pub fn breaker_state(&self) -> Option<BreakerState> {
        self.breaker.as_ref().map(CircuitBreaker::state)
    }

    /// Resolves a request path against the base URL.
    ///
    /// Absolute `http(s)://` URLs pass through. Relative paths are appended to
    /// the base path; a query string in `path` replaces the base query.
    pub fn resolve(&self, path: &str) -> Result<Url, HttpError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return parse_url(path);
        }
        let Some(base) = &self.base_url else {
            return Err(HttpError::InvalidUrl {
                url: path.to_string(),
                reason: "relative path without a base url".into(),
            });
        };
        if path.is_empty() {
            return Ok(base.clone());
        }

        let (relative, query) = match path.split_once('?') {
            Some((relative, query)) => (relative, Some(query)),
            None => (path, None),
        };
        let mut url = base.clone();
        url.set_path(&format!(
            "{}/{}",
            base.path().trim_end_matches('/'),
            relative.trim_start_matches('/')
        ));
        if query.is_some() {
            url.set_query(query);
        }
        Ok(url)
    }

    pub async fn get(&self, path: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, HttpError> {
        self.request(Method::GET, path, None, headers).await
    }

    pub async fn delete(&self, path: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, HttpError> {
        self.request(Method::DELETE, path, None, headers).await
    }

    pub async fn post<B>(&self, path: &str, body: &B, headers: &[(&str, &str)]) -> Result<HttpResponse, HttpError>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(encode(body)?), headers).await
    }

    pub async fn put<B>(&self, path: &str, body: &B, headers: &[(&str, &str)]) -> Result<HttpResponse, HttpError>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, Some(encode(body)?), headers).await
    }

    pub async fn patch<B>(&self, path: &str, body: &B, headers: &[(&str, &str)]) -> Result<HttpResponse, HttpError>
    where
        B: Serialize + ?Sized,
    {
        self.request(Method::PATCH, path, Some(encode(body)?), headers).await
    }

    /// GET and decode a 2xx JSON body.
    pub async fn get_json<T>(&self, path: &str, headers: &[(&str, &str)]) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        let response = self.get(path, headers).await?;
        decode_success(Method::GET, path, response)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B, headers: &[(&str, &str)]) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.post(path, body, headers).await?;
        decode_success(Method::POST, path, response)
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B, headers: &[(&str, &str)]) -> Result<T, HttpError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.put(path, body, headers).await?;
        decode_success(Method::PUT, path, response)
    }

    /// Sends one logical request through the breaker and the retry loop.
    #[instrument(
        name = "http.request",
        skip_all,
        fields(service = %self.config.service_name, method = %method, url = Empty, request_id = Empty, status = Empty, error = Empty)
    )]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpError> {
        let url = self.resolve(path)?;
        let request_id = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(REQUEST_ID_HEADER))
            .map(|(_, value)| value.to_string())
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let mut header_map = HeaderMap::with_capacity(headers.len() + 1);
        for (name, value) in headers {
            let (name, value) = header_pair(name, value)?;
            header_map.insert(name, value);
        }
        let (name, value) = header_pair(REQUEST_ID_HEADER, &request_id)?;
        header_map.insert(name, value);

        let span = Span::current();
        span.record("url", display(&url));
        span.record("request_id", request_id.as_str());
        if self.config.debug {
            if let Some(body) = &body {
                debug!(body = %String::from_utf8_lossy(body), "Request body");
            }
        }

        let call = Call {
            method,
            url,
            headers: header_map,
            body,
            request_id,
        };

        let permit = match &self.breaker {
            Some(breaker) => match breaker.try_acquire() {
                Ok(permit) => Some(permit),
                Err(rejection) => {
                    let name = breaker.name().to_string();
                    let err = match rejection {
                        Rejection::Open => HttpError::CircuitOpen { name },
                        Rejection::TooManyRequests => HttpError::TooManyRequests { name },
                    };
                    span.record("error", display(&err));
                    warn!(error = %err, "Request rejected by circuit breaker");
                    return Err(err);
                }
            },
            None => None,
        };

        let outcome = self.execute_with_retries(&call).await;
        if let (Some(breaker), Some(permit)) = (&self.breaker, permit) {
            breaker.record(permit, outcome.is_ok());
        }

        match &outcome {
            Ok(response) => {
                span.record("status", response.status.as_u16());
                let duration_ms = response.duration.as_millis() as u64;
                if response.status.as_u16() >= 400 {
                    warn!(status = response.status.as_u16(), duration_ms, "Request completed with error status");
                } else {
                    info!(status = response.status.as_u16(), duration_ms, "Request completed");
                }
                if self.config.debug {
                    debug!(body = %response.text(), "Response body");
                }
            }
            Err(err) => {
                if let Some(status) = err.status() {
                    span.record("status", status);
                }
                span.record("error", display(err));
            }
        }
        outcome
    }

    async fn execute_with_retries(&self, call: &Call) -> Result<HttpResponse, HttpError> {
        let retry = &self.config.retry;
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = self.send_once(call, attempt).await;
            let status = outcome.as_ref().ok().map(|response| response.status.as_u16());
            if !(retry.should_retry)(status) {
                return outcome;
            }

            let delay = retry.backoff(attempt);
            let may_retry = retry.enabled
                && attempt <= retry.max_retries
                && started.elapsed() + delay <= retry.max_elapsed;
            if !may_retry {
                if retry.enabled && retry.max_retries > 0 {
                    error!(attempts = attempt, status, "Request failed after all retries");
                }
                return outcome.and_then(|response| Err(status_error(call, response)));
            }

            match &outcome {
                Ok(response) => warn!(
                    attempt,
                    max_attempts = retry.max_retries + 1,
                    status = response.status.as_u16(),
                    delay_ms = delay.as_millis() as u64,
                    "Retrying request after transient status"
                ),
                Err(err) => warn!(
                    attempt,
                    max_attempts = retry.max_retries + 1,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying request after error"
                ),
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_once(&self, call: &Call, attempt: u32) -> Result<HttpResponse, HttpError> {
        let started = Instant::now();
        let transport = |source| HttpError::Transport {
            method: call.method.clone(),
            url: call.url.to_string(),
            attempts: attempt,
            source,
        };

        let mut builder = self
            .http
            .request(call.method.clone(), call.url.clone())
            .headers(call.headers.clone());
        if let Some(body) = &call.body {
            builder = builder.body(body.clone());
        }
        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transport)?.to_vec();

        debug!(attempt, status = status.as_u16(), bytes = body.len(), "Attempt finished");
        Ok(HttpResponse {
            status,
            headers,
            body,
            request_id: call.request_id.clone(),
            duration: started.elapsed(),
        })
    }
}

fn parse_url(raw: &str) -> Result<Url, HttpError> {
    Url::parse(raw).map_err(|e| HttpError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), HttpError> {
    let invalid = |reason: String| HttpError::InvalidHeader {
        name: name.to_string(),
        reason,
    };
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
    Ok((header_name, header_value))
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, HttpError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let (name, value) = header_pair(name, value)?;
        map.insert(name, value);
    }
    Ok(map)
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Vec<u8>, HttpError> {
    serde_json::to_vec(body).map_err(HttpError::Encode)
}

fn body_preview(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(BODY_PREVIEW_CHARS)
        .collect()
}

fn status_error(call: &Call, response: HttpResponse) -> HttpError {
    HttpError::Status {
        method: call.method.clone(),
        url: call.url.to_string(),
        status: response.status.as_u16(),
        body: body_preview(&response.body),
    }
}

fn decode_success<T: DeserializeOwned>(
    method: Method,
    path: &str,
    response: HttpResponse,
) -> Result<T, HttpError> {
    if !response.is_success() {
        return Err(HttpError::Status {
            method,
            url: path.to_string(),
            status: response.status.as_u16(),
            body: body_preview(&response.body),
        });
    }
    response.json()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> HttpClient {
        HttpClient::new(HttpClientConfig::default().with_base_url(base_url)).unwrap()
    }

    #[test]
    fn relative_paths_join_the_base_path() {
        let api = client("http://users.internal:8080/api/v1");
        assert_eq!(api.resolve("users").unwrap().as_str(), "http://users.internal:8080/api/v1/users");
        assert_eq!(api.resolve("/users/7").unwrap().as_str(), "http://users.internal:8080/api/v1/users/7");
        assert_eq!(
            api.resolve("users?limit=5").unwrap().as_str(),
            "http://users.internal:8080/api/v1/users?limit=5"
        );
        assert_eq!(api.resolve("").unwrap().as_str(), "http://users.internal:8080/api/v1");

        let trailing = client("http://users.internal/api/");
        assert_eq!(trailing.resolve("users").unwrap().as_str(), "http://users.internal/api/users");
    }

    #[test]
    fn absolute_urls_pass_through() {
        let api = client("http://users.internal/api");
        assert_eq!(
            api.resolve("https://billing.internal/v2/invoices").unwrap().as_str(),
            "https://billing.internal/v2/invoices"
        );
    }

    #[test]
    fn relative_path_needs_a_base_url() {
        let bare = HttpClient::new(HttpClientConfig::default()).unwrap();
        assert!(matches!(bare.resolve("users"), Err(HttpError::InvalidUrl { .. })));
        assert!(bare.resolve("http://users.internal/users").is_ok());
        assert!(matches!(
            HttpClient::new(HttpClientConfig::default().with_base_url("not a url")),
            Err(HttpError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn bad_default_headers_are_rejected() {
        let config = HttpClientConfig::default().with_default_header("bad header", "x");
        assert!(matches!(HttpClient::new(config), Err(HttpError::InvalidHeader { .. })));
    }

    #[test]
    fn disabled_breaker_has_no_state() {
        let api = HttpClient::new(HttpClientConfig::default().with_circuit_breaker_enabled(false)).unwrap();
        assert_eq!(api.breaker_state(), None);
        assert_eq!(client("http://h").breaker_state(), Some(BreakerState::Closed));
    }
}
