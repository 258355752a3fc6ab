use resource_sample::httpclient::{BreakerState, HttpClient, HttpClientConfig, HttpError};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// --- Scripted upstream ---

/// Answers each connection with the next scripted response; the last one repeats.
struct Upstream {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl Upstream {
    async fn start(script: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            let mut served = 0usize;
            while let Ok((mut stream, _)) = listener.accept().await {
                let raw = read_request(&mut stream).await;
                seen.lock().unwrap().push(raw);
                let (status, body) = script[served.min(script.len() - 1)];
                served += 1;
                let response = format!(
                    "HTTP/1.1 {status} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self {
            base_url: format!("http://{addr}/api"),
            requests,
        }
    }

    fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Raw requests, lowercased.
    fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.to_ascii_lowercase())
            .collect()
    }
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn fast_config(base_url: &str) -> HttpClientConfig {
    let mut config = HttpClientConfig::default()
        .with_base_url(base_url)
        .with_service_name("users");
    config.retry.initial_interval = Duration::from_millis(1);
    config.retry.max_interval = Duration::from_millis(5);
    config
}

// --- Tests ---

#[tokio::test]
async fn test_transient_statuses_are_retried_until_success() {
    let upstream = Upstream::start(vec![(503, "{}"), (429, "{}"), (200, r#"{"id":"u1"}"#)]).await;
    let client = HttpClient::new(fast_config(&upstream.base_url)).unwrap();

    let user: Value = client.get_json("users/u1", &[]).await.expect("Request should recover");
    assert_eq!(user, json!({"id": "u1"}));
    assert_eq!(upstream.hits(), 3);
    assert!(upstream
        .requests()
        .iter()
        .all(|r| r.starts_with("get /api/users/u1 http/1.1")));
    assert_eq!(client.breaker_state(), Some(BreakerState::Closed));
}

#[tokio::test]
async fn test_client_errors_are_returned_without_retry() {
    let upstream = Upstream::start(vec![(404, r#"{"error":"user not found"}"#)]).await;
    let client = HttpClient::new(fast_config(&upstream.base_url)).unwrap();

    let response = client.get("users/missing", &[]).await.expect("404 is a response");
    assert_eq!(response.status.as_u16(), 404);
    assert!(!response.is_success());
    assert_eq!(upstream.hits(), 1);

    // a generated request id is sent and echoed
    assert!(!response.request_id.is_empty());
    assert!(upstream.requests()[0].contains(&format!("x-request-id: {}", response.request_id)));

    let err = client
        .get_json::<Value>("users/missing", &[])
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(upstream.hits(), 2);
}

#[tokio::test]
async fn test_exhausted_retries_surface_the_last_status() {
    let upstream = Upstream::start(vec![(500, r#"{"error":"boom"}"#)]).await;
    let client = HttpClient::new(fast_config(&upstream.base_url).with_max_retries(2)).unwrap();

    let err = client.delete("users/u1", &[]).await.unwrap_err();
    match &err {
        HttpError::Status { status, body, .. } => {
            assert_eq!(*status, 500);
            assert!(body.contains("boom"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(upstream.hits(), 3);
}

#[tokio::test]
async fn test_breaker_opens_and_fails_fast() {
    let upstream = Upstream::start(vec![(502, "{}")]).await;
    let mut config = fast_config(&upstream.base_url).with_retry_enabled(false);
    config.circuit_breaker.min_requests = 2;
    config.circuit_breaker.failure_ratio = 0.5;
    let client = HttpClient::new(config).unwrap();

    for _ in 0..2 {
        let err = client.get("health", &[]).await.unwrap_err();
        assert_eq!(err.status(), Some(502));
    }
    assert_eq!(client.breaker_state(), Some(BreakerState::Open));

    let err = client.get("health", &[]).await.unwrap_err();
    assert!(matches!(err, HttpError::CircuitOpen { ref name } if name == "httpclient-users"));
    assert_eq!(upstream.hits(), 2, "an open breaker never reaches the upstream");
}

#[tokio::test]
async fn test_headers_and_json_body_are_sent() {
    let upstream = Upstream::start(vec![(201, r#"{"id":"u9"}"#)]).await;
    let client = HttpClient::new(
        fast_config(&upstream.base_url).with_default_header("X-Tenant", "acme"),
    )
    .unwrap();

    let response = client
        .post("users", &json!({"name": "Ann"}), &[("X-Request-ID", "req-42")])
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 201);
    assert_eq!(response.request_id, "req-42");
    assert_eq!(response.json::<Value>().unwrap(), json!({"id": "u9"}));

    let sent = &upstream.requests()[0];
    assert!(sent.starts_with("post /api/users http/1.1"));
    assert!(sent.contains("x-tenant: acme"));
    assert!(sent.contains("x-request-id: req-42"));
    assert!(sent.contains("content-type: application/json"));
    assert!(sent.ends_with(r#"{"name":"ann"}"#));
}

#[tokio::test]
async fn test_connection_failures_are_retried_then_reported() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = fast_config(&format!("http://{addr}"))
        .with_max_retries(1)
        .with_circuit_breaker_enabled(false);
    let client = HttpClient::new(config).unwrap();

    match client.get("users", &[]).await {
        Err(HttpError::Transport { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("expected a transport failure, got {other:?}"),
    }
}
