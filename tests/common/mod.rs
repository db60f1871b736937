#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use vllm_soak_tester::config::{RunConfig, RunConfigBuilder};
use vllm_soak_tester::iteration::Timing;

/// Harness timing shrunk so scenario tests finish in milliseconds.
pub fn fast_timing() -> Timing {
    Timing {
        poll_interval: Duration::from_millis(50),
        soak_probe_interval: Duration::from_millis(50),
        request_timeout: Duration::from_secs(1),
        drain_grace: Duration::from_millis(200),
    }
}

/// Config preset with short waits; tests override what they exercise.
pub fn config_builder(log_dir: &Path, port: u16) -> RunConfigBuilder {
    RunConfig::builder("/data/models/test-model", "test-model")
        .host_port(port)
        .iterations(1)
        .startup_timeout(Duration::from_secs(5))
        .soak_duration(Duration::from_millis(100))
        .cooldown(Duration::from_millis(10))
        .log_dir(log_dir)
}

/// A port nothing listens on, for connection-refused probe paths.
pub async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind probe port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

struct ServerState {
    readiness_requests: AtomicUsize,
    metrics_requests: AtomicUsize,
    /// Readiness requests answered 503 before the listing is served.
    ready_after: AtomicUsize,
    /// Metrics requests answered 200 before the endpoint goes dark
    /// (usize::MAX = stays up).
    metrics_down_after: AtomicUsize,
    valid_listing: AtomicBool,
}

/// Minimal canned stand-in for the inference service's two HTTP surfaces.
pub struct MockModelServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    accept_loop: tokio::task::JoinHandle<()>,
}

impl MockModelServer {
    /// `ready_after` readiness requests fail with 503 before the model
    /// listing is served; metrics serve 200 from the first request.
    pub async fn start(ready_after: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(ServerState {
            readiness_requests: AtomicUsize::new(0),
            metrics_requests: AtomicUsize::new(0),
            ready_after: AtomicUsize::new(ready_after),
            metrics_down_after: AtomicUsize::new(usize::MAX),
            valid_listing: AtomicBool::new(true),
        });

        let accept_state = Arc::clone(&state);
        let accept_loop = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let state = Arc::clone(&accept_state);
                drop(tokio::spawn(serve_connection(socket, state)));
            }
        });

        Self {
            addr,
            state,
            accept_loop,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn readiness_requests(&self) -> usize {
        self.state.readiness_requests.load(Ordering::SeqCst)
    }

    pub fn metrics_requests(&self) -> usize {
        self.state.metrics_requests.load(Ordering::SeqCst)
    }

    pub fn set_valid_listing(&self, valid: bool) {
        self.state.valid_listing.store(valid, Ordering::SeqCst);
    }

    pub fn set_metrics_down_after(&self, requests: usize) {
        self.state
            .metrics_down_after
            .store(requests, Ordering::SeqCst);
    }
}

impl Drop for MockModelServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve_connection(mut socket: tokio::net::TcpStream, state: Arc<ServerState>) {
    let mut buf = vec![0u8; 2048];
    let Ok(n) = socket.read(&mut buf).await else {
        return;
    };
    let request = String::from_utf8_lossy(&buf[..n]).to_string();

    let response = if request.starts_with("GET /metrics") {
        let served = state.metrics_requests.fetch_add(1, Ordering::SeqCst);
        if served < state.metrics_down_after.load(Ordering::SeqCst) {
            http_response(
                200,
                "text/plain",
                "# TYPE vllm:num_requests_running gauge\nvllm:num_requests_running 0\n",
            )
        } else {
            http_response(503, "text/plain", "unavailable")
        }
    } else if request.starts_with("GET /v1/models") {
        let served = state.readiness_requests.fetch_add(1, Ordering::SeqCst);
        if served < state.ready_after.load(Ordering::SeqCst) {
            http_response(503, "text/plain", "model loading")
        } else if state.valid_listing.load(Ordering::SeqCst) {
            http_response(
                200,
                "application/json",
                r#"{"object":"list","data":[{"id":"test-model","object":"model"}]}"#,
            )
        } else {
            http_response(200, "application/json", "this is not a model listing")
        }
    } else {
        http_response(404, "text/plain", "not found")
    };

    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn http_response(status: u16, content_type: &str, body: &str) -> String {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "OK",
    };
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}
