//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use capture_proxy::capture::{EventHub, MemoryCaptureStore};
use capture_proxy::config::ProxyConfig;
use capture_proxy::http::HttpServer;
use capture_proxy::lifecycle::Shutdown;
use capture_proxy::tenant::{Environment, InMemoryTenantStore, Project};

/// Request line and headers as the mock backend received them.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Start a mock backend answering every request with `status`, `content_type`
/// and `body`. Returns the log of requests it received.
pub async fn start_mock_backend(
    addr: SocketAddr,
    status: u16,
    content_type: &'static str,
    body: &'static str,
) -> Arc<Mutex<Vec<SeenRequest>>> {
    let listener = TcpListener::bind(addr).await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let log = log.clone();
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(socket);
                        let Some(request) = read_request(&mut reader).await else {
                            return;
                        };
                        log.lock().push(request);

                        let status_text = match status {
                            200 => "200 OK",
                            201 => "201 Created",
                            304 => "304 Not Modified",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            _ => "200 OK",
                        };
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            content_type,
                            body.len(),
                            body
                        );
                        let mut socket = reader.into_inner();
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    seen
}

async fn read_request(reader: &mut BufReader<tokio::net::TcpStream>) -> Option<SeenRequest> {
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.ok()?;

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            let (k, v) = (k.trim().to_string(), v.trim().to_string());
            if k.eq_ignore_ascii_case("content-length") {
                content_length = v.parse().unwrap_or(0);
            }
            headers.push((k, v));
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await.ok()?;

    Some(SeenRequest {
        request_line: request_line.trim_end().to_string(),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

/// A running proxy with in-memory collaborators.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub captures: MemoryCaptureStore,
    pub events: EventHub,
    pub shutdown: Shutdown,
}

/// Tenant store with one running environment `acme` pointing at `upstream`.
pub fn acme_tenants(upstream: SocketAddr) -> InMemoryTenantStore {
    let tenants = InMemoryTenantStore::new();
    tenants.upsert_environment(Environment {
        id: "env-acme".into(),
        slug: "acme".into(),
        upstream_host: upstream.to_string(),
        use_tls: false,
        project_id: Some("proj-acme".into()),
        api_id: None,
        running: true,
    });
    tenants.upsert_project(Project {
        id: "proj-acme".into(),
        name: "Acme".into(),
    });
    tenants
}

pub async fn start_proxy(proxy_addr: SocketAddr, tenants: InMemoryTenantStore, mut config: ProxyConfig) -> TestProxy {
    config.listener.bind_address = proxy_addr.to_string();
    config.observability.metrics_enabled = false;

    let captures = MemoryCaptureStore::new();
    let events = EventHub::new(64);
    let shutdown = Shutdown::new();
    let (_, config_updates) = mpsc::unbounded_channel();

    let server = HttpServer::with_collaborators(
        config,
        Arc::new(tenants),
        Arc::new(captures.clone()),
        events.clone(),
    );
    let listener = TcpListener::bind(proxy_addr).await.unwrap();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    tokio::time::sleep(Duration::from_millis(200)).await;

    TestProxy {
        addr: proxy_addr,
        captures,
        events,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll until the capture store holds `n` records or the deadline passes.
pub async fn wait_for_captures(store: &MemoryCaptureStore, n: usize) -> bool {
    for _ in 0..50 {
        if store.len() >= n {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
