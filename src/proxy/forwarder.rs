//! Local proxy forwarder
//!
//! A local HTTP proxy that forwards to an authenticated upstream proxy.
//! Chrome cannot pass inline proxy credentials, so it connects to
//! localhost without auth and the forwarder injects the
//! Proxy-Authorization header upstream.
//!
//! The upstream is swappable while the forwarder runs: each accepted
//! connection snapshots the current upstream, so replacing it redirects
//! all subsequent traffic without restarting Chrome.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::SessionCredentials;

/// Port range for local proxy forwarders (18080..48080)
const PORT_BASE: u32 = 18080;
const PORT_RANGE: u32 = 30000;

/// Global port counter for allocating unique local ports
static PORT_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Allocate a unique local port, wrapping within 18080..48080.
pub fn allocate_port() -> u16 {
    let offset = PORT_COUNTER.fetch_add(1, Ordering::Relaxed) % PORT_RANGE;
    (PORT_BASE + offset) as u16
}

/// Max number of headers to read from a single request/response
const MAX_HEADERS: usize = 100;
/// Max size of a single header line (8KB)
const MAX_HEADER_LINE: usize = 8192;

/// Upstream endpoint with its auth header, replaced wholesale on swap.
#[derive(Debug, Clone)]
struct Upstream {
    host: String,
    port: u16,
    auth_header: String,
}

fn auth_header(username: &str, password: &str) -> String {
    let credentials = format!("{}:{}", username, password);
    let encoded = base64::engine::general_purpose::STANDARD.encode(credentials.as_bytes());
    format!("Basic {}", encoded)
}

/// Local forwarding proxy with a swappable authenticated upstream.
pub struct LocalProxyForwarder {
    local_port: u16,
    upstream: Arc<RwLock<Upstream>>,
    running: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl LocalProxyForwarder {
    pub fn new(local_port: u16, credentials: &SessionCredentials) -> Self {
        Self {
            local_port,
            upstream: Arc::new(RwLock::new(Upstream {
                host: credentials.host.clone(),
                port: credentials.port,
                auth_header: auth_header(&credentials.username, &credentials.password),
            })),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Create a forwarder with an auto-allocated port
    pub fn with_auto_port(credentials: &SessionCredentials) -> Self {
        Self::new(allocate_port(), credentials)
    }

    /// Local proxy URL for Chrome
    pub fn local_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.local_port)
    }

    pub fn port(&self) -> u16 {
        self.local_port
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Replace the upstream session. Existing tunnels keep their old
    /// upstream; every new connection uses the replacement.
    pub fn set_upstream(&self, credentials: &SessionCredentials) {
        let mut upstream = self.upstream.write();
        *upstream = Upstream {
            host: credentials.host.clone(),
            port: credentials.port,
            auth_header: auth_header(&credentials.username, &credentials.password),
        };
        info!(
            "Forwarder upstream swapped to sessid {}",
            credentials.session_id
        );
    }

    /// Start the accept loop. Idempotent while running.
    pub async fn start(&self) -> Result<(), std::io::Error> {
        if self.running.load(Ordering::Relaxed) {
            return Ok(());
        }

        let addr = format!("127.0.0.1:{}", self.local_port);
        let listener = TcpListener::bind(&addr).await?;

        info!("Local proxy forwarder started on {}", addr);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        self.running.store(true, Ordering::Relaxed);

        let running = self.running.clone();
        let upstream = self.upstream.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Local proxy forwarder shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, addr)) => {
                                debug!("Accepted connection from {}", addr);
                                // Snapshot so a mid-connection swap cannot
                                // split one tunnel across two upstreams
                                let target = upstream.read().clone();

                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, target).await {
                                        warn!("Connection error: {}", e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Accept error: {}", e);
                            }
                        }
                    }
                }
            }

            running.store(false, Ordering::Relaxed);
        });

        Ok(())
    }

    /// Stop the accept loop.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        self.running.store(false, Ordering::Relaxed);
        info!("Local proxy forwarder stopped on port {}", self.local_port);
    }
}

impl Drop for LocalProxyForwarder {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    client: TcpStream,
    upstream: Upstream,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut client = BufReader::new(client);

    let mut request_line = String::new();
    let bytes_read = client.read_line(&mut request_line).await?;

    if bytes_read == 0 {
        return Err("Connection closed before request".into());
    }

    debug!("Received request: {}", request_line.trim());

    let parts: Vec<&str> = request_line.trim().split_whitespace().collect();
    if parts.len() < 2 {
        return Err(format!("Invalid HTTP request line: {}", request_line.trim()).into());
    }

    let method = parts[0];
    let target = parts[1];

    // Read all headers (bounded to prevent memory exhaustion)
    let mut headers = Vec::new();
    for _ in 0..MAX_HEADERS {
        let mut line = String::with_capacity(256);
        let n = client.read_line(&mut line).await?;
        if n == 0 || line == "\r\n" || line == "\n" {
            break;
        }
        if line.len() > MAX_HEADER_LINE {
            return Err("Header line too long".into());
        }
        headers.push(line);
    }

    if method == "CONNECT" {
        handle_connect(client, target, &upstream, &request_line).await
    } else {
        handle_http(client, &upstream, &request_line, headers).await
    }
}

/// Handle CONNECT request (HTTPS tunneling)
async fn handle_connect(
    client: BufReader<TcpStream>,
    target: &str,
    upstream: &Upstream,
    request_line: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    debug!(
        "CONNECT tunnel to {} via {}:{}",
        target, upstream.host, upstream.port
    );

    let upstream_addr = format!("{}:{}", upstream.host, upstream.port);
    let connect_request = format!(
        "{}\r\nHost: {}\r\nProxy-Authorization: {}\r\nProxy-Connection: keep-alive\r\n\r\n",
        request_line.trim(),
        target,
        upstream.auth_header
    );

    // Retry loop for transient upstream errors (e.g. 522 gateway timeouts)
    let max_retries = 2u32;
    let mut conn_established: Option<TcpStream> = None;
    let mut last_error_response = String::new();
    let mut last_error_headers: Vec<String> = Vec::new();

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff_ms = if attempt == 1 { 200 } else { 400 };
            warn!(
                "CONNECT retry {}/{} for {} after {}ms backoff",
                attempt, max_retries, target, backoff_ms
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }

        let mut conn = match tokio::time::timeout(
            Duration::from_secs(10),
            TcpStream::connect(&upstream_addr),
        )
        .await
        {
            Ok(Ok(c)) => c,
            Ok(Err(e)) => {
                warn!("CONNECT attempt {} failed to connect: {}", attempt + 1, e);
                continue;
            }
            Err(_) => {
                warn!(
                    "CONNECT attempt {} timed out connecting to {}",
                    attempt + 1,
                    upstream_addr
                );
                continue;
            }
        };

        if conn.write_all(connect_request.as_bytes()).await.is_err() {
            continue;
        }
        if conn.flush().await.is_err() {
            continue;
        }

        let mut upstream_reader = BufReader::new(&mut conn);
        let mut response_line = String::new();
        if upstream_reader.read_line(&mut response_line).await.is_err() {
            continue;
        }

        debug!("Upstream proxy response: {}", response_line.trim());

        // Drain remaining response headers (bounded)
        let mut response_headers = Vec::new();
        let mut header_err = false;
        for _ in 0..MAX_HEADERS {
            let mut line = String::with_capacity(256);
            match upstream_reader.read_line(&mut line).await {
                Ok(n) => {
                    if n == 0 || line == "\r\n" || line == "\n" {
                        break;
                    }
                    if line.len() > MAX_HEADER_LINE {
                        header_err = true;
                        break;
                    }
                    response_headers.push(line);
                }
                Err(_) => {
                    header_err = true;
                    break;
                }
            }
        }
        if header_err {
            continue;
        }

        if response_line.contains("200") {
            conn_established = Some(conn);
            break;
        }

        // 522 means the upstream timed out reaching the exit node
        let is_522 = response_line.contains("522");
        if is_522 && attempt < max_retries {
            warn!(
                "Proxy CONNECT got 522 (attempt {}), will retry: {}",
                attempt + 1,
                response_line.trim()
            );
            drop(conn);
            continue;
        }

        error!("Proxy CONNECT failed: {}", response_line.trim());
        last_error_response = response_line;
        last_error_headers = response_headers;
        break;
    }

    // No upstream; forward the error to the client and bail
    let upstream_conn = match conn_established {
        Some(u) => u,
        None => {
            let mut client_stream = client.into_inner();
            if !last_error_response.is_empty() {
                client_stream
                    .write_all(last_error_response.as_bytes())
                    .await?;
                for header in &last_error_headers {
                    client_stream.write_all(header.as_bytes()).await?;
                }
                client_stream.write_all(b"\r\n").await?;
                client_stream.flush().await?;
                return Err(format!(
                    "Upstream proxy rejected CONNECT: {}",
                    last_error_response.trim()
                )
                .into());
            }
            return Err(format!(
                "Failed to establish CONNECT tunnel to {} after {} retries",
                target, max_retries
            )
            .into());
        }
    };

    let mut client_stream = client.into_inner();
    client_stream
        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
        .await?;
    client_stream.flush().await?;

    debug!("CONNECT tunnel established for {}", target);

    tunnel(client_stream, upstream_conn).await;

    debug!("CONNECT tunnel closed for {}", target);
    Ok(())
}

/// Handle regular HTTP request (GET, POST, etc.)
async fn handle_http(
    client: BufReader<TcpStream>,
    upstream: &Upstream,
    request_line: &str,
    headers: Vec<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    debug!("HTTP request: {}", request_line.trim());

    let upstream_addr = format!("{}:{}", upstream.host, upstream.port);
    let mut upstream_conn =
        tokio::time::timeout(Duration::from_secs(10), TcpStream::connect(&upstream_addr))
            .await
            .map_err(|_| format!("Timeout connecting to upstream proxy {}", upstream_addr))?
            .map_err(|e| format!("Failed to connect to upstream proxy {}: {}", upstream_addr, e))?;

    // Re-emit the request with the auth header injected
    let mut request = String::new();
    request.push_str(request_line);
    request.push_str(&format!(
        "Proxy-Authorization: {}\r\n",
        upstream.auth_header
    ));
    for header in &headers {
        request.push_str(header);
    }
    request.push_str("\r\n");

    upstream_conn.write_all(request.as_bytes()).await?;
    upstream_conn.flush().await?;

    tunnel(client.into_inner(), upstream_conn).await;

    Ok(())
}

/// Copy bytes in both directions until either side closes.
async fn tunnel(client: TcpStream, upstream: TcpStream) {
    let (mut client_read, mut client_write) = client.into_split();
    let (mut upstream_read, mut upstream_write) = upstream.into_split();

    let mut client_to_upstream = tokio::spawn(async move {
        let mut buf = vec![0u8; 8192];
        loop {
            match client_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if upstream_write.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                    if upstream_write.flush().await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut upstream_to_client = tokio::spawn(async move {
        let mut buf = vec![0u8; 8192];
        loop {
            match upstream_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if client_write.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                    if client_write.flush().await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    // Either direction closing ends the tunnel; the short sleep lets
    // the peer socket flush before teardown
    tokio::select! {
        _ = &mut client_to_upstream => {
            upstream_to_client.abort();
            tokio::time::sleep(Duration::from_millis(50)).await;
        },
        _ = &mut upstream_to_client => {
            client_to_upstream.abort();
            tokio::time::sleep(Duration::from_millis(50)).await;
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(username: &str, password: &str) -> SessionCredentials {
        SessionCredentials {
            username: username.to_string(),
            password: password.to_string(),
            host: "proxy.example.com".to_string(),
            port: 8080,
            session_id: 1,
        }
    }

    #[test]
    fn test_port_allocation() {
        let port1 = allocate_port();
        let port2 = allocate_port();
        assert_ne!(port1, port2);
        assert!(port2 > port1);
    }

    #[test]
    fn test_auth_header() {
        // "user:pass" in base64 is "dXNlcjpwYXNz"
        let header = auth_header("user", "pass");
        assert!(header.starts_with("Basic "));
        assert!(header.contains("dXNlcjpwYXNz"));
    }

    #[test]
    fn test_local_url() {
        let forwarder = LocalProxyForwarder::new(18080, &credentials("user", "pass"));
        assert_eq!(forwarder.local_url(), "http://127.0.0.1:18080");
    }

    #[test]
    fn test_set_upstream_replaces_endpoint() {
        let forwarder = LocalProxyForwarder::new(18081, &credentials("user", "pass"));
        let mut replacement = credentials("user2", "pass2");
        replacement.host = "other.example.com".to_string();
        replacement.port = 9090;

        forwarder.set_upstream(&replacement);

        let upstream = forwarder.upstream.read();
        assert_eq!(upstream.host, "other.example.com");
        assert_eq!(upstream.port, 9090);
        assert_eq!(upstream.auth_header, auth_header("user2", "pass2"));
    }

    #[tokio::test]
    async fn test_start_binds_and_stop_clears_running() {
        let forwarder = LocalProxyForwarder::with_auto_port(&credentials("user", "pass"));
        forwarder.start().await.unwrap();
        assert!(forwarder.is_running());
        forwarder.stop();
        assert!(!forwarder.is_running());
    }
}
