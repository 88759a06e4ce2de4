//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use edge_dev_router::config::{ReloadMode, RouterConfig};
use edge_dev_router::http::{HttpServer, StatusOverrides};
use edge_dev_router::lifecycle::Shutdown;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Parsed request head as seen by a mock backend.
pub struct SeenRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

async fn read_head(socket: &mut TcpStream) -> Option<SeenRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let mut lines = head.split("\r\n");
            let mut request_line = lines.next()?.split(' ');
            let method = request_line.next()?.to_string();
            let target = request_line.next()?.to_string();
            let headers = lines
                .filter_map(|line| line.split_once(':'))
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .collect();
            return Some(SeenRequest {
                method,
                target,
                headers,
            });
        }
    }
}

async fn respond(socket: &mut TcpStream, status: &str, headers: &[(&str, String)], body: &str) {
    let mut response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        body.len()
    );
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.push_str(body);
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Function backend mock.
///
/// Answers `<METHOD> <target>` and echoes the forwarding headers it received.
/// Paths under `/api/slow` answer after three seconds.
pub async fn start_function_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Some(req) = read_head(&mut socket).await else {
                    return;
                };
                if req.target.starts_with("/api/slow") {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                }
                let echo = |name: &str| req.header(name).unwrap_or("").to_string();
                let headers = [
                    ("X-Backend", "function".to_string()),
                    ("X-Powered-By", "function".to_string()),
                    ("X-Echo-Host", echo("host")),
                    ("X-Echo-Forwarded-Host", echo("x-forwarded-host")),
                    ("X-Echo-Forwarded-For", echo("x-forwarded-for")),
                ];
                let body = format!("{} {}", req.method, req.target);
                respond(&mut socket, "200 OK", &headers, &body).await;
            });
        }
    });
    addr
}

/// UI backend mock.
///
/// Answers `200 ui <target>` for every request, and accepts `Upgrade`
/// requests with a 101 followed by a byte echo.
pub async fn start_ui_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Some(req) = read_head(&mut socket).await else {
                    return;
                };
                if req.header("upgrade").is_some() {
                    let head = "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\n";
                    if socket.write_all(head.as_bytes()).await.is_err() {
                        return;
                    }
                    let (mut reader, mut writer) = socket.split();
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                    return;
                }
                let headers = [
                    ("X-Backend", "ui".to_string()),
                    ("Content-Type", "text/html".to_string()),
                ];
                let body = format!("ui {}", req.target);
                respond(&mut socket, "200 OK", &headers, &body).await;
            });
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Create a project root with the given files under it.
pub fn function_tree(files: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for file in files {
        add_file(dir.path(), file);
    }
    dir
}

pub fn add_file(root: &Path, file: &str) {
    let path = root.join(file);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "module.exports = () => {}\n").unwrap();
}

/// Router config pointing at the given backends and project root.
pub fn config(root: &Path, function: SocketAddr, ui: SocketAddr) -> RouterConfig {
    let mut config = RouterConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.backends.function = function.to_string();
    config.backends.ui = ui.to_string();
    config.functions.root_dir = root.display().to_string();
    config.functions.reload = ReloadMode::PerRequest;
    config.timeouts.connect_secs = 1;
    config.timeouts.backend_secs = 2;
    config
}

/// A router running on an ephemeral port.
pub struct TestRouter {
    pub addr: SocketAddr,
    pub overrides: StatusOverrides,
    shutdown: Shutdown,
}

impl TestRouter {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestRouter {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_router(config: RouterConfig) -> TestRouter {
    let server = HttpServer::new(&config).unwrap();
    let overrides = server.overrides();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    TestRouter {
        addr,
        overrides,
        shutdown,
    }
}

/// HTTP client that reports redirects instead of following them.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
