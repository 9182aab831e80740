//! Common test utilities for integration tests.
//!
//! Provides:
//! - `TestContainer` - a real `Server` on an ephemeral port, built from
//!   handlers and filters registered in the test
//! - `FcgiClient` - a minimal FastCGI client speaking to it
//! - `TestRequest` / `FcgiResponse` - what the client sends and receives
//!
//! # Example
//!
//! ```rust,ignore
//! #[tokio::test]
//! async fn test_ping() {
//!     let container = TestContainer::builder()
//!         .route("/ping", "ping")
//!         .start()
//!         .await
//!         .unwrap();
//!
//!     let resp = container.send(TestRequest::get("/ping")).await.unwrap();
//!     assert_eq!(resp.status, 200);
//!     assert_eq!(resp.body, b"pong");
//! }
//! ```

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use fcgi_container::components::ComponentRegistry;
use fcgi_container::config::{ContainerConfig, EndpointConfig, FilterConfig, HandlerConfig};
use fcgi_container::fcgi::protocol::{KEEP_CONN, RESPONDER, RecordHeader, RecordType, nv};
use fcgi_container::handler::{Filter, Handler};
use fcgi_container::server::Server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default timeout for a single request in tests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Requests and responses
// =============================================================================

/// A request as the web server would forward it.
#[derive(Debug, Clone)]
pub struct TestRequest {
    pub method: String,
    pub script: String,
    pub query: String,
    pub body: Vec<u8>,
    pub params: Vec<(String, String)>,
}

impl TestRequest {
    pub fn get(script: &str) -> Self {
        Self {
            method: "GET".to_string(),
            script: script.to_string(),
            query: String::new(),
            body: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn post(script: &str, body: &[u8]) -> Self {
        Self {
            method: "POST".to_string(),
            body: body.to_vec(),
            ..Self::get(script)
        }
    }

    pub fn query(mut self, query: &str) -> Self {
        self.query = query.to_string();
        self
    }

    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    /// CGI variables in the order a web server sends them.
    fn cgi_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if !self.method.is_empty() {
            params.push(("REQUEST_METHOD".to_string(), self.method.clone()));
        }
        params.push(("SCRIPT_NAME".to_string(), self.script.clone()));
        params.push(("QUERY_STRING".to_string(), self.query.clone()));
        params.push(("REMOTE_ADDR".to_string(), "127.0.0.1".to_string()));
        if !self.body.is_empty() {
            params.push(("CONTENT_LENGTH".to_string(), self.body.len().to_string()));
        }
        params.extend(self.params.iter().cloned());
        params
    }
}

/// A decoded CGI response.
#[derive(Debug, Clone)]
pub struct FcgiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl FcgiResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn parse(stdout: &[u8]) -> io::Result<Self> {
        let split = stdout
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or_else(|| invalid("response has no header terminator"))?;
        let head = std::str::from_utf8(&stdout[..split]).map_err(|_| invalid("header is not UTF-8"))?;

        let mut status = 200;
        let mut headers = Vec::new();
        for line in head.split("\r\n") {
            let (name, value) = line.split_once(": ").ok_or_else(|| invalid("bad header line"))?;
            if name.eq_ignore_ascii_case("Status") {
                status = value
                    .split(' ')
                    .next()
                    .and_then(|code| code.parse().ok())
                    .ok_or_else(|| invalid("bad status line"))?;
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        Ok(Self {
            status,
            headers,
            body: stdout[split + 4..].to_vec(),
        })
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

// =============================================================================
// FastCGI client
// =============================================================================

/// Frame one record, padded as the application pads its own.
pub fn record(rtype: RecordType, id: u16, content: &[u8]) -> Vec<u8> {
    let header = RecordHeader::new(rtype, id, content.len());
    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(content);
    out.extend(std::iter::repeat_n(0u8, usize::from(header.padding_length)));
    out
}

/// BEGIN_REQUEST + PARAMS + STDIN for one request.
pub fn encode_request(id: u16, request: &TestRequest, keep_conn: bool) -> Vec<u8> {
    let role = RESPONDER.to_be_bytes();
    let flags = if keep_conn { KEEP_CONN } else { 0 };
    let mut out = record(RecordType::BeginRequest, id, &[role[0], role[1], flags, 0, 0, 0, 0, 0]);

    let mut params = Vec::new();
    for (name, value) in request.cgi_params() {
        nv::write_pair(&mut params, name.as_bytes(), value.as_bytes()).unwrap();
    }
    for chunk in params.chunks(65535) {
        out.extend(record(RecordType::Params, id, chunk));
    }
    out.extend(record(RecordType::Params, id, &[]));

    for chunk in request.body.chunks(65535) {
        out.extend(record(RecordType::Stdin, id, chunk));
    }
    out.extend(record(RecordType::Stdin, id, &[]));
    out
}

/// One FastCGI connection to a container.
pub struct FcgiClient {
    stream: TcpStream,
    next_id: u16,
}

impl FcgiClient {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, next_id: 1 })
    }

    /// Send a request without waiting for the response.
    pub async fn begin(&mut self, request: &TestRequest, keep_conn: bool) -> io::Result<u16> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.stream.write_all(&encode_request(id, request, keep_conn)).await?;
        Ok(id)
    }

    /// Read STDOUT records until END_REQUEST for `id`.
    pub async fn finish(&mut self, id: u16) -> io::Result<FcgiResponse> {
        let mut stdout = Vec::new();
        loop {
            let mut head = [0u8; 8];
            self.stream.read_exact(&mut head).await?;
            let header = RecordHeader::from_bytes(&head).map_err(|e| invalid(&e.to_string()))?;
            let mut content =
                vec![0u8; usize::from(header.content_length) + usize::from(header.padding_length)];
            self.stream.read_exact(&mut content).await?;
            content.truncate(usize::from(header.content_length));

            if header.request_id != id {
                continue;
            }
            match RecordType::from_u8(header.rtype) {
                Some(RecordType::Stdout) => stdout.extend_from_slice(&content),
                Some(RecordType::EndRequest) => return FcgiResponse::parse(&stdout),
                _ => {},
            }
        }
    }

    /// Send `request` and wait for its response.
    pub async fn send(&mut self, request: &TestRequest, keep_conn: bool) -> io::Result<FcgiResponse> {
        let id = self.begin(request, keep_conn).await?;
        tokio::time::timeout(REQUEST_TIMEOUT, self.finish(id))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no response"))?
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await
    }

    /// True once the server has closed its side.
    pub async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 1];
        matches!(
            tokio::time::timeout(Duration::from_secs(2), self.stream.read(&mut buf)).await,
            Ok(Ok(0) | Err(_))
        )
    }
}

/// Send one request on a fresh connection.
pub async fn request(addr: SocketAddr, request: TestRequest) -> io::Result<FcgiResponse> {
    let mut client = FcgiClient::connect(addr).await?;
    client.send(&request, false).await
}

// =============================================================================
// Test container
// =============================================================================

/// A running container on `127.0.0.1:<ephemeral>`.
pub struct TestContainer {
    pub server: Server,
    pub addr: SocketAddr,
}

impl TestContainer {
    pub fn builder() -> TestContainerBuilder {
        TestContainerBuilder::new()
    }

    pub async fn send(&self, request: TestRequest) -> io::Result<FcgiResponse> {
        self::request(self.addr, request).await
    }

    pub fn monitor_addr(&self) -> SocketAddr {
        self.server.monitor_addr().expect("monitor not enabled")
    }

    pub async fn shutdown(&self) {
        self.server.stop().expect("stop failed");
        tokio::time::timeout(Duration::from_secs(10), self.server.join())
            .await
            .expect("join timed out")
            .expect("join failed");
    }
}

/// Builder for [`TestContainer`].
pub struct TestContainerBuilder {
    config: ContainerConfig,
    components: ComponentRegistry,
}

impl TestContainerBuilder {
    pub fn new() -> Self {
        let mut config = ContainerConfig::default();
        config
            .endpoints
            .push(EndpointConfig::tcp(0).host("127.0.0.1").threads(2));
        Self {
            config,
            components: ComponentRegistry::with_builtins(),
        }
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.config.endpoints[0].threads = threads;
        self
    }

    pub fn keepalive(mut self, keepalive: bool) -> Self {
        self.config.endpoints[0].keepalive = keepalive;
        self
    }

    /// Enable the monitor on an ephemeral port.
    pub fn monitor(mut self) -> Self {
        self.config.daemon.monitor_port = Some(0);
        self.config.daemon.monitor_host = "127.0.0.1".to_string();
        self
    }

    /// Bind `path` to a chain of registered component names.
    pub fn chain(mut self, path: &str, names: &[&str]) -> Self {
        self.config.handlers.push(HandlerConfig {
            path: path.to_string(),
            handlers: names.iter().map(ToString::to_string).collect(),
        });
        self
    }

    /// Bind `path` to a single registered component.
    pub fn route(self, path: &str, name: &str) -> Self {
        self.chain(path, &[name])
    }

    /// Register `handler` under `name` and bind it to `path`.
    pub fn handler(mut self, path: &str, name: &str, handler: impl Handler + 'static) -> Self {
        self.components.register_handler(name, handler);
        self.route(path, name)
    }

    /// Register `filter` under `name` for requests matching `path`.
    pub fn filter(mut self, path: &str, name: &str, filter: impl Filter + 'static) -> Self {
        self.components.register_filter(name, filter);
        self.config.filters.push(FilterConfig {
            component: name.to_string(),
            path: path.to_string(),
        });
        self
    }

    /// Adjust the configuration directly.
    pub fn configure(mut self, f: impl FnOnce(&mut ContainerConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn components(mut self, f: impl FnOnce(&mut ComponentRegistry)) -> Self {
        f(&mut self.components);
        self
    }

    pub async fn start(self) -> anyhow::Result<TestContainer> {
        let server = Server::new(self.config, self.components);
        server.start().await?;
        let addr = server.endpoints()[0]
            .local_addr()
            .ok_or_else(|| anyhow::anyhow!("endpoint has no TCP address"))?;
        Ok(TestContainer { server, addr })
    }
}

impl Default for TestContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
