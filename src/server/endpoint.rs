//! Listening endpoints.
//!
//! An [`Endpoint`] owns one listening socket (TCP or Unix domain), its
//! worker count and keepalive policy, and a busy counter reporting how many
//! of its workers are currently serving a request.

use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

use super::{Error, Result};
use crate::config::EndpointConfig;

/// Configured address of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAddress {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl EndpointAddress {
    /// Address named by `config`.
    ///
    /// # Errors
    ///
    /// Fails unless exactly one of `socket` and `port` is set.
    pub fn from_config(config: &EndpointConfig) -> Result<Self> {
        match (&config.socket, config.port) {
            (Some(path), None) => Ok(Self::Unix(path.clone())),
            (None, Some(port)) => Ok(Self::Tcp {
                host: config.host.clone(),
                port,
            }),
            (Some(_), Some(_)) => Err(Error::Config(
                "endpoint 'socket' and 'port' are mutually exclusive".to_string(),
            )),
            (None, None) => Err(Error::Config(
                "endpoint needs one of 'socket' or 'port'".to_string(),
            )),
        }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Workers currently outside their accept wait.
#[derive(Debug, Default)]
pub struct BusyCounter(AtomicUsize);

impl BusyCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Count the caller as busy until the guard drops.
    pub fn enter(&self) -> BusyGuard<'_> {
        self.0.fetch_add(1, Ordering::AcqRel);
        BusyGuard(self)
    }
}

/// Decrements the owning [`BusyCounter`] on drop.
#[derive(Debug)]
pub struct BusyGuard<'a>(&'a BusyCounter);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An accepted connection.
#[derive(Debug)]
pub enum Transport {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for Transport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[derive(Debug)]
enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// A listening socket with its worker settings.
#[derive(Debug)]
pub struct Endpoint {
    address: EndpointAddress,
    local_addr: Option<SocketAddr>,
    threads: usize,
    keepalive: bool,
    backlog: u32,
    busy: BusyCounter,
    listener: Mutex<Option<Arc<Listener>>>,
}

impl Endpoint {
    /// Bind and listen. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] when the socket cannot be opened; this is
    /// never retried.
    pub fn open(config: &EndpointConfig) -> Result<Self> {
        let address = EndpointAddress::from_config(config)?;
        if config.threads == 0 {
            return Err(Error::Config(format!("endpoint {address}: threads must be greater than 0")));
        }
        let backlog = i32::try_from(config.backlog).unwrap_or(i32::MAX);

        let (listener, local_addr) = match &address {
            EndpointAddress::Tcp { host, port } => {
                let listener = bind_tcp(host, *port, backlog).map_err(|e| Error::bind(address.to_string(), e))?;
                let local = listener.local_addr().ok();
                (Listener::Tcp(listener), local)
            },
            #[cfg(unix)]
            EndpointAddress::Unix(path) => {
                let listener = bind_unix(path, backlog).map_err(|e| Error::bind(address.to_string(), e))?;
                (Listener::Unix(listener), None)
            },
            #[cfg(not(unix))]
            EndpointAddress::Unix(_) => {
                return Err(Error::bind(
                    address.to_string(),
                    io::Error::new(io::ErrorKind::Unsupported, "unix sockets are not supported"),
                ));
            },
        };

        tracing::info!(
            endpoint = %address,
            threads = config.threads,
            keepalive = config.keepalive,
            backlog = config.backlog,
            "Endpoint listening"
        );

        Ok(Self {
            address,
            local_addr,
            threads: config.threads,
            keepalive: config.keepalive,
            backlog: config.backlog,
            busy: BusyCounter::default(),
            listener: Mutex::new(Some(Arc::new(listener))),
        })
    }

    /// Wait for the next connection.
    ///
    /// Fails with `NotConnected` once the endpoint has been closed.
    pub async fn accept(&self) -> io::Result<Transport> {
        let listener = self
            .listener
            .lock()
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "endpoint is closed"))?;
        match listener.as_ref() {
            Listener::Tcp(l) => {
                let (stream, _) = l.accept().await?;
                stream.set_nodelay(true)?;
                Ok(Transport::Tcp(stream))
            },
            #[cfg(unix)]
            Listener::Unix(l) => {
                let (stream, _) = l.accept().await?;
                Ok(Transport::Unix(stream))
            },
        }
    }

    /// Stop listening. The socket closes once no pending accept holds it.
    pub fn close(&self) {
        if self.listener.lock().take().is_some() {
            tracing::debug!(endpoint = %self, "Endpoint closed");
            self.remove_socket_file();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.listener.lock().is_none()
    }

    fn remove_socket_file(&self) {
        if let EndpointAddress::Unix(path) = &self.address {
            let _ = std::fs::remove_file(path);
        }
    }

    pub const fn address(&self) -> &EndpointAddress {
        &self.address
    }

    /// Bound TCP address; differs from the configured one for port 0.
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub const fn threads(&self) -> usize {
        self.threads
    }

    pub const fn keepalive(&self) -> bool {
        self.keepalive
    }

    pub const fn backlog(&self) -> u32 {
        self.backlog
    }

    pub fn busy(&self) -> usize {
        self.busy.get()
    }

    /// Mark one worker busy until the guard drops.
    pub fn enter_busy(&self) -> BusyGuard<'_> {
        self.busy.enter()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.local_addr {
            Some(addr) => write!(f, "{addr}"),
            None => write!(f, "{}", self.address),
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if self.listener.get_mut().is_some() {
            self.remove_socket_file();
        }
    }
}

fn bind_tcp(host: &str, port: u16, backlog: i32) -> io::Result<TcpListener> {
    let addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no socket addresses found"))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;

    let listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(listener)
}

#[cfg(unix)]
fn bind_unix(path: &std::path::Path, backlog: i32) -> io::Result<UnixListener> {
    use std::os::unix::fs::FileTypeExt;

    // A socket file left behind by a previous run would make bind fail.
    // One that still accepts connections belongs to a live listener.
    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if meta.file_type().is_socket() {
            match std::os::unix::net::UnixStream::connect(path) {
                Ok(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        "another process is listening on this socket",
                    ));
                },
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => std::fs::remove_file(path)?,
                Err(e) => return Err(e),
            }
        }
    }

    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.bind(&socket2::SockAddr::unix(path)?)?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;

    let listener: std::os::unix::net::UnixListener = socket.into();
    UnixListener::from_std(listener)
}

/// Bind the monitor socket.
pub(crate) fn bind_monitor(host: &str, port: u16) -> Result<TcpListener> {
    bind_tcp(host, port, 128).map_err(|e| Error::bind(format!("monitor {host}:{port}"), e))
}
