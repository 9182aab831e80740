//! Monitor sub-protocol.
//!
//! The monitor listens on its own TCP socket. A client connects and sends a
//! single command byte:
//!
//! - `i` / `I`: the status document is written back
//! - `s` / `S`: the server is asked to stop
//!
//! Anything else closes the connection without a reply. Every connection
//! is closed after one command.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinSet;

use super::Result;
use super::quiescence::Stopper;
use crate::constants::{MONITOR_BUFFER_SIZE, MONITOR_READ_TIMEOUT_MS};

/// What the monitor can ask of the server.
pub trait MonitorTarget: Send + Sync {
    /// The status document.
    fn info(&self) -> String;
    /// Request an asynchronous stop.
    fn stop(&self) -> Result<()>;
}

/// Parsed command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Info,
    Stop,
}

impl Command {
    pub const fn parse(byte: u8) -> Option<Self> {
        match byte {
            b'i' | b'I' => Some(Self::Info),
            b's' | b'S' => Some(Self::Stop),
            _ => None,
        }
    }
}

/// Accept monitor connections until the stop flag is set.
pub(crate) async fn run(listener: TcpListener, target: Arc<dyn MonitorTarget>, stopper: Stopper) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Monitor listening");
    }

    let mut connections = JoinSet::new();
    loop {
        let accepted = tokio::select! {
            biased;
            () = stopper.stopped() => break,
            accepted = listener.accept() => accepted,
        };

        while connections.try_join_next().is_some() {}

        match accepted {
            Ok((stream, _)) => {
                let target = Arc::clone(&target);
                let stopper = stopper.clone();
                // A silent client must not hold up other clients or shutdown.
                connections.spawn(async move {
                    tokio::select! {
                        biased;
                        () = stopper.stopped() => {}
                        served = serve(stream, target.as_ref()) => {
                            if let Err(e) = served {
                                report("Monitor request failed", &e);
                            }
                        }
                    }
                });
            }
            Err(e) => {
                if stopper.is_stopped() {
                    break;
                }
                report("Monitor accept failed", &e);
            }
        }
    }

    while connections.join_next().await.is_some() {}
    tracing::debug!("Monitor stopped");
}

async fn serve(mut stream: TcpStream, target: &dyn MonitorTarget) -> io::Result<()> {
    let mut buf = [0u8; MONITOR_BUFFER_SIZE];
    let read = tokio::time::timeout(
        Duration::from_millis(MONITOR_READ_TIMEOUT_MS),
        stream.read(&mut buf),
    )
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no command received"))??;

    match buf[..read].first().copied().and_then(Command::parse) {
        Some(Command::Info) => {
            stream.write_all(target.info().as_bytes()).await?;
        }
        Some(Command::Stop) => {
            tracing::info!("Stop requested through monitor");
            if let Err(e) = target.stop() {
                report("Monitor stop refused", &e);
            }
        }
        None => {}
    }

    stream.shutdown().await
}

/// Log through tracing, or to stderr when no subscriber is installed.
fn report(message: &str, error: &dyn std::fmt::Display) {
    if crate::logging::is_initialized() {
        tracing::error!(error = %error, "{message}");
    } else {
        eprintln!("{message}: {error}");
    }
}

/// Send one command byte to a monitor and return its reply.
///
/// # Errors
///
/// Fails when the monitor cannot be reached.
pub async fn send_command(addr: impl ToSocketAddrs, command: u8) -> io::Result<String> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(&[command]).await?;
    let mut reply = String::new();
    stream.read_to_string(&mut reply).await?;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Fake {
        stops: AtomicUsize,
    }

    impl MonitorTarget for Fake {
        fn info(&self) -> String {
            "<fastcgi-container>\n  <status>running</status>\n</fastcgi-container>\n".to_string()
        }

        fn stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn start_monitor() -> (std::net::SocketAddr, Arc<Fake>, Stopper, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let fake = Arc::new(Fake::default());
        let stopper = Stopper::new();
        let handle = tokio::spawn(run(listener, fake.clone(), stopper.clone()));
        (addr, fake, stopper, handle)
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(Command::parse(b'i'), Some(Command::Info));
        assert_eq!(Command::parse(b'I'), Some(Command::Info));
        assert_eq!(Command::parse(b's'), Some(Command::Stop));
        assert_eq!(Command::parse(b'S'), Some(Command::Stop));
        assert_eq!(Command::parse(b'x'), None);
    }

    #[tokio::test]
    async fn test_info_stop_and_unknown() {
        let (addr, fake, stopper, handle) = start_monitor().await;

        let reply = send_command(addr, b'i').await.unwrap();
        assert!(reply.contains("<status>running</status>"));

        let reply = send_command(addr, b'x').await.unwrap();
        assert!(reply.is_empty());
        assert_eq!(fake.stops.load(Ordering::SeqCst), 0);

        let reply = send_command(addr, b'S').await.unwrap();
        assert!(reply.is_empty());
        assert_eq!(fake.stops.load(Ordering::SeqCst), 1);

        stopper.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_silent_client_blocks_nobody() {
        let (addr, _fake, stopper, handle) = start_monitor().await;

        let _silent = TcpStream::connect(addr).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(1), send_command(addr, b'i'))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.contains("running"));

        // Stopping does not wait out the silent client's read timeout.
        stopper.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_connection_is_ignored() {
        let (addr, fake, stopper, handle) = start_monitor().await;

        let stream = TcpStream::connect(addr).await.unwrap();
        drop(stream);
        let reply = send_command(addr, b'i').await.unwrap();
        assert!(reply.contains("running"));
        assert_eq!(fake.stops.load(Ordering::SeqCst), 0);

        stopper.stop();
        handle.await.unwrap();
    }
}
