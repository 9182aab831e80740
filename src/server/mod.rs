//! The container core.
//!
//! A [`Server`] owns the endpoints, the handler registry, the optional
//! collaborators and every task it spawns:
//!
//! - one worker per configured endpoint thread
//! - a stop listener that turns a `stop()` into the global stop flag
//! - the monitor, when `daemon.monitor_port` is set
//!
//! # Lifecycle
//!
//! ```text
//! NOT_INITED --start()--> LOADING --> RUNNING --stop()--> STOPPING
//! ```
//!
//! `stop()` only flips the stop flag; requests already begun run to
//! completion. `join()` waits for that drain.
//!
//! # Example
//!
//! ```no_run
//! use fcgi_container::components::ComponentRegistry;
//! use fcgi_container::config::{ContainerConfig, EndpointConfig};
//! use fcgi_container::server::Server;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut config = ContainerConfig::default();
//! config.endpoints.push(EndpointConfig::tcp(9000).threads(4));
//!
//! let server = Server::new(config, ComponentRegistry::with_builtins());
//! server.start().await?;
//! server.stopped().await;
//! server.join().await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod endpoint;
mod error;
pub mod info;
pub mod monitor;
pub mod quiescence;
mod status;
pub mod task;
mod worker;

pub use dispatcher::Dispatcher;
pub use endpoint::{BusyCounter, Endpoint, EndpointAddress};
pub use error::{Error, Result};
pub use info::{EndpointInfo, PoolInfo};
pub use monitor::{Command, MonitorTarget, send_command};
pub use quiescence::{ActivityTracker, Stopper};
pub use status::{Status, StatusCell};
pub use task::RequestTask;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::components::{ComponentRegistry, ResponseTimeStatistics, SessionManager, TaskPool, ThreadPool};
use crate::config::ContainerConfig;
use crate::constants::QUIESCENCE_POLL_INTERVAL_MS;
use crate::handler::HandlerRegistry;
use worker::{Worker, WorkerContext};

/// Handle to a FastCGI container. Clones share the same server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    config: ContainerConfig,
    components: RwLock<ComponentRegistry>,
    status: StatusCell,
    stopper: Stopper,
    tracker: Arc<ActivityTracker>,
    stop_tx: mpsc::Sender<()>,
    stop_rx: Mutex<Option<mpsc::Receiver<()>>>,
    running: OnceLock<Running>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// Everything `start()` built.
struct Running {
    endpoints: Vec<Arc<Endpoint>>,
    monitor_addr: Option<SocketAddr>,
    sessions: Option<Arc<dyn SessionManager>>,
    statistics: Option<Arc<dyn ResponseTimeStatistics>>,
    pools: Vec<Arc<dyn ThreadPool>>,
}

impl Server {
    /// Create a server. Nothing is opened until [`Server::start`].
    pub fn new(config: ContainerConfig, components: ComponentRegistry) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                config,
                components: RwLock::new(components),
                status: StatusCell::new(),
                stopper: Stopper::new(),
                tracker: ActivityTracker::new(),
                stop_tx,
                stop_rx: Mutex::new(Some(stop_rx)),
                running: OnceLock::new(),
                workers: Mutex::new(Vec::new()),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Open every endpoint and start serving.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidState`] unless the server is new, and with
    /// the startup error otherwise. A server whose start failed cannot be
    /// started again.
    pub async fn start(&self) -> Result<()> {
        self.inner
            .status
            .advance(Status::Loading)
            .map_err(|status| Error::invalid_state("start", status))?;
        tracing::info!("Starting FastCGI container");

        let loaded = match self.load() {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start FastCGI container");
                // Lets a pending join() return.
                self.inner.stopper.stop();
                return Err(e);
            }
        };
        let running = self.inner.running.get_or_init(|| loaded.running);

        {
            let mut workers = self.inner.workers.lock();
            for endpoint in &running.endpoints {
                for _ in 0..endpoint.threads() {
                    let worker = Worker::new(workers.len(), Arc::clone(endpoint), Arc::clone(&loaded.ctx));
                    workers.push(tokio::spawn(worker.run()));
                }
            }
        }

        self.inner
            .status
            .advance(Status::Running)
            .map_err(|status| Error::invalid_state("start", status))?;

        self.spawn_stop_listener();
        if let Some(listener) = loaded.monitor {
            let target: Arc<dyn MonitorTarget> = Arc::new(MonitorHandle(Arc::downgrade(&self.inner)));
            let stopper = self.inner.stopper.clone();
            self.inner
                .background
                .lock()
                .push(tokio::spawn(monitor::run(listener, target, stopper)));
        }

        tracing::info!(
            endpoints = running.endpoints.len(),
            workers = self.worker_count(),
            monitor = ?running.monitor_addr,
            "FastCGI container running"
        );
        Ok(())
    }

    fn load(&self) -> Result<Loaded> {
        let config = &self.inner.config;
        let daemon = &config.daemon;

        let monitor = match daemon.monitor_port {
            Some(port) => Some(endpoint::bind_monitor(&daemon.monitor_host, port)?),
            None => None,
        };
        let monitor_addr = monitor.as_ref().and_then(|l| l.local_addr().ok());

        if config.endpoints.is_empty() {
            return Err(Error::NoEndpoints);
        }

        let mut components = self.inner.components.write();
        let request_cache = components.request_cache(daemon.request_cache.as_deref())?;
        let statistics = components.statistics(daemon.statistics.as_deref())?;

        let endpoints = config
            .endpoints
            .iter()
            .map(|ep| Endpoint::open(ep).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        let sessions = components.session_manager(daemon.session_component())?;
        let registry = HandlerRegistry::from_config(config, &components)?;

        let mut names = HashSet::new();
        for pool in &config.pools {
            if components.pool(&pool.name).is_some() || !names.insert(pool.name.as_str()) {
                return Err(Error::Config(format!("pool '{}' is defined twice", pool.name)));
            }
            if pool.threads == 0 {
                return Err(Error::Config(format!("pool '{}': threads must be greater than 0", pool.name)));
            }
            if pool.queue_length == 0 {
                return Err(Error::Config(format!(
                    "pool '{}': queue_length must be greater than 0",
                    pool.name
                )));
            }
        }
        for pool in &config.pools {
            components.register_pool(TaskPool::start(pool));
        }
        let pools = components.pools().map(|(_, pool)| Arc::clone(pool)).collect();

        let ctx = Arc::new(WorkerContext {
            dispatcher: Dispatcher::new(Arc::new(registry)),
            stopper: self.inner.stopper.clone(),
            tracker: Arc::clone(&self.inner.tracker),
            request_cache,
            sessions: sessions.clone(),
            statistics: statistics.clone(),
            log_times: daemon.log_times,
        });

        Ok(Loaded {
            running: Running {
                endpoints,
                monitor_addr,
                sessions,
                statistics,
                pools,
            },
            monitor,
            ctx,
        })
    }

    fn spawn_stop_listener(&self) {
        let Some(mut rx) = self.inner.stop_rx.lock().take() else {
            return;
        };
        let inner = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            // Ends without a signal once every handle is dropped.
            if rx.recv().await.is_some() {
                if let Some(inner) = inner.upgrade() {
                    inner.shutdown();
                }
            }
        });
        self.inner.background.lock().push(handle);
    }

    /// Ask the server to stop. Returns without waiting; see [`Server::join`].
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidState`] unless the server is running.
    pub fn stop(&self) -> Result<()> {
        self.inner
            .status
            .advance(Status::Stopping)
            .map_err(|status| Error::invalid_state("stop", status))?;
        tracing::info!("Stopping FastCGI container");
        // Only the caller that won the transition gets here, so the
        // single slot is always free.
        if self.inner.stop_tx.try_send(()).is_err() {
            self.inner.shutdown();
        }
        Ok(())
    }

    /// Wait until the server has stopped and every begun request is answered.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidState`] if the server was never started.
    pub async fn join(&self) -> Result<()> {
        let status = self.status();
        if status == Status::NotInited {
            return Err(Error::invalid_state("join", status));
        }

        self.inner.stopper.stopped().await;

        let pools = self.inner.running.get().map(|r| r.pools.clone()).unwrap_or_default();
        for pool in &pools {
            pool.join().await;
        }

        self.inner
            .tracker
            .wait_quiescent(Duration::from_millis(QUIESCENCE_POLL_INTERVAL_MS))
            .await;

        let handles: Vec<_> = std::mem::take(&mut *self.inner.workers.lock())
            .into_iter()
            .chain(std::mem::take(&mut *self.inner.background.lock()))
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Server task ended abnormally");
            }
        }

        if let Some(statistics) = self.inner.running.get().and_then(|r| r.statistics.as_ref()) {
            tracing::info!(summary = %statistics.summary(), "Response times");
        }
        tracing::info!("FastCGI container stopped");
        Ok(())
    }

    pub fn status(&self) -> Status {
        self.inner.status.get()
    }

    /// The status document the monitor serves for `i`.
    pub fn server_info(&self) -> String {
        let status = self.status();
        let Some(running) = self.inner.running.get() else {
            return info::render(status, &[], &[]);
        };
        let endpoints: Vec<EndpointInfo> = running
            .endpoints
            .iter()
            .map(|ep| EndpointInfo {
                socket: ep.to_string(),
                threads: ep.threads(),
                busy: ep.busy(),
            })
            .collect();
        let pools: Vec<PoolInfo> = running
            .pools
            .iter()
            .map(|pool| PoolInfo {
                name: pool.name().to_string(),
                info: pool.info(),
            })
            .collect();
        info::render(status, &endpoints, &pools)
    }

    /// Endpoints opened by `start()`; empty before.
    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        self.inner
            .running
            .get()
            .map(|r| r.endpoints.as_slice())
            .unwrap_or_default()
    }

    /// Number of worker tasks not yet reaped by `join()`.
    pub fn worker_count(&self) -> usize {
        self.inner.workers.lock().len()
    }

    /// Bound monitor address, when the monitor is enabled.
    pub fn monitor_addr(&self) -> Option<SocketAddr> {
        self.inner.running.get().and_then(|r| r.monitor_addr)
    }

    /// Named pool, whether registered up front or declared in `[[pool]]`.
    pub fn pool(&self, name: &str) -> Option<Arc<dyn ThreadPool>> {
        self.inner.components.read().pool(name)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopper.is_stopped()
    }

    /// Resolve once the stop flag is set, by `stop()` or the monitor.
    pub async fn stopped(&self) {
        self.inner.stopper.stopped().await;
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("status", &self.status())
            .field("endpoints", &self.endpoints().len())
            .field("workers", &self.worker_count())
            .finish()
    }
}

struct Loaded {
    running: Running,
    monitor: Option<tokio::net::TcpListener>,
    ctx: Arc<WorkerContext>,
}

impl Inner {
    /// Runs once, on the stop listener.
    fn shutdown(&self) {
        self.stopper.stop();
        if let Some(running) = self.running.get() {
            for endpoint in &running.endpoints {
                endpoint.close();
            }
            for pool in &running.pools {
                pool.stop();
            }
            if let Some(sessions) = &running.sessions {
                sessions.stop();
            }
        }
        tracing::info!(active = self.tracker.active(), "Stop flag set, draining");
    }
}

/// Monitor view of a server that does not keep it alive.
struct MonitorHandle(Weak<Inner>);

impl MonitorTarget for MonitorHandle {
    fn info(&self) -> String {
        self.0
            .upgrade()
            .map(|inner| Server { inner }.server_info())
            .unwrap_or_default()
    }

    fn stop(&self) -> Result<()> {
        match self.0.upgrade() {
            Some(inner) => Server { inner }.stop(),
            None => Ok(()),
        }
    }
}
