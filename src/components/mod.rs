//! Named components and the collaborator interfaces.
//!
//! Every component is registered under a name together with the capability
//! it provides ([`Component`]). Configuration refers to components by name;
//! names are resolved once, when the server starts, and a component with
//! the wrong capability is a startup error.
//!
//! Thread pools live in their own map because the server creates the pools
//! declared in configuration itself.

pub mod builtin;
pub mod pool;

pub use builtin::{
    EchoHandler, MemoryRequestCache, MemorySessionManager, PingHandler, TimingStatistics,
};
pub use pool::{PoolError, PoolJob, TaskPool, ThreadPool, ThreadPoolInfo};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::handler::{Filter, Handler};
use crate::request::Request;
use crate::server::Error;

/// Keeps copies of in-flight requests.
///
/// A request is saved when it is attached and erased once its response has
/// been written, so whatever the cache holds was accepted but never
/// answered.
pub trait RequestCache: Send + Sync {
    /// Store `request`, returning the key it is kept under.
    fn save(&self, request: &Request) -> String;
    fn load(&self, key: &str) -> Option<Request>;
    fn erase(&self, key: &str);
    /// Number of requests currently held.
    fn size(&self) -> u64;
}

/// Attaches a [`Session`] to every request.
pub trait SessionManager: Send + Sync {
    /// Find the session for `request`, creating one if needed.
    fn attach(&self, request: &Request) -> Arc<Session>;
    /// Called once when the server shuts down.
    fn stop(&self);
}

/// Collects response times.
pub trait ResponseTimeStatistics: Send + Sync {
    /// Record one completed request. `handler` is the pattern the request
    /// resolved to, or `-` when none did.
    fn add(&self, handler: &str, status: u16, elapsed: Duration);
    /// Human readable summary.
    fn summary(&self) -> String;
}

/// Per-client session data.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    is_new: bool,
    data: Arc<Mutex<HashMap<String, String>>>,
}

impl Session {
    pub fn new(id: impl Into<String>, is_new: bool, data: Arc<Mutex<HashMap<String, String>>>) -> Self {
        Self {
            id: id.into(),
            is_new,
            data,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when the session was created for this request.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.is_new
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.data.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.lock().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.data.lock().remove(key)
    }
}

/// A registered component, tagged with its capability.
#[derive(Clone)]
pub enum Component {
    Handler(Arc<dyn Handler>),
    Filter(Arc<dyn Filter>),
    RequestCache(Arc<dyn RequestCache>),
    SessionManager(Arc<dyn SessionManager>),
    Statistics(Arc<dyn ResponseTimeStatistics>),
}

impl Component {
    /// Capability name used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Handler(_) => "handler",
            Self::Filter(_) => "filter",
            Self::RequestCache(_) => "request cache",
            Self::SessionManager(_) => "session manager",
            Self::Statistics(_) => "statistics collector",
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.kind())
    }
}

/// Name-to-component lookup.
#[derive(Default)]
pub struct ComponentRegistry {
    components: HashMap<String, Component>,
    pools: BTreeMap<String, Arc<dyn ThreadPool>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in components:
    /// `echo`, `ping`, `memory-cache`, `memory-sessions` and `timing`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("echo", Component::Handler(Arc::new(EchoHandler)));
        registry.register("ping", Component::Handler(Arc::new(PingHandler)));
        registry.register(
            "memory-cache",
            Component::RequestCache(Arc::new(MemoryRequestCache::new())),
        );
        registry.register(
            "memory-sessions",
            Component::SessionManager(Arc::new(MemorySessionManager::new())),
        );
        registry.register(
            "timing",
            Component::Statistics(Arc::new(TimingStatistics::new())),
        );
        registry
    }

    /// Register `component` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, component: Component) -> &mut Self {
        self.components.insert(name.into(), component);
        self
    }

    pub fn register_handler(&mut self, name: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        self.register(name, Component::Handler(Arc::new(handler)))
    }

    pub fn register_filter(&mut self, name: impl Into<String>, filter: impl Filter + 'static) -> &mut Self {
        self.register(name, Component::Filter(Arc::new(filter)))
    }

    /// Register a thread pool under its own name.
    pub fn register_pool(&mut self, pool: Arc<dyn ThreadPool>) -> &mut Self {
        self.pools.insert(pool.name().to_string(), pool);
        self
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Component> {
        self.components.get(name)
    }

    #[must_use]
    pub fn pool(&self, name: &str) -> Option<Arc<dyn ThreadPool>> {
        self.pools.get(name).cloned()
    }

    /// Pools ordered by name.
    pub fn pools(&self) -> impl Iterator<Item = (&str, &Arc<dyn ThreadPool>)> {
        self.pools.iter().map(|(name, pool)| (name.as_str(), pool))
    }

    /// Handler named in configuration. Missing names are errors.
    pub fn handler(&self, name: &str) -> Result<Arc<dyn Handler>, Error> {
        match self.find(name) {
            Some(Component::Handler(h)) => Ok(Arc::clone(h)),
            Some(other) => Err(Error::capability(name, "Handler", other.kind())),
            None => Err(Error::missing_component(name)),
        }
    }

    /// Filter named in configuration. Missing names are errors.
    pub fn filter(&self, name: &str) -> Result<Arc<dyn Filter>, Error> {
        match self.find(name) {
            Some(Component::Filter(f)) => Ok(Arc::clone(f)),
            Some(other) => Err(Error::capability(name, "Filter", other.kind())),
            None => Err(Error::missing_component(name)),
        }
    }

    /// Optional request cache. An unregistered name disables the cache.
    pub fn request_cache(&self, name: Option<&str>) -> Result<Option<Arc<dyn RequestCache>>, Error> {
        self.collaborator(name, "RequestCache", |c| match c {
            Component::RequestCache(rc) => Some(Arc::clone(rc)),
            _ => None,
        })
    }

    /// Optional session manager. An unregistered name disables sessions.
    pub fn session_manager(&self, name: Option<&str>) -> Result<Option<Arc<dyn SessionManager>>, Error> {
        self.collaborator(name, "SessionManager", |c| match c {
            Component::SessionManager(sm) => Some(Arc::clone(sm)),
            _ => None,
        })
    }

    /// Optional statistics collector. An unregistered name disables timing.
    pub fn statistics(&self, name: Option<&str>) -> Result<Option<Arc<dyn ResponseTimeStatistics>>, Error> {
        self.collaborator(name, "ResponseTimeStatistics", |c| match c {
            Component::Statistics(s) => Some(Arc::clone(s)),
            _ => None,
        })
    }

    fn collaborator<T: ?Sized>(
        &self,
        name: Option<&str>,
        expected: &'static str,
        select: impl Fn(&Component) -> Option<Arc<T>>,
    ) -> Result<Option<Arc<T>>, Error> {
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            return Ok(None);
        };
        let Some(component) = self.find(name) else {
            tracing::warn!(component = %name, expected, "Configured component is not registered, feature disabled");
            return Ok(None);
        };
        select(component)
            .map(Some)
            .ok_or_else(|| Error::capability(name, expected, component.kind()))
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .field("pools", &self.pools.keys().collect::<Vec<_>>())
            .finish()
    }
}
