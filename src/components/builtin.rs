//! Built-in components.
//!
//! Small, dependency-free implementations of every capability so a
//! container can be run and checked without loading anything else.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::sync::Cache as MokaCache;
use parking_lot::Mutex;

use super::{RequestCache, ResponseTimeStatistics, Session, SessionManager};
use crate::constants::{
    CONTENT_TYPE_TEXT, REQUEST_CACHE_CAPACITY, REQUEST_CACHE_IDLE_SECS, SESSION_CAPACITY,
    SESSION_COOKIE, SESSION_IDLE_SECS,
};
use crate::handler::{Handler, HandlerError};
use crate::request::{Request, Response};

/// Writes the method, script name and arguments back as plain text.
#[derive(Debug, Default)]
pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, request: &mut Request, response: &mut Response) -> Result<(), HandlerError> {
        let mut body = format!("{} {}\n", request.method, request.script_name());
        for (name, value) in &request.args {
            let _ = writeln!(body, "{name}={value}");
        }
        if let Some(session) = &request.session {
            let _ = writeln!(body, "session={}", session.id());
        }
        response.headers.push(("Content-Type".to_string(), CONTENT_TYPE_TEXT.to_string()));
        response.body.extend_from_slice(body.as_bytes());
        Ok(())
    }
}

/// Answers `pong`.
#[derive(Debug, Default)]
pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    async fn handle(&self, _request: &mut Request, response: &mut Response) -> Result<(), HandlerError> {
        response.headers.push(("Content-Type".to_string(), CONTENT_TYPE_TEXT.to_string()));
        response.body = b"pong".to_vec();
        Ok(())
    }
}

/// In-memory request cache with idle expiry.
pub struct MemoryRequestCache {
    requests: MokaCache<String, Request>,
}

impl MemoryRequestCache {
    pub fn new() -> Self {
        Self::with_limits(REQUEST_CACHE_CAPACITY, Duration::from_secs(REQUEST_CACHE_IDLE_SECS))
    }

    pub fn with_limits(capacity: u64, idle: Duration) -> Self {
        let requests = MokaCache::builder()
            .max_capacity(capacity)
            .time_to_idle(idle)
            .build();
        Self { requests }
    }
}

impl Default for MemoryRequestCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCache for MemoryRequestCache {
    fn save(&self, request: &Request) -> String {
        let key = uuid::Uuid::new_v4().simple().to_string();
        self.requests.insert(key.clone(), request.clone());
        key
    }

    fn load(&self, key: &str) -> Option<Request> {
        self.requests.get(key)
    }

    fn erase(&self, key: &str) {
        self.requests.invalidate(key);
    }

    fn size(&self) -> u64 {
        self.requests.run_pending_tasks();
        self.requests.entry_count()
    }
}

type SessionData = Arc<Mutex<HashMap<String, String>>>;

/// In-memory sessions keyed by the `session_id` cookie.
pub struct MemorySessionManager {
    sessions: MokaCache<String, SessionData>,
}

impl MemorySessionManager {
    pub fn new() -> Self {
        let sessions = MokaCache::builder()
            .max_capacity(SESSION_CAPACITY)
            .time_to_idle(Duration::from_secs(SESSION_IDLE_SECS))
            .build();
        Self { sessions }
    }

    /// Number of live sessions.
    pub fn len(&self) -> u64 {
        self.sessions.run_pending_tasks();
        self.sessions.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager for MemorySessionManager {
    fn attach(&self, request: &Request) -> Arc<Session> {
        if let Some(id) = request.cookie(SESSION_COOKIE) {
            if let Some(data) = self.sessions.get(id) {
                return Arc::new(Session::new(id, false, data));
            }
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        let data = SessionData::default();
        self.sessions.insert(id.clone(), Arc::clone(&data));
        Arc::new(Session::new(id, true, data))
    }

    fn stop(&self) {
        tracing::debug!(sessions = self.sessions.entry_count(), "Dropping in-memory sessions");
        self.sessions.invalidate_all();
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Timing {
    count: u64,
    errors: u64,
    total: Duration,
    max: Duration,
}

/// Per-handler request count, mean and maximum response time.
pub struct TimingStatistics {
    since: DateTime<Utc>,
    timings: Mutex<BTreeMap<String, Timing>>,
}

impl TimingStatistics {
    pub fn new() -> Self {
        Self {
            since: Utc::now(),
            timings: Mutex::new(BTreeMap::new()),
        }
    }

    /// Requests recorded for `handler`.
    pub fn count(&self, handler: &str) -> u64 {
        self.timings.lock().get(handler).map_or(0, |t| t.count)
    }
}

impl Default for TimingStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseTimeStatistics for TimingStatistics {
    fn add(&self, handler: &str, status: u16, elapsed: Duration) {
        let mut timings = self.timings.lock();
        let timing = timings.entry(handler.to_string()).or_default();
        timing.count += 1;
        if status >= 500 {
            timing.errors += 1;
        }
        timing.total += elapsed;
        timing.max = timing.max.max(elapsed);
    }

    fn summary(&self) -> String {
        let timings = self.timings.lock();
        let mut out = String::with_capacity(64 + timings.len() * 80);
        let _ = writeln!(out, "response times since {}", self.since.to_rfc3339());
        for (handler, t) in timings.iter() {
            let avg_ms = if t.count == 0 {
                0.0
            } else {
                t.total.as_secs_f64() * 1000.0 / t.count as f64
            };
            let _ = writeln!(
                out,
                "{handler} count={} errors={} avg_ms={avg_ms:.3} max_ms={:.3}",
                t.count,
                t.errors,
                t.max.as_secs_f64() * 1000.0
            );
        }
        out
    }
}
