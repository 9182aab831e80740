//! Per-endpoint worker loop.
//!
//! Each worker owns at most one connection at a time. It suspends only
//! while waiting for work (an accept, or the next `BEGIN_REQUEST` on a
//! kept-alive connection); that wait is raced against the stop flag so a
//! stop never waits on an idle peer. Once a request has begun, the worker
//! holds an activity guard and an endpoint busy guard until the response
//! has been written, whatever happens in between.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;

use super::dispatcher::Dispatcher;
use super::endpoint::{Endpoint, Transport};
use super::quiescence::{ActivityTracker, Stopper};
use super::task::RequestTask;
use super::{Error, Result};
use crate::components::{RequestCache, ResponseTimeStatistics, SessionManager};
use crate::constants::{ACCEPT_ERROR_BACKOFF_MS, SESSION_COOKIE};
use crate::fcgi::{BeginRequest, FcgiConnection};
use crate::logging::log_request_complete;
use crate::request::{Request, Response};

type Connection = FcgiConnection<Transport>;

/// State shared by every worker of every endpoint.
pub(crate) struct WorkerContext {
    pub(crate) dispatcher: Dispatcher,
    pub(crate) stopper: Stopper,
    pub(crate) tracker: Arc<ActivityTracker>,
    pub(crate) request_cache: Option<Arc<dyn RequestCache>>,
    pub(crate) sessions: Option<Arc<dyn SessionManager>>,
    pub(crate) statistics: Option<Arc<dyn ResponseTimeStatistics>>,
    pub(crate) log_times: bool,
}

pub(crate) struct Worker {
    id: usize,
    endpoint: Arc<Endpoint>,
    ctx: Arc<WorkerContext>,
}

impl Worker {
    pub(crate) fn new(id: usize, endpoint: Arc<Endpoint>, ctx: Arc<WorkerContext>) -> Self {
        Self { id, endpoint, ctx }
    }

    /// Serve requests until the stop flag is set.
    pub(crate) async fn run(self) {
        tracing::debug!(worker = self.id, endpoint = %self.endpoint, "Worker started");
        let mut kept: Option<Connection> = None;

        loop {
            if self.ctx.stopper.is_stopped() {
                break;
            }

            let next = tokio::select! {
                biased;
                () = self.ctx.stopper.stopped() => break,
                next = self.next_request(kept.take()) => next,
            };

            let (mut conn, begin) = match next {
                Ok(Some(next)) => next,
                // Peer closed between requests.
                Ok(None) => continue,
                Err(e) => {
                    if self.ctx.stopper.is_stopped() {
                        break;
                    }
                    self.log_wait_error(&e);
                    if matches!(e, Error::Io { .. }) {
                        tokio::time::sleep(Duration::from_millis(ACCEPT_ERROR_BACKOFF_MS)).await;
                    }
                    continue;
                }
            };

            let keep = {
                let _active = self.ctx.tracker.enter();
                let _busy = self.endpoint.enter_busy();
                self.serve(&mut conn, begin).await
            };

            if keep {
                kept = Some(conn);
            } else if let Err(e) = conn.close().await {
                tracing::debug!(endpoint = %self.endpoint, error = %e, "Error closing connection");
            }
        }

        tracing::debug!(worker = self.id, endpoint = %self.endpoint, "Worker stopped");
    }

    /// Wait for the next request, on `kept` if given or on a fresh connection.
    async fn next_request(&self, kept: Option<Connection>) -> Result<Option<(Connection, BeginRequest)>> {
        let mut conn = match kept {
            Some(conn) => conn,
            None => {
                let stream = self
                    .endpoint
                    .accept()
                    .await
                    .map_err(|e| Error::io(format!("accept on {}", self.endpoint), e))?;
                FcgiConnection::new(stream, self.endpoint.threads())
            }
        };
        Ok(conn.next_begin().await?.map(|begin| (conn, begin)))
    }

    fn log_wait_error(&self, e: &Error) {
        match e {
            Error::Protocol(p) if p.is_disconnect() => {
                tracing::debug!(endpoint = %self.endpoint, error = %e, "Connection dropped");
            }
            _ => tracing::warn!(endpoint = %self.endpoint, error = %e, "Failed to receive request"),
        }
    }

    /// Attach, dispatch and respond to one request.
    ///
    /// Returns whether the connection may be used for another request.
    async fn serve(&self, conn: &mut Connection, begin: BeginRequest) -> bool {
        let started = Instant::now();

        let request = match self.attach(conn, &begin).await {
            Ok(request) => request,
            Err(e) => {
                if let Error::Protocol(p) = &e {
                    if p.is_disconnect() {
                        tracing::debug!(endpoint = %self.endpoint, error = %e, "Connection dropped during attach");
                        return false;
                    }
                }
                tracing::warn!(endpoint = %self.endpoint, error = %e, "Failed to attach request");
                let response = Response::error(e.status_code());
                if let Err(e) = conn.write_response(begin.request_id, &response).await {
                    tracing::debug!(endpoint = %self.endpoint, error = %e, "Failed to write error response");
                }
                return false;
            }
        };

        let task = RequestTask::started_at(request, started);
        let span = crate::request_span!(task.request_id, self.endpoint, task.request.script_name());
        let keep = self.respond(conn, begin, task).instrument(span).await;
        keep && self.endpoint.keepalive() && begin.keep_conn()
    }

    async fn attach(&self, conn: &mut Connection, begin: &BeginRequest) -> Result<Request> {
        let input = conn.read_input(begin).await.map_err(|e| {
            if e.is_disconnect() {
                Error::Protocol(e)
            } else {
                Error::Attach(e.to_string())
            }
        })?;
        let mut request =
            Request::from_cgi(input.params, input.stdin).map_err(|e| Error::Attach(e.to_string()))?;

        if let Some(cache) = &self.ctx.request_cache {
            request.cache_key = Some(cache.save(&request));
        }
        if let Some(sessions) = &self.ctx.sessions {
            request.session = Some(sessions.attach(&request));
        }
        Ok(request)
    }

    async fn respond(&self, conn: &mut Connection, begin: BeginRequest, task: RequestTask) -> bool {
        let started = task.started;
        let method = task.request.method.clone();
        let script = task.request.script_name().to_string();
        let cache_key = task.request.cache_key.clone();
        let new_session = task
            .request
            .session
            .as_ref()
            .filter(|s| s.is_new())
            .map(|s| s.id().to_string());

        // The chain runs in its own task so a panicking handler ends as a
        // 500 instead of unwinding this worker.
        let dispatcher = self.ctx.dispatcher.clone();
        let run = tokio::spawn(
            async move {
                let mut task = task;
                let response = dispatcher.dispatch(&mut task).await;
                (response, task.handler_pattern().to_string())
            }
            .in_current_span(),
        );
        let (mut response, pattern) = match run.await {
            Ok(done) => done,
            Err(e) => {
                tracing::error!(error = %e, "Handler chain panicked");
                (Response::error(500), "-".to_string())
            }
        };

        if let Some(id) = new_session {
            response
                .headers
                .push(("Set-Cookie".to_string(), session_cookie(&id)));
        }

        let written = match conn.write_response(begin.request_id, &response).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to write response");
                false
            }
        };

        if let (Some(cache), Some(key)) = (&self.ctx.request_cache, cache_key) {
            cache.erase(&key);
        }

        let elapsed = started.elapsed();
        if let Some(statistics) = &self.ctx.statistics {
            statistics.add(&pattern, response.status, elapsed);
        }
        if self.ctx.log_times {
            log_request_complete(&method, &script, response.status, elapsed);
        }
        written
    }
}

fn session_cookie(id: &str) -> String {
    format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie() {
        assert_eq!(session_cookie("abc"), "session_id=abc; Path=/; HttpOnly");
    }
}
