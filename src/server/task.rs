//! Per-request state owned by one worker.

use std::time::Instant;

use crate::handler::HandlerDescription;
use crate::request::Request;

/// One in-flight request.
///
/// Created by a worker after the request's input has been attached and
/// dropped once the response is written. Never shared between workers.
#[derive(Debug)]
pub struct RequestTask {
    pub request: Request,
    /// Correlation id used in logs.
    pub request_id: String,
    /// Chain the request resolved to; `None` until resolution succeeds.
    pub handler: Option<HandlerDescription>,
    pub started: Instant,
}

impl RequestTask {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            request_id: crate::logging::generate_request_id(),
            handler: None,
            started: Instant::now(),
        }
    }

    /// Task for a request whose input began arriving at `started`.
    pub fn started_at(request: Request, started: Instant) -> Self {
        Self {
            started,
            ..Self::new(request)
        }
    }

    /// Pattern of the resolved chain, or `-`.
    pub fn handler_pattern(&self) -> &str {
        self.handler.as_ref().map_or("-", |h| h.pattern.as_str())
    }
}
