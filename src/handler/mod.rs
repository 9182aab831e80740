//! Handler and filter interfaces.
//!
//! Handlers produce the response for a request; filters run before the
//! handler chain and may rewrite the request, answer it themselves, or let
//! it continue. Both are registered as components and bound to path
//! patterns through the [`HandlerRegistry`].

pub mod registry;

pub use registry::{FilterEntry, HandlerDescription, HandlerRegistry};

use async_trait::async_trait;
use thiserror::Error;

use crate::request::{Request, Response};

/// Failure reported by a handler or filter.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler does not serve this request.
    #[error("not found")]
    NotFound,

    /// The request is malformed for this handler.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The handler failed.
    #[error("{0}")]
    Failed(String),

    /// Any other error raised with `?`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Response status for this failure.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::BadRequest(_) => 400,
            Self::Failed(_) | Self::Other(_) => 500,
        }
    }
}

/// What a filter decided.
#[derive(Debug)]
pub enum FilterAction {
    /// Pass the request on to the next filter, then the handlers.
    Continue,
    /// Stop here and send this response.
    Respond(Response),
}

/// A request handler.
///
/// Handlers in a chain share one response; each may add to it.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: &mut Request, response: &mut Response) -> Result<(), HandlerError>;
}

/// A request filter.
#[async_trait]
pub trait Filter: Send + Sync {
    async fn filter(&self, request: &mut Request) -> Result<FilterAction, HandlerError>;
}

/// Adapts a synchronous closure into a [`Handler`].
///
/// # Example
///
/// ```
/// use fcgi_container::handler::FnHandler;
/// use fcgi_container::request::{Request, Response};
///
/// let hello = FnHandler::new(|_req: &mut Request, resp: &mut Response| {
///     resp.body = b"hello".to_vec();
///     Ok(())
/// });
/// ```
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<(), HandlerError> + Send + Sync,
{
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, request: &mut Request, response: &mut Response) -> Result<(), HandlerError> {
        (self.0)(request, response)
    }
}

/// Adapts a synchronous closure into a [`Filter`].
pub struct FnFilter<F>(F);

impl<F> FnFilter<F>
where
    F: Fn(&mut Request) -> Result<FilterAction, HandlerError> + Send + Sync,
{
    pub const fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> Filter for FnFilter<F>
where
    F: Fn(&mut Request) -> Result<FilterAction, HandlerError> + Send + Sync,
{
    async fn filter(&self, request: &mut Request) -> Result<FilterAction, HandlerError> {
        (self.0)(request)
    }
}
