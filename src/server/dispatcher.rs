//! Handler chain resolution and execution.
//!
//! The dispatcher turns a populated [`RequestTask`] into a [`Response`].
//! Failures never escape: `NotFound` becomes a 404 and every other error
//! becomes the status given by [`Error::status_code`].

use std::sync::Arc;

use super::task::RequestTask;
use super::{Error, Result};
use crate::handler::{FilterAction, FilterEntry, HandlerRegistry};
use crate::request::Response;

/// Outcome of running the filter chain.
enum FilterOutcome {
    Continue,
    Respond(Response),
}

/// Resolves and runs handler chains against a shared registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Bind the chain for the task's current script name.
    ///
    /// # Errors
    ///
    /// `NotFound` when no chain matches or the matching chain is empty.
    pub fn resolve_handlers(&self, task: &mut RequestTask) -> Result<()> {
        let script = task.request.script_name();
        match self.registry.find_handler(script) {
            Some(desc) if !desc.is_empty() => {
                task.handler = Some(desc.clone());
                Ok(())
            }
            _ => Err(Error::not_found(script)),
        }
    }

    /// Run filters and handlers for the task and produce its response.
    pub async fn dispatch(&self, task: &mut RequestTask) -> Response {
        match self.run(task).await {
            Ok(response) => response,
            Err(e) => {
                let status = e.status_code();
                if status >= 500 {
                    tracing::error!(
                        request_id = %task.request_id,
                        script = %task.request.script_name(),
                        error = %e,
                        "Request failed"
                    );
                } else {
                    tracing::debug!(
                        request_id = %task.request_id,
                        script = %task.request.script_name(),
                        status,
                        error = %e,
                        "Request rejected"
                    );
                }
                Response::error(status)
            }
        }
    }

    async fn run(&self, task: &mut RequestTask) -> Result<Response> {
        let filters: Vec<FilterEntry> = self
            .registry
            .filters_for(task.request.script_name())
            .cloned()
            .collect();

        let resolved = self.resolve_handlers(task);
        match resolved {
            Err(Error::NotFound { .. }) if !filters.is_empty() => {
                // Filters may rewrite the script name, so look again afterwards.
                if let FilterOutcome::Respond(response) = self.run_filters(task, &filters).await? {
                    return Ok(response);
                }
                self.resolve_handlers(task)?;
            }
            Err(e) => return Err(e),
            Ok(()) => {
                if let FilterOutcome::Respond(response) = self.run_filters(task, &filters).await? {
                    return Ok(response);
                }
            }
        }
        self.run_handlers(task).await
    }

    async fn run_filters(&self, task: &mut RequestTask, filters: &[FilterEntry]) -> Result<FilterOutcome> {
        for entry in filters {
            match entry.filter.filter(&mut task.request).await? {
                FilterAction::Continue => {}
                FilterAction::Respond(response) => {
                    tracing::debug!(
                        request_id = %task.request_id,
                        filter = %entry.name,
                        status = response.status,
                        "Filter answered request"
                    );
                    return Ok(FilterOutcome::Respond(response));
                }
            }
        }
        Ok(FilterOutcome::Continue)
    }

    async fn run_handlers(&self, task: &mut RequestTask) -> Result<Response> {
        let Some(desc) = task.handler.clone() else {
            return Err(Error::not_found(task.request.script_name()));
        };
        let mut response = Response::ok();
        for handler in &desc.handlers {
            handler.handle(&mut task.request, &mut response).await?;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{EchoHandler, PingHandler};
    use crate::handler::{FnFilter, FnHandler, HandlerDescription, HandlerError};
    use crate::request::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task(script: &str) -> RequestTask {
        RequestTask::new(Request::new("GET", script))
    }

    fn dispatcher(registry: HandlerRegistry) -> Dispatcher {
        Dispatcher::new(Arc::new(registry))
    }

    #[test]
    fn test_resolve_handlers() {
        let mut registry = HandlerRegistry::new();
        registry.add_handler(HandlerDescription::new("/ping").with_handler("ping", Arc::new(PingHandler)));
        registry.add_handler(HandlerDescription::new("/empty"));
        let d = dispatcher(registry);

        let mut t = task("/ping");
        d.resolve_handlers(&mut t).unwrap();
        assert_eq!(t.handler_pattern(), "/ping");

        let mut t = task("/empty");
        assert!(matches!(d.resolve_handlers(&mut t), Err(Error::NotFound { .. })));
        assert!(t.handler.is_none());

        let mut t = task("/missing");
        assert!(matches!(d.resolve_handlers(&mut t), Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_not_found_without_filters() {
        let d = dispatcher(HandlerRegistry::new());
        let response = d.dispatch(&mut task("/nothing")).await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let mut registry = HandlerRegistry::new();
        registry.add_handler(
            HandlerDescription::new("/chain")
                .with_handler(
                    "a",
                    Arc::new(FnHandler::new(|_: &mut Request, resp: &mut Response| {
                        resp.body.extend_from_slice(b"a");
                        Ok(())
                    })),
                )
                .with_handler(
                    "b",
                    Arc::new(FnHandler::new(|_: &mut Request, resp: &mut Response| {
                        resp.body.extend_from_slice(b"b");
                        Ok(())
                    })),
                ),
        );
        let response = dispatcher(registry).dispatch(&mut task("/chain")).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"ab");
    }

    #[tokio::test]
    async fn test_handler_failure_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = HandlerRegistry::new();
        registry.add_handler(
            HandlerDescription::new("/fail")
                .with_handler(
                    "boom",
                    Arc::new(FnHandler::new(|_: &mut Request, _: &mut Response| {
                        Err(HandlerError::Failed("boom".into()))
                    })),
                )
                .with_handler(
                    "after",
                    Arc::new(FnHandler::new(move |_: &mut Request, _: &mut Response| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })),
                ),
        );
        let response = dispatcher(registry).dispatch(&mut task("/fail")).await;
        assert_eq!(response.status, 500);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bad_request_maps_to_400() {
        let mut registry = HandlerRegistry::new();
        registry.add_handler(HandlerDescription::new("/x").with_handler(
            "strict",
            Arc::new(FnHandler::new(|_: &mut Request, _: &mut Response| {
                Err(HandlerError::BadRequest("missing id".into()))
            })),
        ));
        let response = dispatcher(registry).dispatch(&mut task("/x")).await;
        assert_eq!(response.status, 400);
    }

    #[tokio::test]
    async fn test_filters_run_before_handler() {
        let mut registry = HandlerRegistry::new();
        registry.add_filter(
            "tag",
            "*",
            Arc::new(FnFilter::new(|req: &mut Request| {
                req.args.push(("tagged".into(), "yes".into()));
                Ok(FilterAction::Continue)
            })),
        );
        registry.add_handler(HandlerDescription::new("/echo").with_handler("echo", Arc::new(EchoHandler)));
        let response = dispatcher(registry).dispatch(&mut task("/echo")).await;
        assert_eq!(response.status, 200);
        assert!(response.body_str().unwrap().contains("tagged=yes"));
    }

    #[tokio::test]
    async fn test_filter_rewrite_resolves_again() {
        let mut registry = HandlerRegistry::new();
        registry.add_filter(
            "login",
            "*",
            Arc::new(FnFilter::new(|req: &mut Request| {
                if req.script_name() == "/private" {
                    req.set_script_name("/login");
                }
                Ok(FilterAction::Continue)
            })),
        );
        registry.add_handler(HandlerDescription::new("/login").with_handler("ping", Arc::new(PingHandler)));
        let d = dispatcher(registry);

        let mut t = task("/private");
        let response = d.dispatch(&mut t).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"pong");
        assert_eq!(t.handler_pattern(), "/login");
    }

    #[tokio::test]
    async fn test_filters_then_not_found() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let mut registry = HandlerRegistry::new();
        registry.add_filter(
            "count",
            "*",
            Arc::new(FnFilter::new(move |_: &mut Request| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(FilterAction::Continue)
            })),
        );
        let response = dispatcher(registry).dispatch(&mut task("/nowhere")).await;
        assert_eq!(response.status, 404);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_filter_can_answer() {
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handled);
        let mut registry = HandlerRegistry::new();
        registry.add_filter(
            "deny",
            "/admin/*",
            Arc::new(FnFilter::new(|_: &mut Request| {
                Ok(FilterAction::Respond(Response::error(403)))
            })),
        );
        registry.add_handler(HandlerDescription::new("/admin/*").with_handler(
            "count",
            Arc::new(FnHandler::new(move |_: &mut Request, _: &mut Response| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        ));
        let d = dispatcher(registry);

        let response = d.dispatch(&mut task("/admin/users")).await;
        assert_eq!(response.status, 403);
        assert_eq!(handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_filter_error_maps_to_status() {
        let mut registry = HandlerRegistry::new();
        registry.add_filter(
            "broken",
            "*",
            Arc::new(FnFilter::new(|_: &mut Request| Err(HandlerError::Failed("down".into())))),
        );
        registry.add_handler(HandlerDescription::new("/ping").with_handler("ping", Arc::new(PingHandler)));
        let response = dispatcher(registry).dispatch(&mut task("/ping")).await;
        assert_eq!(response.status, 500);
    }
}
