use std::fmt;
use std::sync::Arc;

use crate::data::{RequestBuilder, RequestId, Response, TaskId, WireRequest};

/// What a middleware sees of a logical request at a given hook.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,

    /// Current transport task, if one was submitted.
    pub task_id: Option<TaskId>,

    /// The finalized request. `None` for downloads resumed from resume data.
    pub request: Option<WireRequest>,

    /// Zero for the first attempt, one per retry after that.
    pub attempt: u32,
}

/// Hooks around the life of a logical request.
///
/// Every hook defaults to identity or no-op, so implementors pick the ones
/// they need. Hooks run in registration order.
pub trait Middleware: Send + Sync {
    /// Adjust the request before it is finalized.
    fn prepare(&self, builder: RequestBuilder) -> RequestBuilder { builder }

    /// Called after a task is created and before it is resumed, on every attempt.
    fn before_send(&self, _context: &RequestContext) {}

    /// Called once with the final response, after retries are exhausted.
    fn after_receive(&self, response: Response) -> Response { response }

    /// Called exactly once when the logical request is done, success or failure.
    fn did_stop(&self, _context: &RequestContext) {}
}

/// Ordered list of middlewares applied as one.
#[derive(Clone, Default)]
pub struct MiddlewareChain(Vec<Arc<dyn Middleware>>);

impl MiddlewareChain {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self { Self(middlewares) }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn prepare(&self, builder: RequestBuilder) -> RequestBuilder {
        self.0.iter().fold(builder, |builder, m| m.prepare(builder))
    }

    pub fn before_send(&self, context: &RequestContext) {
        for m in &self.0 {
            m.before_send(context);
        }
    }

    pub fn after_receive(&self, response: Response) -> Response {
        self.0.iter().fold(response, |response, m| m.after_receive(response))
    }

    pub fn did_stop(&self, context: &RequestContext) {
        for m in &self.0 {
            m.did_stop(context);
        }
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain").field("len", &self.0.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataResponse, Headers};
    use bytes::Bytes;
    use std::sync::Mutex;

    struct Tag(&'static str, Arc<Mutex<Vec<String>>>);

    impl Middleware for Tag {
        fn prepare(&self, builder: RequestBuilder) -> RequestBuilder {
            let seen = builder.headers.get("X-Order").unwrap_or_default().to_string();
            builder.header("X-Order", format!("{seen}{}", self.0))
        }

        fn before_send(&self, context: &RequestContext) {
            self.1.lock().unwrap().push(format!("{}:send:{}", self.0, context.attempt));
        }

        fn did_stop(&self, _context: &RequestContext) {
            self.1.lock().unwrap().push(format!("{}:stop", self.0));
        }
    }

    struct Noop;

    impl Middleware for Noop {}

    fn context() -> RequestContext {
        RequestContext {
            request_id: RequestId(1),
            task_id:    Some(TaskId(7)),
            request:    None,
            attempt:    2,
        }
    }

    #[test]
    fn test_prepare_folds_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new(vec![
            Arc::new(Tag("a", log.clone())),
            Arc::new(Tag("b", log.clone())),
        ]);

        let builder = chain.prepare(RequestBuilder::with_headers("https://example.com", Headers::new()));
        assert_eq!(builder.headers.get("X-Order"), Some("ab"));
    }

    #[test]
    fn test_hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new(vec![
            Arc::new(Tag("a", log.clone())),
            Arc::new(Tag("b", log.clone())),
        ]);

        chain.before_send(&context());
        chain.did_stop(&context());
        assert_eq!(*log.lock().unwrap(), vec!["a:send:2", "b:send:2", "a:stop", "b:stop"]);
    }

    #[test]
    fn test_default_hooks_are_identity() {
        let chain = MiddlewareChain::new(vec![Arc::new(Noop)]);
        let request = RequestBuilder::new("https://example.com").build().unwrap();
        let response = Response::Data(DataResponse::new(request, None, None, None, Ok(Bytes::new())));

        let out = chain.after_receive(response);
        assert_eq!(out.kind(), "data");
        assert!(out.error().is_none());
    }
}
