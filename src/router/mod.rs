//! Request routing: map (method, path) to a handler.
//!
//! The router is a flat list scanned linearly in registration order. For
//! each route the request method must be in the route's [`MethodSet`]; the
//! path then matches either byte-for-byte (`exact_only`) or by prefix. The
//! first match wins; this is an explicit, order-dependent policy, not
//! longest-prefix-wins, so registration order is part of the configuration.
//!
//! The route list is populated once at startup and shared read-only across
//! connection workers.

use std::sync::Arc;

use tracing::debug;

use crate::arena::Arena;
use crate::http::{MethodSet, Request, Response};

/// Capability interface for route handlers: process the request by mutating
/// the response, allocating any cycle-scoped scratch through the arena.
///
/// Implemented automatically for matching closures:
///
/// ```
/// use taghttp::arena::Arena;
/// use taghttp::http::{Method, Request, Response, StatusCode};
/// use taghttp::router::Router;
///
/// let mut router = Router::new();
/// router.add(
///     "/ping",
///     Method::Get.into(),
///     true,
///     |_req: &Request, res: &mut Response, _arena: &mut Arena| {
///         res.set_status(StatusCode::Ok);
///         res.set_body("pong");
///     },
/// );
/// ```
pub trait RouteHandler: Send + Sync {
    fn handle(&self, request: &Request, response: &mut Response, arena: &mut Arena);
}

impl<F> RouteHandler for F
where
    F: Fn(&Request, &mut Response, &mut Arena) + Send + Sync,
{
    fn handle(&self, request: &Request, response: &mut Response, arena: &mut Arena) {
        self(request, response, arena)
    }
}

// One registered (path, method mask, handler, match mode) entry.
struct Route {
    path: String,
    methods: MethodSet,
    handler: Arc<dyn RouteHandler>,
    exact_only: bool,
}

impl Route {
    fn matches(&self, request: &Request) -> bool {
        if !self.methods.contains(request.method()) {
            return false;
        }
        if self.exact_only {
            request.target() == self.path
        } else {
            request.target().starts_with(&self.path)
        }
    }
}

/// Linear, first-match-wins request router.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route. `exact_only` requires byte equality with the
    /// request target; otherwise the route matches any target beginning
    /// with `path`.
    pub fn add(
        &mut self,
        path: impl Into<String>,
        methods: MethodSet,
        exact_only: bool,
        handler: impl RouteHandler + 'static,
    ) {
        self.routes.push(Route {
            path: path.into(),
            methods,
            handler: Arc::new(handler),
            exact_only,
        });
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` when no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches to the first matching route in registration order.
    ///
    /// Returns `false` when no route matched; the caller is responsible for
    /// synthesizing the 404 response. A miss is not an error.
    pub fn dispatch(&self, request: &Request, response: &mut Response, arena: &mut Arena) -> bool {
        for route in &self.routes {
            if route.matches(request) {
                debug!(method = %request.method(), path = %route.path, "routing");
                route.handler.handle(request, response, arena);
                return true;
            }
        }
        debug!(method = %request.method(), target = %request.target(), "no matching route");
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::arena::Tag;
    use crate::http::{Method, StatusCode};

    fn request(method: &str, target: &str) -> Request {
        let raw = format!("{method} {target} HTTP/1.1\r\nHost: t\r\n\r\n");
        Request::parse(&raw, Tag::from_raw(0)).unwrap()
    }

    fn dispatch(router: &Router, method: &str, target: &str) -> (bool, Response) {
        let req = request(method, target);
        let mut res = Response::new(req.tag());
        let mut arena = Arena::new();
        let matched = router.dispatch(&req, &mut res, &mut arena);
        (matched, res)
    }

    fn status_handler(status: StatusCode) -> impl RouteHandler {
        move |_req: &Request, res: &mut Response, _arena: &mut Arena| res.set_status(status)
    }

    #[test]
    fn exact_route_requires_byte_equality() {
        let mut router = Router::new();
        router.add("/", Method::Get.into(), true, status_handler(StatusCode::Ok));

        assert!(dispatch(&router, "GET", "/").0);
        assert!(!dispatch(&router, "GET", "/anything").0);
    }

    #[test]
    fn prefix_route_matches_subpaths() {
        let mut router = Router::new();
        router.add("/echo", Method::Get.into(), false, status_handler(StatusCode::Ok));

        assert!(dispatch(&router, "GET", "/echo/hello").0);
        assert!(dispatch(&router, "GET", "/echo").0);
        assert!(!dispatch(&router, "GET", "/user-agent").0);
    }

    #[test]
    fn method_mask_is_checked_first() {
        let mut router = Router::new();
        router.add(
            "/files",
            MethodSet::from(Method::Get) | Method::Post,
            false,
            status_handler(StatusCode::Ok),
        );

        assert!(dispatch(&router, "GET", "/files/a").0);
        assert!(dispatch(&router, "POST", "/files/a").0);
        assert!(!dispatch(&router, "DELETE", "/files/a").0);
        assert!(!dispatch(&router, "BREW", "/files/a").0);
    }

    #[test]
    fn first_registered_match_wins() {
        let order = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new();

        let first = Arc::clone(&order);
        router.add("/path", Method::Get.into(), false, move |_: &Request, res: &mut Response, _: &mut Arena| {
            first.store(1, Ordering::SeqCst);
            res.set_status(StatusCode::Ok);
        });
        let second = Arc::clone(&order);
        router.add("/path", Method::Get.into(), false, move |_: &Request, res: &mut Response, _: &mut Arena| {
            second.store(2, Ordering::SeqCst);
            res.set_status(StatusCode::Created);
        });

        let (matched, res) = dispatch(&router, "GET", "/path/x");
        assert!(matched);
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(order.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn miss_does_not_invoke_any_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let mut router = Router::new();
        router.add("/known", Method::Get.into(), true, move |_: &Request, _: &mut Response, _: &mut Arena| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        let (matched, res) = dispatch(&router, "GET", "/nope");
        assert!(!matched);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // The router leaves the response untouched; the caller sets 404.
        assert_eq!(res.status(), StatusCode::Ok);
    }
}
