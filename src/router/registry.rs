//! Path router mapping path patterns to async handlers.
//!
//! Patterns are `/`-separated segments. A segment starting with `:` captures
//! the matching path segment under that name; a final `*` matches any
//! remaining segments. Routes are tried in registration order.
//!
//! # Example
//!
//! ```ignore
//! use netrpc::router::{PathRouter, RouteContext};
//! use netrpc::RouteResult;
//! use serde_json::json;
//!
//! let mut router = PathRouter::new();
//! router.handle("/ping", |_ctx| async { RouteResult::ok(json!({"pong": true})) });
//! router.handle("/users/:id", |ctx: RouteContext| async move {
//!     RouteResult::ok(json!({"id": ctx.param("id")}))
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{RouteContext, RouteOutcome, Router, REQUEST_KIND};
use crate::envelope::RouteResult;
use crate::pipeline::BoxFuture;

/// Error value returned when a typed handler cannot decode its query.
pub const INVALID_QUERY: &str = "invalid_query";

/// Trait for route handler functions.
pub trait RouteHandler: Send + Sync + 'static {
    /// Serve a matched request.
    fn call(&self, ctx: RouteContext) -> BoxFuture<'static, RouteResult>;
}

/// Wrapper for a handler taking the raw context.
pub struct FnHandler<F, Fut>
where
    F: Fn(RouteContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RouteResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> RouteHandler for FnHandler<F, Fut>
where
    F: Fn(RouteContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RouteResult> + Send + 'static,
{
    fn call(&self, ctx: RouteContext) -> BoxFuture<'static, RouteResult> {
        Box::pin((self.handler)(ctx))
    }
}

/// Wrapper that deserializes the query before calling the handler and
/// serializes whatever it returns.
pub struct TypedHandler<F, T, R, Fut>
where
    F: Fn(T, RouteContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, Value>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> (Fut, R)>,
}

impl<F, T, R, Fut> RouteHandler for TypedHandler<F, T, R, Fut>
where
    F: Fn(T, RouteContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, Value>> + Send + 'static,
{
    fn call(&self, ctx: RouteContext) -> BoxFuture<'static, RouteResult> {
        let parsed: T = match ctx.query_as() {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("Query decode failed for request {}: {}", ctx.request_id(), e);
                return Box::pin(async { RouteResult::err(INVALID_QUERY) });
            }
        };

        let fut = (self.handler)(parsed, ctx);
        Box::pin(async move {
            match fut.await {
                Ok(response) => match serde_json::to_value(response) {
                    Ok(v) => RouteResult::ok(v),
                    Err(e) => RouteResult::err(e.to_string()),
                },
                Err(error) => RouteResult::err(error),
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Rest,
}

/// Compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let segments = split(pattern)
            .map(|s| match s {
                "*" => Segment::Rest,
                _ => match s.strip_prefix(':') {
                    Some(name) => Segment::Param(name.to_string()),
                    None => Segment::Literal(s.to_string()),
                },
            })
            .collect();
        Self { segments }
    }

    /// Match a path, returning captured params on success.
    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = split(path).collect();
        let mut params = HashMap::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Rest => return Some(params),
                Segment::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i)?;
                    params.insert(name.clone(), (*value).to_string());
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

struct RouteEntry {
    kind: String,
    pattern: Pattern,
    handler: Box<dyn RouteHandler>,
}

/// Default [`Router`] implementation.
#[derive(Default)]
pub struct PathRouter {
    routes: Vec<RouteEntry>,
}

impl PathRouter {
    /// Create an empty router. Every path yields no match.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request handler for a path pattern.
    pub fn handle<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(RouteContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RouteResult> + Send + 'static,
    {
        self.handle_kind(REQUEST_KIND, pattern, handler)
    }

    /// Register a handler under a specific route namespace.
    pub fn handle_kind<F, Fut>(&mut self, kind: &str, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(RouteContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RouteResult> + Send + 'static,
    {
        self.insert(
            kind,
            pattern,
            Box::new(FnHandler {
                handler,
                _phantom: PhantomData,
            }),
        )
    }

    /// Register a request handler that receives the query decoded as `T`.
    ///
    /// A query that fails to decode is answered with [`INVALID_QUERY`].
    pub fn handle_typed<F, T, R, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(T, RouteContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<R, Value>> + Send + 'static,
    {
        self.insert(
            REQUEST_KIND,
            pattern,
            Box::new(TypedHandler {
                handler,
                _phantom: PhantomData,
            }),
        )
    }

    fn insert(&mut self, kind: &str, pattern: &str, handler: Box<dyn RouteHandler>) -> &mut Self {
        self.routes.push(RouteEntry {
            kind: kind.to_string(),
            pattern: Pattern::parse(pattern),
            handler,
        });
        self
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Router for PathRouter {
    fn route<'a>(
        &'a self,
        kind: &'a str,
        path: &'a str,
        context: RouteContext,
    ) -> BoxFuture<'a, RouteOutcome> {
        let found = self
            .routes
            .iter()
            .filter(|r| r.kind == kind)
            .find_map(|r| r.pattern.matches(path).map(|params| (r, params)));

        match found {
            Some((route, params)) => {
                let fut = route.handler.call(context.with_params(params));
                Box::pin(async move { RouteOutcome::Matched(fut.await) })
            }
            None => Box::pin(async { RouteOutcome::NoMatch }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::envelope::RequestId;
    use serde::Deserialize;
    use serde_json::{json, Map};

    fn ctx(query: Value) -> RouteContext {
        let query = match query {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        RouteContext::new(RequestId(1), Address::from("a"), query)
    }

    #[test]
    fn test_pattern_matching() {
        let p = Pattern::parse("/users/:id/posts");
        let params = p.matches("/users/7/posts").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("7"));

        assert!(p.matches("/users/7").is_none());
        assert!(p.matches("/users/7/posts/1").is_none());
        assert!(p.matches("/accounts/7/posts").is_none());

        // Slashes are not significant beyond separating segments.
        assert!(Pattern::parse("/ping").matches("ping/").is_some());
    }

    #[test]
    fn test_rest_pattern() {
        let p = Pattern::parse("/files/*");
        assert!(p.matches("/files").is_some());
        assert!(p.matches("/files/a/b/c").is_some());
        assert!(p.matches("/other/a").is_none());
    }

    async fn matched(router: &PathRouter, path: &str, query: Value) -> RouteResult {
        match router.route(REQUEST_KIND, path, ctx(query)).await {
            RouteOutcome::Matched(result) => result,
            RouteOutcome::NoMatch => panic!("expected a match for {}", path),
        }
    }

    #[tokio::test]
    async fn test_route_matched() {
        let mut router = PathRouter::new();
        router.handle("/ping", |_ctx| async { RouteResult::ok(json!({"pong": true})) });

        let result = matched(&router, "/ping", json!({})).await;
        assert_eq!(result, RouteResult::ok(json!({"pong": true})));
    }

    #[tokio::test]
    async fn test_route_no_match() {
        let router = PathRouter::new();
        assert!(matches!(
            router.route(REQUEST_KIND, "/users/1", ctx(json!({}))).await,
            RouteOutcome::NoMatch
        ));
    }

    #[tokio::test]
    async fn test_kind_namespaces_are_separate() {
        let mut router = PathRouter::new();
        router.handle_kind("event", "/tick", |_ctx| async { RouteResult::ok(1) });

        assert!(matches!(
            router.route(REQUEST_KIND, "/tick", ctx(json!({}))).await,
            RouteOutcome::NoMatch
        ));
        assert!(matches!(
            router.route("event", "/tick", ctx(json!({}))).await,
            RouteOutcome::Matched(_)
        ));
    }

    #[tokio::test]
    async fn test_first_registered_route_wins() {
        let mut router = PathRouter::new();
        router
            .handle("/users/me", |_ctx| async { RouteResult::ok("me") })
            .handle("/users/:id", |ctx: RouteContext| async move {
                RouteResult::ok(ctx.param("id").unwrap_or_default().to_string())
            });
        assert_eq!(router.len(), 2);

        let me = matched(&router, "/users/me", json!({})).await;
        assert_eq!(me.response, json!("me"));

        let other = matched(&router, "/users/42", json!({})).await;
        assert_eq!(other.response, json!("42"));
    }

    #[derive(Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    #[tokio::test]
    async fn test_typed_handler() {
        let mut router = PathRouter::new();
        router.handle_typed("/add", |q: Add, _ctx| async move {
            if q.a < 0 {
                return Err(json!("negative"));
            }
            Ok(q.a + q.b)
        });

        let sum = matched(&router, "/add", json!({"a": 2, "b": 3})).await;
        assert_eq!(sum, RouteResult::ok(5));

        let neg = matched(&router, "/add", json!({"a": -1, "b": 3})).await;
        assert_eq!(neg, RouteResult::err("negative"));

        let bad = matched(&router, "/add", json!({"a": "x"})).await;
        assert_eq!(bad, RouteResult::err(INVALID_QUERY));
    }
}
