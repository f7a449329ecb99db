//! Request routing — map URL patterns and HTTP methods to handler functions.
//!
//! Two pattern styles are supported:
//!
//! | Pattern                     | Example match          | Captured params          |
//! |-----------------------------|------------------------|--------------------------|
//! | `/health`                   | `/health`              | *(none)*                 |
//! | `/collections/:collection`  | `/collections/items`   | `collection → "items"`   |
//!
//! Trailing slashes are normalized on both patterns and incoming paths, so
//! `/health/` and `/health` are treated as equivalent.
//!
//! Routes are matched in registration order; the first route whose method and
//! pattern both match wins. A path that matches some route under a different
//! method is answered with `405 Method Not Allowed` and an `Allow` header; a
//! path no route knows is answered with `404 Not Found`.

use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, PathParams};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased, heap-allocated async handler that processes a [`Context`] and returns a
/// [`Response`].
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait through the blanket impl below.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone)]
enum Pattern {
    // Matches one exact path string, e.g. `/health`.
    Exact(String),
    // Matches a fixed number of segments where some may be named captures.
    Parameterized { segments: Vec<Segment> },
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

impl Pattern {
    /// Compile a pattern string. Anything containing `:` is parameterized,
    /// everything else is an exact match.
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Parameter(name.to_string()),
                    None => Segment::Static(s.to_string()),
                })
                .collect();

            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_string())
    }

    // Try to match `path` against this pattern, returning extracted [`PathParams`] on success.
    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = PathParams::new();
                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) if s != path_seg => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => {
                            params.insert(name.clone(), path_seg.to_string());
                        }
                    }
                }

                Some(params)
            }
        }
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

/// HTTP request router that dispatches requests to registered handler functions.
///
/// # Examples
///
/// ```rust,no_run
/// use readthru::{Router, Response, StatusCode, context::Context};
///
/// let mut router = Router::new();
/// router.get("/collections/:collection", |ctx: Context| async move {
///     let name = ctx.params().get("collection").unwrap_or_default().to_owned();
///     Response::new(StatusCode::Ok).body(name)
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register a handler for `GET` requests matching `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.on(Method::Get, path, handler);
    }

    /// Register a handler for `method` requests matching `path`.
    pub fn on(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx: Context| handler.call(ctx));
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatch `request` to the first route whose method and pattern both match.
    ///
    /// Falls back to `405` (with the methods the path does accept listed in
    /// `Allow`) or `404` when nothing matches.
    pub async fn route(&self, request: Request) -> Response {
        let mut allowed: Vec<&str> = Vec::new();

        for route in &self.routes {
            let Some(params) = route.pattern.matches(request.path()) else {
                continue;
            };
            if &route.method == request.method() {
                let ctx = Context::with_params(request, params);
                return (route.handler)(ctx).await;
            }
            if !allowed.contains(&route.method.as_str()) {
                allowed.push(route.method.as_str());
            }
        }

        if allowed.is_empty() {
            Response::new(StatusCode::NotFound)
        } else {
            Response::new(StatusCode::MethodNotAllowed)
                .header("Allow", allowed.join(", "))
                .body("invalid method")
        }
    }
}
