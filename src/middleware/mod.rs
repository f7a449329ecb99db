//! Middleware pipeline — composable before/after request handler logic.
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`] — type-erased, cheaply-cloneable middleware function.
//! - [`Pipeline`] — an ordered middleware stack that terminates in a [`Router`].
//! - [`LoggerMiddleware`] — built-in request/response logger.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Request, Response, StatusCode, context::Context, router::Router};

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be called
/// more than once per middleware invocation.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given middleware stack.
    pub fn new(middlewares: impl Into<Arc<[MiddlewareHandler]>>) -> Self {
        Self {
            middlewares: middlewares.into(),
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// If the chain is exhausted without any layer producing a response, a
    /// `500 Internal Server Error` is returned.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline"),
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may pass the
/// request through, short-circuit with their own [`Response`], or decorate the
/// downstream response.
///
/// Implementations must not hold lock guards or `&mut` references to shared
/// state across an `.await` point.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Logs each request's method, path, status, and duration once the
/// downstream handler has completed.
///
/// ```text
/// GET /collections/items - 200 (1.2ms)
/// ```
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();

            let response = next.run(ctx).await;

            let duration = start.elapsed();
            let status = response.status().as_u16();

            tracing::info!("{} {} - {} ({:?})", method, path, status, duration);

            response
        })
    }
}

/// An ordered middleware stack whose innermost layer is a [`Router`].
///
/// Layers run in the order they were added; the first layer added sees the
/// request first and the response last.
///
/// # Examples
///
/// ```rust,no_run
/// use readthru::{Response, Router, StatusCode};
/// use readthru::middleware::{LoggerMiddleware, Pipeline};
///
/// let mut router = Router::new();
/// router.get("/health", |_ctx| async { Response::new(StatusCode::NoContent) });
///
/// let pipeline = Pipeline::new(router).layer(LoggerMiddleware);
/// ```
#[derive(Clone)]
pub struct Pipeline {
    // Always ends with the router endpoint.
    chain: Arc<[MiddlewareHandler]>,
}

impl Pipeline {
    pub fn new(router: Router) -> Self {
        let router = Arc::new(router);
        let endpoint: MiddlewareHandler = Arc::new(
            move |ctx: Context, _next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                let router = Arc::clone(&router);
                Box::pin(async move { router.route(ctx.into_request()).await })
            },
        );
        Self {
            chain: Arc::from(vec![endpoint]),
        }
    }

    /// Adds `middleware` just outside the router, inside every layer added before it.
    #[must_use]
    pub fn layer<M>(self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        let mut chain = self.chain.to_vec();
        chain.insert(chain.len() - 1, from_middleware(Arc::new(middleware)));
        Self {
            chain: chain.into(),
        }
    }

    /// Runs `request` through every layer and the router.
    pub async fn handle(&self, request: Request) -> Response {
        Next::new(Arc::clone(&self.chain))
            .run(Context::new(request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn make_request(path: &str) -> Request {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Record {
        fn handle(
            &self,
            ctx: Context,
            next: Next,
        ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            let name = self.name;
            let log = Arc::clone(&self.log);
            Box::pin(async move {
                log.lock().unwrap().push(format!("{name}:before"));
                let response = next.run(ctx).await;
                log.lock().unwrap().push(format!("{name}:after"));
                response
            })
        }
    }

    struct Reject;

    impl Middleware for Reject {
        fn handle(
            &self,
            _ctx: Context,
            _next: Next,
        ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(async { Response::new(StatusCode::ServiceUnavailable) })
        }
    }

    fn health_router() -> Router {
        let mut router = Router::new();
        router.get("/health", |_ctx| async {
            Response::new(StatusCode::NoContent)
        });
        router
    }

    #[tokio::test]
    async fn empty_chain_falls_back_to_500() {
        let next = Next::new(Vec::<MiddlewareHandler>::new());
        let res = next.run(Context::new(make_request("/"))).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn pipeline_without_layers_routes() {
        let pipeline = Pipeline::new(health_router());
        assert_eq!(
            pipeline.handle(make_request("/health")).await.status(),
            StatusCode::NoContent
        );
        assert_eq!(
            pipeline.handle(make_request("/missing")).await.status(),
            StatusCode::NotFound
        );
    }

    #[tokio::test]
    async fn layers_run_outermost_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(health_router())
            .layer(Record {
                name: "outer",
                log: Arc::clone(&log),
            })
            .layer(Record {
                name: "inner",
                log: Arc::clone(&log),
            })
            .layer(LoggerMiddleware);

        let res = pipeline.handle(make_request("/health")).await;
        assert_eq!(res.status(), StatusCode::NoContent);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:before", "inner:before", "inner:after", "outer:after"]
        );
    }

    #[tokio::test]
    async fn layer_can_short_circuit() {
        let pipeline = Pipeline::new(health_router()).layer(Reject);
        let res = pipeline.handle(make_request("/health")).await;
        assert_eq!(res.status(), StatusCode::ServiceUnavailable);
    }
}
