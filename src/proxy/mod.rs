//! Inbound adapter — exposes [`Cache::get`] over HTTP.
//!
//! `GET /collections/{collection}?value={key}` answers `200` with the value as
//! JSON. Any other method on that path gets `405`, and a failed lookup gets
//! `500` with the error text as the body. A missing `value` parameter is the
//! empty key.

use std::sync::Arc;

use tracing::error;

use crate::backend::Fetch;
use crate::cache::{Cache, Clock};
use crate::context::Context;
use crate::http::request::decode_path_segment;
use crate::middleware::{LoggerMiddleware, Pipeline};
use crate::{Response, Router, StatusCode};

/// Route pattern served by the proxy.
pub const COLLECTION_ROUTE: &str = "/collections/:collection";

/// Query parameter carrying the lookup key.
pub const KEY_PARAM: &str = "value";

/// Builds the request pipeline around a shared cache.
pub fn app<F, C>(cache: Arc<Cache<F, C>>) -> Pipeline
where
    F: Fetch + 'static,
    C: Clock + 'static,
{
    let mut router = Router::new();
    router.get(COLLECTION_ROUTE, move |ctx: Context| {
        let cache = Arc::clone(&cache);
        async move { lookup(&cache, &ctx).await }
    });

    Pipeline::new(router).layer(LoggerMiddleware)
}

/// Resolves one lookup request against `cache`.
pub async fn lookup<F, C>(cache: &Cache<F, C>, ctx: &Context) -> Response
where
    F: Fetch,
    C: Clock,
{
    let collection = decode_path_segment(ctx.params().get("collection").unwrap_or_default());
    let key = ctx.request().query_param(KEY_PARAM).unwrap_or_default();

    let value = match cache.get(&collection, key).await {
        Ok(value) => value,
        Err(err) => {
            error!(%collection, key, error = %err, "lookup failed");
            return Response::new(StatusCode::InternalServerError).body(err.to_string());
        }
    };

    match Response::new(StatusCode::Ok).json(&value) {
        Ok(response) => response,
        Err(err) => {
            error!(%collection, key, error = %err, "failed to encode value");
            Response::new(StatusCode::InternalServerError).body(err.to_string())
        }
    }
}
