//! Per-request context handed to middleware and route handlers.

use std::collections::HashMap;

use crate::Request;

/// Path parameters captured by the matched route pattern.
///
/// Values are stored exactly as they appeared in the path, i.e. still
/// percent-encoded.
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A request plus whatever the router learned while matching it.
///
/// Middleware sees a context with empty [`PathParams`]; the router rebuilds
/// it with the captured parameters before calling the route handler.
pub struct Context {
    request: Request,
    params: PathParams,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self { request, params }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Gives the request back, dropping any captured parameters.
    pub fn into_request(self) -> Request {
        self.request
    }
}
