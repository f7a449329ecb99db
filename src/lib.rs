//! # readthru
//!
//! A read-through caching proxy for HTTP key-value backends.
//!
//! Lookups arrive as `GET /collections/{collection}?value={key}`. Each one is
//! answered from an in-memory [`Cache`] while the stored value is younger than
//! the staleness window, and otherwise forwarded to the backend at
//! `GET {backend}/collections/{collection}?value={key}`, with the result
//! stored for the next caller.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use readthru::{BackendClient, Cache, Server, proxy};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = BackendClient::new("http://localhost:8080", Duration::from_secs(10))?;
//!     let cache = Arc::new(Cache::new(backend, Duration::from_secs(300)));
//!
//!     let server = Server::bind("127.0.0.1:8081").await?;
//!     server.serve(proxy::app(cache)).await?;
//!     Ok(())
//! }
//! ```

// ── Core ──────────────────────────────────────────────────────────────────────
pub mod backend;
pub mod cache;

// ── HTTP glue ─────────────────────────────────────────────────────────────────
pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod proxy;
pub mod router;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use backend::{BackendClient, Fetch, FetchError};
pub use cache::{Cache, KeyScope};
pub use config::{Config, ConfigError};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
